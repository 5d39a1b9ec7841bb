use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::ingestion::IngestionEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum IngestionQueueError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("uuid error: {0}")]
    Uuid(#[from] uuid::Error),
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    pub id: Uuid,
    pub envelope: IngestionEnvelope,
}

/// At-least-once work queue for inbound messages, keyed by dedupe key so
/// duplicate transport deliveries collapse onto one row. The table is also
/// the durable, externally observable processing status for every message:
/// any process can query status/attempts/last_error by id.
pub trait IngestionQueue: Send + Sync {
    fn enqueue(&self, envelope: &IngestionEnvelope) -> Result<EnqueueResult, IngestionQueueError>;
    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedEnvelope>, IngestionQueueError>;
    fn mark_done(&self, id: &Uuid) -> Result<(), IngestionQueueError>;
    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), IngestionQueueError>;
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ingestion_queue (
    id TEXT PRIMARY KEY,
    route_key TEXT NOT NULL,
    channel TEXT NOT NULL,
    provider_message_id TEXT,
    dedupe_key TEXT NOT NULL UNIQUE,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    locked_at TEXT,
    locked_by TEXT,
    processed_at TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    available_at TEXT
);
CREATE INDEX IF NOT EXISTS ingestion_queue_pending_idx
    ON ingestion_queue(status, created_at);
CREATE INDEX IF NOT EXISTS ingestion_queue_available_idx
    ON ingestion_queue(status, available_at);
"#;

#[derive(Debug, Clone)]
pub struct SqliteIngestionQueue {
    path: PathBuf,
    lease_secs: i64,
    max_attempts: i64,
    backoff_secs: i64,
}

impl SqliteIngestionQueue {
    pub fn new(
        path: impl Into<PathBuf>,
        lease_secs: i64,
        max_attempts: i64,
        backoff_secs: i64,
    ) -> Result<Self, IngestionQueueError> {
        let queue = Self {
            path: path.into(),
            lease_secs,
            max_attempts,
            backoff_secs,
        };
        let _ = queue.open()?;
        Ok(queue)
    }

    fn open(&self) -> Result<Connection, IngestionQueueError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(conn)
    }

    #[cfg(test)]
    pub(crate) fn row_status(&self, id: &Uuid) -> Result<Option<String>, IngestionQueueError> {
        let conn = self.open()?;
        let status = conn
            .query_row(
                "SELECT status FROM ingestion_queue WHERE id = ?1",
                params![id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(status)
    }
}

impl IngestionQueue for SqliteIngestionQueue {
    fn enqueue(&self, envelope: &IngestionEnvelope) -> Result<EnqueueResult, IngestionQueueError> {
        let conn = self.open()?;
        let payload_json = serde_json::to_string(envelope)?;
        let inserted = conn.execute(
            "INSERT INTO ingestion_queue
                (id, route_key, channel, provider_message_id, dedupe_key, payload_json, status, created_at, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, 0)
             ON CONFLICT(dedupe_key) DO NOTHING",
            params![
                envelope.envelope_id.to_string(),
                envelope.route_key,
                envelope.channel.to_string(),
                envelope.provider_message_id,
                envelope.dedupe_key,
                payload_json,
                format_datetime(Utc::now()),
            ],
        )?;
        Ok(EnqueueResult {
            inserted: inserted > 0,
        })
    }

    fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedEnvelope>, IngestionQueueError> {
        let mut conn = self.open()?;
        let now = Utc::now();
        let lease_cutoff = format_datetime(now - chrono::Duration::seconds(self.lease_secs));
        let now_text = format_datetime(now);

        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                "SELECT id, payload_json
                 FROM ingestion_queue
                 WHERE (
                     status = 'pending'
                     OR (status = 'processing' AND locked_at < ?1)
                 )
                   AND (available_at IS NULL OR available_at <= ?2)
                   AND attempts < ?3
                 ORDER BY created_at, rowid
                 LIMIT 1",
                params![lease_cutoff, now_text, self.max_attempts],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((id_raw, payload_json)) = row else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE ingestion_queue
             SET status = 'processing',
                 locked_at = ?2,
                 locked_by = ?3,
                 attempts = attempts + 1
             WHERE id = ?1",
            params![id_raw, now_text, worker_id],
        )?;
        tx.commit()?;

        let id = Uuid::parse_str(&id_raw)?;
        let envelope: IngestionEnvelope = serde_json::from_str(&payload_json)?;
        Ok(Some(QueuedEnvelope { id, envelope }))
    }

    fn mark_done(&self, id: &Uuid) -> Result<(), IngestionQueueError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE ingestion_queue
             SET status = 'done',
                 processed_at = ?2,
                 locked_at = NULL,
                 locked_by = NULL
             WHERE id = ?1",
            params![id.to_string(), format_datetime(Utc::now())],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), IngestionQueueError> {
        let conn = self.open()?;
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM ingestion_queue WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        if attempts >= self.max_attempts {
            conn.execute(
                "UPDATE ingestion_queue
                 SET status = 'failed',
                     processed_at = ?2,
                     locked_at = NULL,
                     locked_by = NULL,
                     available_at = NULL,
                     last_error = ?3
                 WHERE id = ?1",
                params![id.to_string(), format_datetime(now), error],
            )?;
        } else {
            let backoff_secs = attempts.max(1).saturating_mul(self.backoff_secs);
            let available_at = format_datetime(now + chrono::Duration::seconds(backoff_secs));
            conn.execute(
                "UPDATE ingestion_queue
                 SET status = 'pending',
                     processed_at = ?2,
                     locked_at = NULL,
                     locked_by = NULL,
                     available_at = ?3,
                     last_error = ?4
                 WHERE id = ?1",
                params![id.to_string(), format_datetime(now), available_at, error],
            )?;
        }
        Ok(())
    }
}

// Fixed-width timestamps so lexicographic SQL comparisons match time order.
fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::ingestion::{build_dedupe_key, IngestionPayload};
    use tempfile::TempDir;

    fn sample_envelope(dedupe_seed: &str) -> IngestionEnvelope {
        let payload = IngestionPayload {
            sender: "alice@acme.com".to_string(),
            sender_name: None,
            recipient: "acme@intake.taskwell.io".to_string(),
            subject: Some(format!("subject {}", dedupe_seed)),
            text_body: Some("hello".to_string()),
            html_body: None,
            provider_message_id: Some(dedupe_seed.to_string()),
            thread_id: None,
            headers: Vec::new(),
            command: None,
        };
        IngestionEnvelope {
            envelope_id: Uuid::new_v4(),
            received_at: Utc::now(),
            route_key: "acme".to_string(),
            channel: Channel::Email,
            provider_message_id: Some(dedupe_seed.to_string()),
            dedupe_key: build_dedupe_key("acme", Channel::Email, Some(dedupe_seed), &payload),
            payload,
        }
    }

    fn test_queue(temp: &TempDir) -> SqliteIngestionQueue {
        SqliteIngestionQueue::new(temp.path().join("queue.db"), 60, 3, 5).expect("queue")
    }

    #[test]
    fn enqueue_and_claim_roundtrip() {
        let temp = TempDir::new().expect("tempdir");
        let queue = test_queue(&temp);

        let envelope = sample_envelope("msg-1");
        let result = queue.enqueue(&envelope).expect("enqueue");
        assert!(result.inserted);

        let claimed = queue.claim_next("worker-a").expect("claim").expect("row");
        assert_eq!(claimed.envelope.dedupe_key, envelope.dedupe_key);
        assert_eq!(claimed.id, envelope.envelope_id);

        queue.mark_done(&claimed.id).expect("done");
        assert_eq!(queue.row_status(&claimed.id).expect("status").as_deref(), Some("done"));
        assert!(queue.claim_next("worker-a").expect("claim").is_none());
    }

    #[test]
    fn duplicate_dedupe_key_is_not_inserted() {
        let temp = TempDir::new().expect("tempdir");
        let queue = test_queue(&temp);

        let envelope = sample_envelope("msg-2");
        assert!(queue.enqueue(&envelope).expect("enqueue").inserted);
        let mut duplicate = sample_envelope("msg-2");
        duplicate.envelope_id = Uuid::new_v4();
        assert!(!queue.enqueue(&duplicate).expect("enqueue").inserted);
    }

    #[test]
    fn claims_are_ordered_oldest_first() {
        let temp = TempDir::new().expect("tempdir");
        let queue = test_queue(&temp);

        queue.enqueue(&sample_envelope("first")).expect("enqueue");
        queue.enqueue(&sample_envelope("second")).expect("enqueue");

        let first = queue.claim_next("w").expect("claim").expect("row");
        assert_eq!(first.envelope.provider_message_id.as_deref(), Some("first"));
    }

    #[test]
    fn claimed_rows_are_leased_to_one_worker() {
        let temp = TempDir::new().expect("tempdir");
        let queue = test_queue(&temp);

        queue.enqueue(&sample_envelope("msg-3")).expect("enqueue");
        assert!(queue.claim_next("worker-a").expect("claim").is_some());
        // Lease still held: a second worker sees nothing.
        assert!(queue.claim_next("worker-b").expect("claim").is_none());
    }

    #[test]
    fn failures_back_off_then_go_terminal() {
        let temp = TempDir::new().expect("tempdir");
        let queue = SqliteIngestionQueue::new(temp.path().join("queue.db"), 0, 2, 5).expect("queue");

        queue.enqueue(&sample_envelope("msg-4")).expect("enqueue");

        let first = queue.claim_next("w").expect("claim").expect("row");
        queue.mark_failed(&first.id, "boom").expect("fail");
        assert_eq!(queue.row_status(&first.id).expect("status").as_deref(), Some("pending"));

        // Backed off: not claimable until available_at passes.
        assert!(queue.claim_next("w").expect("claim").is_none());

        // Force availability and exhaust attempts.
        let conn = queue.open().expect("open");
        conn.execute("UPDATE ingestion_queue SET available_at = NULL", [])
            .expect("reset");
        drop(conn);
        let second = queue.claim_next("w").expect("claim").expect("row");
        queue.mark_failed(&second.id, "boom again").expect("fail");
        assert_eq!(queue.row_status(&second.id).expect("status").as_deref(), Some("failed"));
        assert!(queue.claim_next("w").expect("claim").is_none());
    }
}
