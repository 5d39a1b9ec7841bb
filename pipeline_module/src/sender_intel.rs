use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use extraction_module::drafts::Priority;

#[derive(Debug, thiserror::Error)]
pub enum SenderIntelError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
}

/// Historical signal for one sender within one organization, read by the
/// deadline analyzer to bias priority.
#[derive(Debug, Clone)]
pub struct SenderProfile {
    pub organization_id: Uuid,
    pub sender_address: String,
    pub importance_score: f64,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub avg_completion_secs: Option<f64>,
    pub last_seen_at: DateTime<Utc>,
}

/// One observation about a sender. Call sites treat recording as
/// fire-and-forget: a failed update is logged and never fails the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SenderEvent {
    pub task_created: bool,
    pub priority: Option<Priority>,
    pub completed: bool,
    pub completion_secs: Option<f64>,
}

impl SenderEvent {
    pub fn task_created(priority: Priority) -> Self {
        Self {
            task_created: true,
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn seen() -> Self {
        Self::default()
    }

    pub fn completed(completion_secs: f64) -> Self {
        Self {
            completed: true,
            completion_secs: Some(completion_secs),
            ..Default::default()
        }
    }
}

const INTEL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sender_intelligence (
    organization_id TEXT NOT NULL,
    sender_address TEXT NOT NULL,
    importance_score REAL NOT NULL DEFAULT 0.5,
    tasks_created INTEGER NOT NULL DEFAULT 0,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    avg_completion_secs REAL,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, sender_address)
);
"#;

const NEUTRAL_SCORE: f64 = 0.5;
const SCORE_DECAY: f64 = 0.8;
const COMPLETION_BOOST: f64 = 0.05;

#[derive(Debug)]
pub struct SenderIntelligenceStore {
    path: PathBuf,
}

impl SenderIntelligenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SenderIntelError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    pub fn profile(
        &self,
        organization_id: Uuid,
        sender_address: &str,
    ) -> Result<Option<SenderProfile>, SenderIntelError> {
        let sender = sender_address.trim().to_ascii_lowercase();
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT importance_score, tasks_created, tasks_completed, avg_completion_secs, last_seen_at
                 FROM sender_intelligence
                 WHERE organization_id = ?1 AND sender_address = ?2",
                params![organization_id.to_string(), sender],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((score, created, completed, avg, last_seen)) = row else {
            return Ok(None);
        };
        Ok(Some(SenderProfile {
            organization_id,
            sender_address: sender,
            importance_score: score,
            tasks_created: created,
            tasks_completed: completed,
            avg_completion_secs: avg,
            last_seen_at: DateTime::parse_from_rfc3339(&last_seen)?.with_timezone(&Utc),
        }))
    }

    /// Fold one observation into the sender's profile. The importance score
    /// moves as an exponential average of created-task priority weights and
    /// gets a small boost for completions, clamped to [0, 1].
    pub fn record(
        &self,
        organization_id: Uuid,
        sender_address: &str,
        event: &SenderEvent,
    ) -> Result<(), SenderIntelError> {
        let sender = sender_address.trim().to_ascii_lowercase();
        let conn = self.open()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        conn.execute(
            "INSERT INTO sender_intelligence
                (organization_id, sender_address, importance_score, tasks_created, tasks_completed, avg_completion_secs, last_seen_at)
             VALUES (?1, ?2, ?3, 0, 0, NULL, ?4)
             ON CONFLICT(organization_id, sender_address) DO NOTHING",
            params![organization_id.to_string(), sender, NEUTRAL_SCORE, now],
        )?;

        let priority_weight = event.priority.map(priority_weight);
        conn.execute(
            "UPDATE sender_intelligence
             SET importance_score = min(1.0, max(0.0,
                     CASE
                         WHEN ?3 = 1 AND ?4 IS NOT NULL
                             THEN importance_score * ?5 + (1.0 - ?5) * ?4
                         WHEN ?6 = 1 THEN importance_score + ?7
                         ELSE importance_score
                     END)),
                 tasks_created = tasks_created + CASE WHEN ?3 = 1 THEN 1 ELSE 0 END,
                 avg_completion_secs = CASE
                     WHEN ?8 IS NULL THEN avg_completion_secs
                     WHEN avg_completion_secs IS NULL THEN ?8
                     ELSE (avg_completion_secs * tasks_completed + ?8) / (tasks_completed + 1)
                 END,
                 tasks_completed = tasks_completed + CASE WHEN ?6 = 1 THEN 1 ELSE 0 END,
                 last_seen_at = ?9
             WHERE organization_id = ?1 AND sender_address = ?2",
            params![
                organization_id.to_string(),
                sender,
                event.task_created as i64,
                priority_weight,
                SCORE_DECAY,
                event.completed as i64,
                COMPLETION_BOOST,
                event.completion_secs,
                now,
            ],
        )?;
        Ok(())
    }

    fn open(&self) -> Result<Connection, SenderIntelError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(INTEL_SCHEMA)?;
        Ok(conn)
    }
}

fn priority_weight(priority: Priority) -> f64 {
    match priority {
        Priority::Low => 0.2,
        Priority::Medium => 0.5,
        Priority::High => 0.9,
    }
}
