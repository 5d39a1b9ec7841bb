use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use extraction_module::drafts::Priority;

use crate::channel::Channel;
use crate::visibility::Visibility;

mod migrations;
mod rows;
mod schema;

use migrations::{ensure_processing_log_table, ensure_tasks_columns};
use rows::{
    finish_task_row, format_optional_date, load_reminders, load_shared_with, map_task_row,
    TASK_COLUMNS,
};
use schema::TASKS_SCHEMA;

/// Reminders fire at 09:00 UTC on the reminder date.
const REMINDER_HOUR_UTC: u32 = 9;

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid reminder recurrence: {0}")]
    Recurrence(#[from] cron::error::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Input for one task insert, produced by the materializer.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub organization_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub reminder_date: Option<NaiveDate>,
    pub visibility: Visibility,
    pub assigned_to: Option<Uuid>,
    pub shared_with: Vec<Uuid>,
    pub creator_id: Option<Uuid>,
    pub channel: Channel,
    pub thread_id: Option<String>,
    pub metadata: serde_json::Value,
    /// Optional cron expression for a recurring reminder.
    pub reminder_recurrence: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub reminder_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub visibility: Visibility,
    pub assigned_to: Option<Uuid>,
    pub creator_id: Option<Uuid>,
    pub channel: Channel,
    pub thread_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub shared_with: Vec<Uuid>,
    pub reminders: Vec<TaskReminder>,
}

#[derive(Debug, Clone)]
pub struct TaskReminder {
    pub id: i64,
    pub task_id: Uuid,
    pub remind_at: DateTime<Utc>,
    pub recurrence: Option<String>,
    pub sent: bool,
}

/// Audit outcome for one consumed inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Created,
    Duplicate,
    Unroutable,
    QuotaExhausted,
    Partial,
    Error,
}

impl ProcessingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingOutcome::Created => "created",
            ProcessingOutcome::Duplicate => "duplicate",
            ProcessingOutcome::Unroutable => "unroutable",
            ProcessingOutcome::QuotaExhausted => "quota_exhausted",
            ProcessingOutcome::Partial => "partial",
            ProcessingOutcome::Error => "error",
        }
    }
}

impl FromStr for ProcessingOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(ProcessingOutcome::Created),
            "duplicate" => Ok(ProcessingOutcome::Duplicate),
            "unroutable" => Ok(ProcessingOutcome::Unroutable),
            "quota_exhausted" => Ok(ProcessingOutcome::QuotaExhausted),
            "partial" => Ok(ProcessingOutcome::Partial),
            "error" => Ok(ProcessingOutcome::Error),
            other => Err(format!("unknown processing outcome: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingEntry {
    pub provider_message_id: String,
    pub organization_id: Option<Uuid>,
    pub outcome: ProcessingOutcome,
    pub task_ids: Vec<Uuid>,
    pub detail: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Task rows, their sharer sets and reminders, plus the per-message audit
/// log. Only the materializer (and the out-of-scope API layer) writes here.
#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, TaskStoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    /// Insert one task with its sharer set and reminder, transactionally.
    pub fn insert_task(&self, task: &NewTask) -> Result<TaskRecord, TaskStoreError> {
        if let Some(expression) = task.reminder_recurrence.as_deref() {
            // Validated up front so a bad expression fails the insert, not
            // the reminder scheduler later.
            cron::Schedule::from_str(expression)?;
        }

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO tasks
                (id, organization_id, title, description, priority, due_date, reminder_date,
                 status, visibility, assigned_to, creator_id, channel, thread_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id.to_string(),
                task.organization_id.to_string(),
                task.title,
                task.description,
                task.priority.as_str(),
                format_optional_date(task.due_date),
                format_optional_date(task.reminder_date),
                task.visibility.as_str(),
                task.assigned_to.map(|value| value.to_string()),
                task.creator_id.map(|value| value.to_string()),
                task.channel.as_str(),
                task.thread_id,
                serde_json::to_string(&task.metadata)?,
                format_datetime(created_at),
            ],
        )?;

        for member_id in &task.shared_with {
            tx.execute(
                "INSERT OR IGNORE INTO task_shared_with (task_id, member_id) VALUES (?1, ?2)",
                params![id.to_string(), member_id.to_string()],
            )?;
        }

        if let Some(reminder_date) = task.reminder_date {
            let remind_at = reminder_date
                .and_hms_opt(REMINDER_HOUR_UTC, 0, 0)
                .ok_or_else(|| TaskStoreError::Storage("invalid reminder time".to_string()))?
                .and_utc();
            tx.execute(
                "INSERT INTO task_reminders (task_id, remind_at, recurrence, sent)
                 VALUES (?1, ?2, ?3, 0)",
                params![
                    id.to_string(),
                    format_datetime(remind_at),
                    task.reminder_recurrence,
                ],
            )?;
        }

        tx.commit()?;
        self.load_task(id)?
            .ok_or_else(|| TaskStoreError::Storage(format!("task {} vanished after insert", id)))
    }

    pub fn load_task(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskStoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.to_string()],
                map_task_row,
            )
            .optional()?;
        let Some(raw) = row else {
            return Ok(None);
        };
        let mut record = finish_task_row(raw)?;
        record.shared_with = load_shared_with(&conn, &record.id.to_string())?;
        record.reminders = load_reminders(&conn, &record.id.to_string())?;
        Ok(Some(record))
    }

    /// The dedup check: a non-done task in the same organization with the
    /// same title and due date, created inside the lookback window.
    pub fn find_recent_duplicate(
        &self,
        organization_id: Uuid,
        title: &str,
        due_date: Option<NaiveDate>,
        window: StdDuration,
    ) -> Result<Option<Uuid>, TaskStoreError> {
        let conn = self.open()?;
        let cutoff =
            format_datetime(Utc::now() - Duration::seconds(window.as_secs() as i64));
        let due_text = format_optional_date(due_date);
        let row = conn
            .query_row(
                "SELECT id FROM tasks
                 WHERE organization_id = ?1
                   AND title = ?2
                   AND ((?3 IS NULL AND due_date IS NULL) OR due_date = ?3)
                   AND status != 'done'
                   AND created_at >= ?4
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![organization_id.to_string(), title, due_text, cutoff],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        row.map(|raw| Uuid::parse_str(&raw).map_err(TaskStoreError::from))
            .transpose()
    }

    pub fn count_thread_tasks(
        &self,
        organization_id: Uuid,
        thread_id: &str,
    ) -> Result<i64, TaskStoreError> {
        let conn = self.open()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE organization_id = ?1 AND thread_id = ?2",
            params![organization_id.to_string(), thread_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record the audit entry for one consumed message. First write wins;
    /// reprocessing never overwrites the original outcome.
    pub fn record_processing(&self, entry: &ProcessingEntry) -> Result<(), TaskStoreError> {
        let conn = self.open()?;
        let task_ids: Vec<String> = entry.task_ids.iter().map(Uuid::to_string).collect();
        conn.execute(
            "INSERT INTO processing_log
                (provider_message_id, organization_id, outcome, task_ids, detail, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(provider_message_id) DO NOTHING",
            params![
                entry.provider_message_id,
                entry.organization_id.map(|value| value.to_string()),
                entry.outcome.as_str(),
                serde_json::to_string(&task_ids)?,
                entry.detail,
                format_datetime(entry.processed_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_processing(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<ProcessingEntry>, TaskStoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT provider_message_id, organization_id, outcome, task_ids, detail, processed_at
                 FROM processing_log
                 WHERE provider_message_id = ?1",
                params![provider_message_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((message_id, organization_id, outcome, task_ids, detail, processed_at)) = row
        else {
            return Ok(None);
        };
        let task_ids: Vec<String> = serde_json::from_str(&task_ids)?;
        let mut parsed_ids = Vec::new();
        for raw in task_ids {
            parsed_ids.push(Uuid::parse_str(&raw)?);
        }
        Ok(Some(ProcessingEntry {
            provider_message_id: message_id,
            organization_id: organization_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()?,
            outcome: outcome
                .parse::<ProcessingOutcome>()
                .map_err(TaskStoreError::Storage)?,
            task_ids: parsed_ids,
            detail,
            processed_at: parse_datetime(&processed_at)?,
        }))
    }

    /// Next firing of a recurring reminder after the given instant.
    pub fn next_reminder_occurrence(
        expression: &str,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, TaskStoreError> {
        let schedule = cron::Schedule::from_str(expression)?;
        Ok(schedule.after(&after).next())
    }

    fn open(&self) -> Result<Connection, TaskStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(StdDuration::from_secs(5))?;
        conn.execute_batch(TASKS_SCHEMA)?;
        ensure_tasks_columns(&conn)?;
        ensure_processing_log_table(&conn)?;
        Ok(conn)
    }
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
