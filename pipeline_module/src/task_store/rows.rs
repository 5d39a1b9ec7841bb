use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use extraction_module::drafts::Priority;

use crate::channel::Channel;
use crate::visibility::Visibility;

use super::{parse_datetime, TaskRecord, TaskReminder, TaskStatus, TaskStoreError};

pub(super) const TASK_COLUMNS: &str = "id, organization_id, title, description, priority, due_date, reminder_date, status, visibility, assigned_to, creator_id, channel, thread_id, metadata, created_at";

type TaskRowRaw = (
    String,         // id
    String,         // organization_id
    String,         // title
    String,         // description
    String,         // priority
    Option<String>, // due_date
    Option<String>, // reminder_date
    String,         // status
    String,         // visibility
    Option<String>, // assigned_to
    Option<String>, // creator_id
    String,         // channel
    Option<String>, // thread_id
    String,         // metadata
    String,         // created_at
);

pub(super) fn map_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRowRaw> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

pub(super) fn finish_task_row(raw: TaskRowRaw) -> Result<TaskRecord, TaskStoreError> {
    let (
        id,
        organization_id,
        title,
        description,
        priority,
        due_date,
        reminder_date,
        status,
        visibility,
        assigned_to,
        creator_id,
        channel,
        thread_id,
        metadata,
        created_at,
    ) = raw;
    Ok(TaskRecord {
        id: Uuid::parse_str(&id)?,
        organization_id: Uuid::parse_str(&organization_id)?,
        title,
        description,
        priority: priority.parse::<Priority>().unwrap_or_default(),
        due_date: parse_optional_date(due_date.as_deref())?,
        reminder_date: parse_optional_date(reminder_date.as_deref())?,
        status: status
            .parse::<TaskStatus>()
            .map_err(TaskStoreError::Storage)?,
        visibility: visibility
            .parse::<Visibility>()
            .map_err(TaskStoreError::Storage)?,
        assigned_to: parse_optional_uuid(assigned_to.as_deref())?,
        creator_id: parse_optional_uuid(creator_id.as_deref())?,
        channel: channel.parse::<Channel>().unwrap_or_default(),
        thread_id,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&created_at)?,
        shared_with: Vec::new(),
        reminders: Vec::new(),
    })
}

pub(super) fn load_shared_with(
    conn: &Connection,
    task_id: &str,
) -> Result<Vec<Uuid>, TaskStoreError> {
    let mut stmt = conn.prepare(
        "SELECT member_id FROM task_shared_with WHERE task_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    let mut members = Vec::new();
    for row in rows {
        members.push(Uuid::parse_str(&row?)?);
    }
    Ok(members)
}

pub(super) fn load_reminders(
    conn: &Connection,
    task_id: &str,
) -> Result<Vec<TaskReminder>, TaskStoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, remind_at, recurrence, sent FROM task_reminders WHERE task_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![task_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    let mut reminders = Vec::new();
    for row in rows {
        let (id, remind_at, recurrence, sent) = row?;
        reminders.push(TaskReminder {
            id,
            task_id: Uuid::parse_str(task_id)?,
            remind_at: parse_datetime(&remind_at)?,
            recurrence,
            sent: sent != 0,
        });
    }
    Ok(reminders)
}

pub(super) fn format_optional_date(value: Option<NaiveDate>) -> Option<String> {
    value.map(|date| date.format("%Y-%m-%d").to_string())
}

pub(super) fn parse_optional_date(
    value: Option<&str>,
) -> Result<Option<NaiveDate>, TaskStoreError> {
    value
        .map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .transpose()
        .map_err(TaskStoreError::from)
}

pub(super) fn parse_optional_uuid(value: Option<&str>) -> Result<Option<Uuid>, TaskStoreError> {
    value.map(Uuid::parse_str).transpose().map_err(TaskStoreError::from)
}
