use std::collections::HashSet;

use rusqlite::Connection;

use super::TaskStoreError;

pub(super) fn ensure_tasks_columns(conn: &Connection) -> Result<(), TaskStoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(tasks)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }

    if !columns.contains("reminder_date") {
        conn.execute("ALTER TABLE tasks ADD COLUMN reminder_date TEXT", [])?;
    }
    if !columns.contains("thread_id") {
        conn.execute("ALTER TABLE tasks ADD COLUMN thread_id TEXT", [])?;
    }
    if !columns.contains("metadata") {
        conn.execute(
            "ALTER TABLE tasks ADD COLUMN metadata TEXT NOT NULL DEFAULT '{}'",
            [],
        )?;
    }
    Ok(())
}

pub(super) fn ensure_processing_log_table(conn: &Connection) -> Result<(), TaskStoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processing_log (
            provider_message_id TEXT PRIMARY KEY,
            organization_id TEXT,
            outcome TEXT NOT NULL,
            task_ids TEXT NOT NULL DEFAULT '[]',
            detail TEXT,
            processed_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}
