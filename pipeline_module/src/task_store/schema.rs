pub(super) const TASKS_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    priority TEXT NOT NULL DEFAULT 'medium',
    due_date TEXT,
    reminder_date TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    visibility TEXT NOT NULL,
    assigned_to TEXT,
    creator_id TEXT,
    channel TEXT NOT NULL DEFAULT 'email',
    thread_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS tasks_dedup_idx
    ON tasks(organization_id, title, created_at);
CREATE INDEX IF NOT EXISTS tasks_thread_idx
    ON tasks(organization_id, thread_id);

CREATE TABLE IF NOT EXISTS task_shared_with (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    member_id TEXT NOT NULL,
    UNIQUE(task_id, member_id)
);

CREATE TABLE IF NOT EXISTS task_reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    remind_at TEXT NOT NULL,
    recurrence TEXT,
    sent INTEGER NOT NULL DEFAULT 0
);
"#;
