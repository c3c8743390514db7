use rusqlite::Connection;
use std::path::Path;

pub fn open_workspace(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("lectiond.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            duration_days INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_units(
            template_id TEXT NOT NULL,
            day_number INTEGER NOT NULL,
            start_book_id TEXT,
            start_book_name TEXT,
            end_book_id TEXT,
            end_book_name TEXT,
            portions TEXT NOT NULL,
            raw_reading TEXT,
            PRIMARY KEY(template_id, day_number),
            FOREIGN KEY(template_id) REFERENCES templates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_units_template ON template_units(template_id)",
        [],
    )?;

    // Individual schedules. The id is the deterministic composite
    // userId_templateId_startDate, which doubles as the duplicate-create guard.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            template_name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            duration_days INTEGER NOT NULL,
            current_day INTEGER NOT NULL DEFAULT 1,
            completed_days INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            task_verse_text INTEGER NOT NULL DEFAULT 1,
            task_footnotes INTEGER NOT NULL DEFAULT 0,
            task_partner INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_user ON schedules(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reading_groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            template_id TEXT NOT NULL,
            template_name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            duration_days INTEGER NOT NULL,
            current_day INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL,
            created_by TEXT NOT NULL,
            is_public INTEGER NOT NULL DEFAULT 1,
            max_members INTEGER,
            task_verse_text INTEGER NOT NULL DEFAULT 1,
            task_footnotes INTEGER NOT NULL DEFAULT 0,
            task_partner INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reading_groups_public ON reading_groups(is_public, status)",
        [],
    )?;

    // Memberships are never deleted; leave/rejoin flips status.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_name TEXT,
            email TEXT,
            role TEXT NOT NULL,
            status TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            left_at TEXT,
            rejoined_at TEXT,
            current_day INTEGER NOT NULL DEFAULT 1,
            completed_days INTEGER NOT NULL DEFAULT 0,
            last_active_at TEXT NOT NULL,
            PRIMARY KEY(group_id, user_id),
            FOREIGN KEY(group_id) REFERENCES reading_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_members_status ON group_members(group_id, status)",
        [],
    )?;

    // One dated entry per template unit, shared between individual and group
    // schedules via owner_kind ('individual' | 'group'). Immutable once written.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_entries(
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            day_number INTEGER NOT NULL,
            scheduled_date TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            start_book_id TEXT,
            start_book_name TEXT,
            end_book_id TEXT,
            end_book_name TEXT,
            portions TEXT NOT NULL,
            raw_reading TEXT,
            PRIMARY KEY(owner_kind, owner_id, day_number)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS progress_records(
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            day_number INTEGER NOT NULL,
            task_verse_text INTEGER,
            task_footnotes INTEGER,
            task_partner INTEGER,
            is_completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            notes TEXT,
            time_spent_minutes INTEGER,
            scheduled_date TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE(owner_kind, owner_id, user_id, day_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_progress_owner ON progress_records(owner_kind, owner_id, user_id)",
        [],
    )?;

    // Workspaces created before per-task tracking carry only is_completed.
    ensure_progress_task_columns(&conn)?;

    Ok(conn)
}

fn ensure_progress_task_columns(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "progress_records", "task_verse_text")? {
        return Ok(());
    }
    // Leave the new columns NULL on existing rows: a NULL task map is the
    // legacy record shape and scores exactly 1 point when is_completed is set.
    conn.execute(
        "ALTER TABLE progress_records ADD COLUMN task_verse_text INTEGER",
        [],
    )?;
    conn.execute(
        "ALTER TABLE progress_records ADD COLUMN task_footnotes INTEGER",
        [],
    )?;
    conn.execute(
        "ALTER TABLE progress_records ADD COLUMN task_partner INTEGER",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
