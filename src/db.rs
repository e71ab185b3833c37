use chrono::{DateTime, FixedOffset};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "presensi.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Idempotent schema setup plus additive migrations for older workspaces.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_sha256 TEXT NOT NULL,
            name TEXT NOT NULL,
            nip TEXT,
            role TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;

    // Existing workspaces predate the department rollup. Add and leave blank.
    ensure_users_department(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT,
            homeroom_user_id TEXT,
            FOREIGN KEY(homeroom_user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            nis TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            weekday INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_user ON schedules(user_id, weekday)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            check_in_time TEXT NOT NULL,
            check_out_time TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            distance_meters REAL NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance_records(user_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance_records(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teaching_logs(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            topic TEXT NOT NULL,
            materials TEXT,
            homework TEXT,
            notes TEXT,
            total_students INTEGER NOT NULL,
            present_count INTEGER NOT NULL,
            sick_count INTEGER NOT NULL,
            permission_count INTEGER NOT NULL,
            absent_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    ensure_teaching_logs_homework(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teaching_logs_user_date ON teaching_logs(user_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teaching_logs_class ON teaching_logs(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            id TEXT PRIMARY KEY,
            teaching_log_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            arrival_time TEXT,
            notes TEXT,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(teaching_log_id) REFERENCES teaching_logs(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(teaching_log_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_log ON student_attendance(teaching_log_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_student ON student_attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_logs(
            id TEXT PRIMARY KEY,
            at TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_at ON audit_logs(at)",
        [],
    )?;

    Ok(())
}

fn ensure_users_department(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "department")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE users ADD COLUMN department TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn ensure_teaching_logs_homework(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "teaching_logs", "homework")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE teaching_logs ADD COLUMN homework TEXT", [])?;
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    use rusqlite::OptionalExtension;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Best-effort trail; a failed audit write must never fail the operation
/// it describes.
pub fn audit_append(
    conn: &Connection,
    at: DateTime<FixedOffset>,
    actor: &str,
    action: &str,
    details: serde_json::Value,
) {
    let _ = conn.execute(
        "INSERT INTO audit_logs(id, at, actor, action, details) VALUES(?, ?, ?, ?, ?)",
        (
            uuid::Uuid::new_v4().to_string(),
            at.to_rfc3339(),
            actor,
            action,
            details.to_string(),
        ),
    );
}
