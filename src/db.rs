use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE_NAME: &str = "examsync.sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = connect(&db_path(workspace))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Opens an extra connection to an existing workspace database (background
/// aggregation, concurrent importers). The schema is assumed to exist.
pub fn connect(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> anyhow::Result<()> {
    // Concurrent importers share the file; writers queue on the busy handler.
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            test_date TEXT NOT NULL,
            max_marks INTEGER NOT NULL DEFAULT 300,
            created_at TEXT,
            UNIQUE(name, test_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roll_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            batch TEXT NOT NULL DEFAULT '',
            parent_name TEXT,
            parent_occupation TEXT,
            address TEXT,
            contact_number TEXT,
            general_remark TEXT,
            source_type TEXT NOT NULL DEFAULT 'import',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_students_source_type(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            correct INTEGER NOT NULL DEFAULT 0,
            wrong INTEGER NOT NULL DEFAULT 0,
            unattempted INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0,
            percentage REAL NOT NULL DEFAULT 0,
            rank INTEGER,
            remarks TEXT NOT NULL DEFAULT '',
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(test_id) REFERENCES tests(id),
            UNIQUE(student_id, test_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_test ON results(test_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_subjects(
            result_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            right_count INTEGER NOT NULL DEFAULT 0,
            wrong_count INTEGER NOT NULL DEFAULT 0,
            unattempted_count INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0,
            unattempted_questions TEXT NOT NULL DEFAULT '[]',
            negative_questions TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY(result_id, subject),
            FOREIGN KEY(result_id) REFERENCES results(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS syllabus_topics(
            subject TEXT NOT NULL,
            topic_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(subject, topic_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS syllabus_subtopics(
            subject TEXT NOT NULL,
            topic_name TEXT NOT NULL,
            subtopic_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(subject, topic_name, subtopic_name),
            FOREIGN KEY(subject, topic_name) REFERENCES syllabus_topics(subject, topic_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topic_status(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            topic_name TEXT NOT NULL,
            subtopic_name TEXT NOT NULL,
            negative_count INTEGER NOT NULL DEFAULT 0,
            unattempted_count INTEGER NOT NULL DEFAULT 0,
            is_completed INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(student_id, subject, topic_name, subtopic_name),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topic_status_student ON topic_status(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_sha256 TEXT NOT NULL,
            test_id TEXT,
            processed INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            students_created INTEGER NOT NULL,
            students_updated INTEGER NOT NULL,
            results_created INTEGER NOT NULL,
            results_updated INTEGER NOT NULL,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_runs_sha ON import_runs(file_sha256)",
        [],
    )?;

    Ok(())
}

fn ensure_students_source_type(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before manual student entry existed lack source_type.
    if table_has_column(conn, "students", "source_type")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN source_type TEXT NOT NULL DEFAULT 'import'",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// True when the statement failed on a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
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
