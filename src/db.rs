use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, Row};

use crate::domain::dates::now_utc_rfc3339;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_store_schema_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule (
    id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity (
    schedule_id TEXT NOT NULL REFERENCES schedule(id) ON DELETE CASCADE,
    record_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    linked_document_id TEXT,
    parent_key TEXT,
    start_date TEXT,
    end_date TEXT,
    duration INTEGER,
    predecessors_json TEXT,
    position INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (schedule_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_activity_schedule_position ON activity(schedule_id, position);
CREATE INDEX IF NOT EXISTS idx_activity_linked_document ON activity(linked_document_id);
"#,
    },
    Migration {
        version: 2,
        name: "import_tracking_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS import_state (
    source_key TEXT PRIMARY KEY,
    schedule_id TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    last_run_at TEXT NOT NULL,
    last_status TEXT NOT NULL,
    processed_count INTEGER NOT NULL DEFAULT 0,
    imported_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);
"#,
    },
];

pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_for_speed(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub id: String,
    pub role: String,
    pub created_at: String,
}

pub fn insert_schedule(conn: &Connection, id: &str, role: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO schedule (id, role, created_at) VALUES (?1, ?2, ?3)",
        params![id, role, now_utc_rfc3339()],
    )?;
    Ok(inserted > 0)
}

pub fn get_schedule(conn: &Connection, id: &str) -> Result<Option<ScheduleRecord>> {
    conn.query_row(
        "SELECT id, role, created_at FROM schedule WHERE id = ?1",
        params![id],
        |row| {
            Ok(ScheduleRecord {
                id: row.get(0)?,
                role: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn list_schedules(conn: &Connection) -> Result<Vec<ScheduleRecord>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, role, created_at
FROM schedule
ORDER BY CASE role WHEN 'master' THEN 0 ELSE 1 END, created_at ASC, id ASC
"#,
    )?;

    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(ScheduleRecord {
            id: row.get(0)?,
            role: row.get(1)?,
            created_at: row.get(2)?,
        });
    }

    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    pub schedule_id: String,
    pub record_id: String,
    pub display_name: String,
    pub linked_document_id: Option<String>,
    pub parent_key: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration: Option<i64>,
    pub predecessors_json: Option<String>,
}

pub struct InsertActivity<'a> {
    pub schedule_id: &'a str,
    pub record_id: &'a str,
    pub display_name: &'a str,
    pub linked_document_id: Option<&'a str>,
    pub parent_key: Option<&'a str>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub duration: Option<i64>,
    pub predecessors_json: Option<&'a str>,
}

const ACTIVITY_COLUMNS: &str = "schedule_id, record_id, display_name, linked_document_id, \
     parent_key, start_date, end_date, duration, predecessors_json";

fn activity_from_row(row: &Row<'_>) -> Result<ActivityRecord> {
    Ok(ActivityRecord {
        schedule_id: row.get(0)?,
        record_id: row.get(1)?,
        display_name: row.get(2)?,
        linked_document_id: row.get(3)?,
        parent_key: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        duration: row.get(7)?,
        predecessors_json: row.get(8)?,
    })
}

pub fn insert_activity(conn: &Connection, args: &InsertActivity<'_>) -> Result<()> {
    let now = now_utc_rfc3339();
    conn.execute(
        r#"
INSERT INTO activity (
    schedule_id, record_id, display_name, linked_document_id, parent_key,
    start_date, end_date, duration, predecessors_json, position, created_at, updated_at
)
VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
    (SELECT COALESCE(MAX(position), -1) + 1 FROM activity WHERE schedule_id = ?1),
    ?10, ?10
)
"#,
        params![
            args.schedule_id,
            args.record_id,
            args.display_name,
            args.linked_document_id,
            args.parent_key,
            args.start_date,
            args.end_date,
            args.duration,
            args.predecessors_json,
            now
        ],
    )?;
    Ok(())
}

pub fn get_activity(
    conn: &Connection,
    schedule_id: &str,
    record_id: &str,
) -> Result<Option<ActivityRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM activity WHERE schedule_id = ?1 AND record_id = ?2",
            ACTIVITY_COLUMNS
        ),
        params![schedule_id, record_id],
        activity_from_row,
    )
    .optional()
}

pub fn activity_exists(conn: &Connection, schedule_id: &str, record_id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM activity WHERE schedule_id = ?1 AND record_id = ?2)",
        params![schedule_id, record_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Activities in insertion order, optionally restricted to one schedule.
pub fn list_activities(conn: &Connection, schedule_id: Option<&str>) -> Result<Vec<ActivityRecord>> {
    let sql = match schedule_id {
        Some(_) => format!(
            "SELECT {} FROM activity WHERE schedule_id = ?1 ORDER BY position ASC, record_id ASC",
            ACTIVITY_COLUMNS
        ),
        None => format!(
            "SELECT {} FROM activity ORDER BY schedule_id ASC, position ASC, record_id ASC",
            ACTIVITY_COLUMNS
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = match schedule_id {
        Some(schedule_id) => stmt.query(params![schedule_id])?,
        None => stmt.query([])?,
    };
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(activity_from_row(row)?);
    }
    Ok(result)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityUpdate<'a> {
    pub display_name: Option<&'a str>,
    pub linked_document_id: Option<Option<&'a str>>,
    pub parent_key: Option<Option<&'a str>>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub duration: Option<i64>,
    pub predecessors_json: Option<&'a str>,
}

/// Applies the set fields of `update`; returns false when the row is missing.
pub fn update_activity(
    conn: &Connection,
    schedule_id: &str,
    record_id: &str,
    update: &ActivityUpdate<'_>,
) -> Result<bool> {
    let changed = conn.execute(
        r#"
UPDATE activity SET
    display_name = COALESCE(?3, display_name),
    linked_document_id = CASE WHEN ?4 THEN ?5 ELSE linked_document_id END,
    parent_key = CASE WHEN ?6 THEN ?7 ELSE parent_key END,
    start_date = COALESCE(?8, start_date),
    end_date = COALESCE(?9, end_date),
    duration = COALESCE(?10, duration),
    predecessors_json = COALESCE(?11, predecessors_json),
    updated_at = ?12
WHERE schedule_id = ?1 AND record_id = ?2
"#,
        params![
            schedule_id,
            record_id,
            update.display_name,
            update.linked_document_id.is_some(),
            update.linked_document_id.flatten(),
            update.parent_key.is_some(),
            update.parent_key.flatten(),
            update.start_date,
            update.end_date,
            update.duration,
            update.predecessors_json,
            now_utc_rfc3339()
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_activity(conn: &Connection, schedule_id: &str, record_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM activity WHERE schedule_id = ?1 AND record_id = ?2",
        params![schedule_id, record_id],
    )?;
    Ok(deleted > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStateRecord {
    pub source_key: String,
    pub schedule_id: String,
    pub source_ref: String,
    pub last_run_at: String,
    pub last_status: String,
    pub processed_count: i64,
    pub imported_count: i64,
    pub skipped_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
}

pub fn upsert_import_state(conn: &Connection, record: &ImportStateRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO import_state (
    source_key, schedule_id, source_ref, last_run_at, last_status,
    processed_count, imported_count, skipped_count, error_count, last_error
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(source_key) DO UPDATE SET
    schedule_id = excluded.schedule_id,
    source_ref = excluded.source_ref,
    last_run_at = excluded.last_run_at,
    last_status = excluded.last_status,
    processed_count = excluded.processed_count,
    imported_count = excluded.imported_count,
    skipped_count = excluded.skipped_count,
    error_count = excluded.error_count,
    last_error = excluded.last_error
"#,
        params![
            record.source_key,
            record.schedule_id,
            record.source_ref,
            record.last_run_at,
            record.last_status,
            record.processed_count,
            record.imported_count,
            record.skipped_count,
            record.error_count,
            record.last_error
        ],
    )?;
    Ok(())
}

#[cfg(test)]
pub fn get_import_state(conn: &Connection, source_key: &str) -> Result<Option<ImportStateRecord>> {
    conn.query_row(
        r#"
SELECT source_key, schedule_id, source_ref, last_run_at, last_status,
       processed_count, imported_count, skipped_count, error_count, last_error
FROM import_state
WHERE source_key = ?1
"#,
        params![source_key],
        |row| {
            Ok(ImportStateRecord {
                source_key: row.get(0)?,
                schedule_id: row.get(1)?,
                source_ref: row.get(2)?,
                last_run_at: row.get(3)?,
                last_status: row.get(4)?,
                processed_count: row.get(5)?,
                imported_count: row.get(6)?,
                skipped_count: row.get(7)?,
                error_count: row.get(8)?,
                last_error: row.get(9)?,
            })
        },
    )
    .optional()
}
