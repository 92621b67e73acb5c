use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{types::Type, Connection};

use crate::error::{Result, SchedulerError};

/// One SQLite connection shared by the schedule store and the template store.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Initialise the export schema in `conn`.
///
/// Creates the `report_templates`, `export_definitions` and `export_runs`
/// tables (idempotent) plus the index the due-query polls.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS report_templates (
            id           TEXT    NOT NULL PRIMARY KEY,
            name         TEXT    NOT NULL,
            report_type  TEXT    NOT NULL,
            format       TEXT    NOT NULL,
            sections     TEXT    NOT NULL DEFAULT '[]',  -- JSON array of section ids
            is_default   INTEGER NOT NULL DEFAULT 0,
            usage_count  INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS export_definitions (
            id                    TEXT    NOT NULL PRIMARY KEY,
            name                  TEXT    NOT NULL,
            report_type           TEXT    NOT NULL,
            frequency             TEXT    NOT NULL,
            format                TEXT    NOT NULL,
            destination           TEXT    NOT NULL,
            recipients            TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            template_id           TEXT,
            is_active             INTEGER NOT NULL DEFAULT 1,
            last_run              TEXT,
            next_run              TEXT    NOT NULL,
            run_count             INTEGER NOT NULL DEFAULT 0,
            consecutive_failures  INTEGER NOT NULL DEFAULT 0,
            last_error            TEXT,
            created_at            TEXT    NOT NULL,
            updated_at            TEXT    NOT NULL
        ) STRICT;

        -- Tick polling: SELECT … WHERE is_active = 1 AND next_run <= ? ORDER BY next_run
        CREATE INDEX IF NOT EXISTS idx_export_definitions_due
            ON export_definitions (is_active, next_run);

        CREATE TABLE IF NOT EXISTS export_runs (
            id               TEXT    NOT NULL PRIMARY KEY,
            definition_id    TEXT    NOT NULL,
            trigger_at       TEXT    NOT NULL,
            finished_at      TEXT,
            status           TEXT    NOT NULL DEFAULT 'running',
            error            TEXT,
            delivery         TEXT,
            artifact_size    INTEGER,
            artifact_sha256  TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_export_runs_definition
            ON export_runs (definition_id, trigger_at);
        ",
    )?;
    Ok(())
}

/// Initialise the schema and wrap `conn` for sharing between stores.
pub fn open_shared(conn: Connection) -> Result<SharedConnection> {
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| SchedulerError::Internal("database mutex poisoned".to_string()))
}

/// Fixed-width RFC 3339 (`2025-02-15T00:00:00.000000Z`) so lexical order in
/// SQL equals chronological order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `dt` at the precision [`ts`] persists, so values handed back by a
/// mutation equal what the next read returns.
pub fn stored(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a TEXT column holding a `Display`-encoded enum.
pub(crate) fn parse_col<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
