//! Relational store for monitors, check rows, incidents, maintenance windows
//! and per-day status history. A single SQLite database in WAL mode behind a
//! poison-recovering mutex; check rows are append-only and every aggregate
//! query filters on the `(monitor_id, checked_at)` composite index.

pub mod checks;
pub mod error;
pub mod history;
pub mod incidents;
pub mod maintenance;
pub mod monitors;

#[cfg(test)]
mod tests;

pub use checks::{CheckRow, Granularity, NewCheck, ResponseTimeBucket};
pub use error::{Result, StorageError};
pub use history::DaySummary;
pub use incidents::{IncidentRow, NewIncident};
pub use maintenance::{FixedWindowRow, NewFixedWindow};
pub use monitors::MonitorRow;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS monitors (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    grp TEXT,
    monitor_type TEXT NOT NULL,
    url TEXT NOT NULL,
    interval_seconds INTEGER NOT NULL,
    public INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS checks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    checked_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checks_monitor_time
    ON checks(monitor_id, checked_at);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'investigating',
    severity TEXT NOT NULL DEFAULT 'minor',
    title TEXT NOT NULL,
    description TEXT,
    started_at INTEGER NOT NULL,
    resolved_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_incidents_monitor ON incidents(monitor_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_one_active
    ON incidents(monitor_id) WHERE resolved_at IS NULL;

CREATE TABLE IF NOT EXISTS maintenance_windows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    monitor_id INTEGER,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_maintenance_span
    ON maintenance_windows(start_time, end_time);
CREATE UNIQUE INDEX IF NOT EXISTS idx_maintenance_monitor_start
    ON maintenance_windows(monitor_id, start_time);

CREATE TABLE IF NOT EXISTS status_history (
    monitor_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    uptime_pct REAL NOT NULL,
    avg_response_time_ms INTEGER NOT NULL,
    total_checks INTEGER NOT NULL,
    successful_checks INTEGER NOT NULL,
    PRIMARY KEY (monitor_id, date)
);
";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema. WAL mode keeps readers unblocked while workers append.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks the connection, recovering from a poisoned mutex if a panicking
    /// worker died while holding it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering store connection from poisoned mutex");
            poisoned.into_inner()
        })
    }
}

pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64, column: &'static str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StorageError::InvalidColumn {
        column,
        detail: format!("timestamp out of range: {millis}"),
    })
}

pub(crate) fn parse_column<T>(raw: &str, column: &'static str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|detail| StorageError::InvalidColumn { column, detail })
}
