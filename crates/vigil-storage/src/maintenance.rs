use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{from_millis, to_millis, Result, Store};

/// A persisted fixed maintenance window. `monitor_id = None` means global:
/// the window applies to every monitor. Recurring daily windows are not
/// persisted; they live in the maintenance oracle's in-memory map.
#[derive(Debug, Clone)]
pub struct FixedWindowRow {
    pub id: i64,
    pub monitor_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub description: Option<String>,
}

/// A fixed window to persist.
#[derive(Debug, Clone)]
pub struct NewFixedWindow {
    pub monitor_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub description: Option<String>,
}

impl Store {
    /// Replaces the fixed windows of one monitor wholesale (reload path).
    /// Runs inside its own transaction; `sync_monitors` performs the same
    /// work inline in the reload transaction.
    pub fn replace_fixed_windows(
        &self,
        monitor_id: Option<i64>,
        windows: &[NewFixedWindow],
    ) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        replace_fixed_windows_tx(&tx, monitor_id, windows)?;
        tx.commit()?;
        Ok(())
    }

    /// The first fixed window covering `now` for this monitor, with global
    /// windows (null monitor_id) applying to all monitors.
    pub fn active_fixed_window(
        &self,
        monitor_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<FixedWindowRow>> {
        let now = to_millis(now);
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, monitor_id, start_time, end_time, timezone, description
             FROM maintenance_windows
             WHERE start_time <= ?1 AND ?1 <= end_time
               AND (monitor_id = ?2 OR monitor_id IS NULL)
             ORDER BY start_time ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![now, monitor_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        match rows.next() {
            Some(raw) => {
                let (id, monitor_id, start, end, timezone, description) = raw?;
                Ok(Some(FixedWindowRow {
                    id,
                    monitor_id,
                    start_time: from_millis(start, "start_time")?,
                    end_time: from_millis(end, "end_time")?,
                    timezone,
                    description,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Shared by `replace_fixed_windows` and the reload transaction. Upserts on
/// `(monitor_id, start_time)` and removes rows absent from the new set.
pub(crate) fn replace_fixed_windows_tx(
    conn: &rusqlite::Connection,
    monitor_id: Option<i64>,
    windows: &[NewFixedWindow],
) -> Result<()> {
    match monitor_id {
        Some(id) => {
            conn.execute(
                "DELETE FROM maintenance_windows WHERE monitor_id = ?1",
                params![id],
            )?;
        }
        None => {
            conn.execute("DELETE FROM maintenance_windows WHERE monitor_id IS NULL", [])?;
        }
    }
    let mut insert = conn.prepare_cached(
        "INSERT INTO maintenance_windows
             (monitor_id, start_time, end_time, timezone, description)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (monitor_id, start_time) DO UPDATE SET
             end_time = excluded.end_time,
             timezone = excluded.timezone,
             description = excluded.description",
    )?;
    for window in windows {
        insert.execute(params![
            window.monitor_id,
            to_millis(window.start_time),
            to_millis(window.end_time),
            window.timezone,
            window.description,
        ])?;
    }
    Ok(())
}
