use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use std::collections::HashMap;
use vigil_common::CheckStatus;

use crate::{from_millis, parse_column, to_millis, Result, Store};

/// A check row to append.
#[derive(Debug, Clone)]
pub struct NewCheck {
    pub monitor_id: i64,
    pub status: CheckStatus,
    pub response_time_ms: i64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// A persisted check row.
#[derive(Debug, Clone)]
pub struct CheckRow {
    pub id: i64,
    pub monitor_id: i64,
    pub status: CheckStatus,
    pub response_time_ms: i64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

/// One bucket of the response-time history (successful checks only).
#[derive(Debug, Clone)]
pub struct ResponseTimeBucket {
    pub bucket: String,
    pub avg_ms: f64,
    pub min_ms: i64,
    pub max_ms: i64,
}

const CHECK_COLUMNS: &str = "id, monitor_id, status, response_time_ms, error, checked_at";

fn row_to_check(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, String, i64, Option<String>, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn materialize(raw: (i64, i64, String, i64, Option<String>, i64)) -> Result<CheckRow> {
    let (id, monitor_id, status, response_time_ms, error, checked_at) = raw;
    Ok(CheckRow {
        id,
        monitor_id,
        status: parse_column(&status, "status")?,
        response_time_ms,
        error,
        checked_at: from_millis(checked_at, "checked_at")?,
    })
}

impl Store {
    /// Appends one check row and returns its id.
    pub fn save_check(&self, check: &NewCheck) -> Result<i64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO checks (monitor_id, status, response_time_ms, error, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            check.monitor_id,
            check.status.to_string(),
            check.response_time_ms,
            check.error,
            to_millis(check.checked_at),
        ])?;
        Ok(conn.last_insert_rowid())
    }

    /// The `n` most recent checks for a monitor, newest first.
    pub fn recent_checks(&self, monitor_id: i64, n: usize) -> Result<Vec<CheckRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CHECK_COLUMNS} FROM checks
             WHERE monitor_id = ?1
             ORDER BY checked_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![monitor_id, n as i64], row_to_check)?;
        rows.map(|raw| materialize(raw?)).collect()
    }

    /// The newest check for a monitor, if any.
    pub fn latest_check(&self, monitor_id: i64) -> Result<Option<CheckRow>> {
        Ok(self.recent_checks(monitor_id, 1)?.into_iter().next())
    }

    /// Newest check per monitor for a list of monitors, keyed by monitor id.
    /// One round-trip instead of N.
    pub fn latest_checks_bulk(&self, monitor_ids: &[i64]) -> Result<HashMap<i64, CheckRow>> {
        if monitor_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.lock();
        let placeholders = vec!["?"; monitor_ids.len()].join(", ");
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM checks c
             WHERE c.monitor_id IN ({placeholders})
               AND c.id = (SELECT c2.id FROM checks c2
                           WHERE c2.monitor_id = c.monitor_id
                           ORDER BY c2.checked_at DESC, c2.id DESC LIMIT 1)"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(monitor_ids), row_to_check)?;
        let mut result = HashMap::new();
        for raw in rows {
            let row = materialize(raw?)?;
            result.insert(row.monitor_id, row);
        }
        Ok(result)
    }

    /// Uptime percentage over the trailing window; 100 when there are no
    /// checks.
    pub fn uptime_pct(&self, monitor_id: i64, days: i64) -> Result<f64> {
        let since = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*), COALESCE(SUM(status = 'up'), 0) FROM checks
             WHERE monitor_id = ?1 AND checked_at >= ?2",
        )?;
        let (total, up): (i64, i64) =
            stmt.query_row(params![monitor_id, since], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        if total == 0 {
            return Ok(100.0);
        }
        Ok(up as f64 / total as f64 * 100.0)
    }

    /// Uptime percentage per monitor over the trailing window. Monitors with
    /// no checks report 100.
    pub fn uptime_pct_bulk(&self, monitor_ids: &[i64], days: i64) -> Result<HashMap<i64, f64>> {
        let mut result: HashMap<i64, f64> =
            monitor_ids.iter().map(|id| (*id, 100.0)).collect();
        if monitor_ids.is_empty() {
            return Ok(result);
        }
        let since = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let placeholders = vec!["?"; monitor_ids.len()].join(", ");
        let sql = format!(
            "SELECT monitor_id, COUNT(*), COALESCE(SUM(status = 'up'), 0) FROM checks
             WHERE monitor_id IN ({placeholders}) AND checked_at >= ?
             GROUP BY monitor_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound = rusqlite::params_from_iter(
            monitor_ids
                .iter()
                .copied()
                .chain(std::iter::once(since)),
        );
        let rows = stmt.query_map(bound, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (monitor_id, total, up) = row?;
            if total > 0 {
                result.insert(monitor_id, up as f64 / total as f64 * 100.0);
            }
        }
        Ok(result)
    }

    /// Mean response time over successful checks in the trailing window.
    pub fn avg_response_time(&self, monitor_id: i64, days: i64) -> Result<Option<f64>> {
        let since = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT AVG(response_time_ms) FROM checks
             WHERE monitor_id = ?1 AND checked_at >= ?2 AND status = 'up'",
        )?;
        Ok(stmt.query_row(params![monitor_id, since], |row| row.get(0))?)
    }

    /// Bucketed avg/min/max response times over successful checks.
    pub fn response_time_history(
        &self,
        monitor_id: i64,
        days: i64,
        granularity: Granularity,
    ) -> Result<Vec<ResponseTimeBucket>> {
        let format = match granularity {
            Granularity::Hour => "%Y-%m-%dT%H:00",
            Granularity::Day => "%Y-%m-%d",
        };
        let since = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT strftime(?1, checked_at / 1000, 'unixepoch') AS bucket,
                    AVG(response_time_ms), MIN(response_time_ms), MAX(response_time_ms)
             FROM checks
             WHERE monitor_id = ?2 AND checked_at >= ?3 AND status = 'up'
             GROUP BY bucket ORDER BY bucket",
        )?;
        let rows = stmt.query_map(params![format, monitor_id, since], |row| {
            Ok(ResponseTimeBucket {
                bucket: row.get(0)?,
                avg_ms: row.get(1)?,
                min_ms: row.get(2)?,
                max_ms: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Counts adjacent up/down flips within the trailing window, used by
    /// flapping detection.
    pub fn state_transitions_in_window(&self, monitor_id: i64, minutes: i64) -> Result<u32> {
        let since = to_millis(Utc::now() - Duration::minutes(minutes));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT status FROM checks
             WHERE monitor_id = ?1 AND checked_at >= ?2
             ORDER BY checked_at ASC, id ASC",
        )?;
        let statuses = stmt
            .query_map(params![monitor_id, since], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(count_transitions(&statuses))
    }

    /// Retention: deletes check rows older than `days`. Returns the number
    /// of deleted rows.
    pub fn delete_checks_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM checks WHERE checked_at < ?1")?;
        Ok(stmt.execute(params![cutoff])?)
    }
}

pub(crate) fn count_transitions(statuses: &[String]) -> u32 {
    statuses
        .windows(2)
        .filter(|pair| pair[0] != pair[1])
        .count() as u32
}
