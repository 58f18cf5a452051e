use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rusqlite::params;

use crate::{to_millis, Result, Store, StorageError};

/// One `(monitor, day)` uptime summary row. Days are UTC dates.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub monitor_id: i64,
    pub date: NaiveDate,
    pub uptime_pct: f64,
    pub avg_response_time_ms: i64,
    pub total_checks: i64,
    pub successful_checks: i64,
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn day_bounds_millis(date: NaiveDate) -> (i64, i64) {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
    let end = start + Duration::days(1);
    (to_millis(start), to_millis(end))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| StorageError::InvalidColumn {
        column: "date",
        detail: e.to_string(),
    })
}

impl Store {
    /// Inserts or overwrites the summary row for `(monitor, day)`.
    pub fn upsert_day_summary(&self, summary: &DaySummary) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO status_history
                 (monitor_id, date, uptime_pct, avg_response_time_ms,
                  total_checks, successful_checks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (monitor_id, date) DO UPDATE SET
                 uptime_pct = excluded.uptime_pct,
                 avg_response_time_ms = excluded.avg_response_time_ms,
                 total_checks = excluded.total_checks,
                 successful_checks = excluded.successful_checks",
        )?;
        stmt.execute(params![
            summary.monitor_id,
            summary.date.format(DATE_FORMAT).to_string(),
            summary.uptime_pct,
            summary.avg_response_time_ms,
            summary.total_checks,
            summary.successful_checks,
        ])?;
        Ok(())
    }

    /// Aggregates one day's check rows into a summary. `None` when the
    /// monitor has no checks that day. Deterministic for a fixed set of
    /// rows, so re-running it is idempotent.
    pub fn aggregate_day(&self, monitor_id: i64, date: NaiveDate) -> Result<Option<DaySummary>> {
        let (start, end) = day_bounds_millis(date);
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'up'), 0),
                    AVG(CASE WHEN status = 'up' THEN response_time_ms END)
             FROM checks
             WHERE monitor_id = ?1 AND checked_at >= ?2 AND checked_at < ?3",
        )?;
        let (total, up, avg): (i64, i64, Option<f64>) =
            stmt.query_row(params![monitor_id, start, end], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        if total == 0 {
            return Ok(None);
        }
        Ok(Some(DaySummary {
            monitor_id,
            date,
            uptime_pct: up as f64 / total as f64 * 100.0,
            avg_response_time_ms: avg.map(|v| v.round() as i64).unwrap_or(0),
            total_checks: total,
            successful_checks: up,
        }))
    }

    /// Stored summary for one `(monitor, day)`.
    pub fn day_summary(&self, monitor_id: i64, date: NaiveDate) -> Result<Option<DaySummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT date, uptime_pct, avg_response_time_ms, total_checks, successful_checks
             FROM status_history WHERE monitor_id = ?1 AND date = ?2",
        )?;
        let mut rows = stmt.query_map(
            params![monitor_id, date.format(DATE_FORMAT).to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;
        match rows.next() {
            Some(raw) => {
                let (date_str, uptime_pct, avg, total, up) = raw?;
                Ok(Some(DaySummary {
                    monitor_id,
                    date: parse_date(&date_str)?,
                    uptime_pct,
                    avg_response_time_ms: avg,
                    total_checks: total,
                    successful_checks: up,
                }))
            }
            None => Ok(None),
        }
    }

    /// Stored summaries for the trailing `days`, oldest first.
    pub fn day_summaries(&self, monitor_id: i64, days: i64) -> Result<Vec<DaySummary>> {
        let since = (Utc::now().date_naive() - Duration::days(days))
            .format(DATE_FORMAT)
            .to_string();
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT date, uptime_pct, avg_response_time_ms, total_checks, successful_checks
             FROM status_history
             WHERE monitor_id = ?1 AND date >= ?2
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(params![monitor_id, since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut result = Vec::new();
        for raw in rows {
            let (date_str, uptime_pct, avg, total, up) = raw?;
            result.push(DaySummary {
                monitor_id,
                date: parse_date(&date_str)?,
                uptime_pct,
                avg_response_time_ms: avg,
                total_checks: total,
                successful_checks: up,
            });
        }
        Ok(result)
    }

    /// Whether a summary row exists for `(monitor, day)`.
    pub fn has_day_summary(&self, monitor_id: i64, date: NaiveDate) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM status_history WHERE monitor_id = ?1 AND date = ?2",
        )?;
        let found = stmt
            .query_map(
                params![monitor_id, date.format(DATE_FORMAT).to_string()],
                |_| Ok(()),
            )?
            .next()
            .is_some();
        Ok(found)
    }

    /// Distinct `(monitor, day)` pairs with check rows in the trailing
    /// window. Drives startup backfill.
    pub fn days_with_checks(&self, days_back: i64) -> Result<Vec<(i64, NaiveDate)>> {
        let since = to_millis(Utc::now() - Duration::days(days_back));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT monitor_id,
                    strftime('%Y-%m-%d', checked_at / 1000, 'unixepoch') AS day
             FROM checks WHERE checked_at >= ?1
             ORDER BY monitor_id, day",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut result = Vec::new();
        for raw in rows {
            let (monitor_id, date_str) = raw?;
            result.push((monitor_id, parse_date(&date_str)?));
        }
        Ok(result)
    }

    /// Monitors with at least one check on the given day.
    pub fn monitors_with_checks_on(&self, date: NaiveDate) -> Result<Vec<i64>> {
        let (start, end) = day_bounds_millis(date);
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT monitor_id FROM checks
             WHERE checked_at >= ?1 AND checked_at < ?2 ORDER BY monitor_id",
        )?;
        let rows = stmt.query_map(params![start, end], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Retention for summary rows past the archive horizon.
    pub fn delete_history_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now().date_naive() - Duration::days(days))
            .format(DATE_FORMAT)
            .to_string();
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM status_history WHERE date < ?1")?;
        Ok(stmt.execute(params![cutoff])?)
    }
}
