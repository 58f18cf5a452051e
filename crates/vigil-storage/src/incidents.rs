use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use vigil_common::{IncidentStatus, Severity};

use crate::{from_millis, parse_column, to_millis, Result, Store};

/// A persisted incident. Active iff `resolved_at` is null; the partial
/// unique index `idx_incidents_one_active` guarantees at most one active
/// incident per monitor.
#[derive(Debug, Clone)]
pub struct IncidentRow {
    pub id: i64,
    pub monitor_id: i64,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewIncident {
    pub monitor_id: i64,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
}

const INCIDENT_COLUMNS: &str =
    "id, monitor_id, status, severity, title, description, started_at, resolved_at";

type RawIncident = (
    i64,
    i64,
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
);

fn row_to_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawIncident> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn materialize(raw: RawIncident) -> Result<IncidentRow> {
    let (id, monitor_id, status, severity, title, description, started_at, resolved_at) = raw;
    Ok(IncidentRow {
        id,
        monitor_id,
        status: parse_column(&status, "status")?,
        severity: parse_column(&severity, "severity")?,
        title,
        description,
        started_at: from_millis(started_at, "started_at")?,
        resolved_at: resolved_at
            .map(|millis| from_millis(millis, "resolved_at"))
            .transpose()?,
    })
}

impl Store {
    /// The currently active incident for a monitor, if any.
    pub fn active_incident(&self, monitor_id: i64) -> Result<Option<IncidentRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE monitor_id = ?1 AND resolved_at IS NULL"
        ))?;
        let mut rows = stmt.query_map(params![monitor_id], row_to_incident)?;
        match rows.next() {
            Some(raw) => Ok(Some(materialize(raw?)?)),
            None => Ok(None),
        }
    }

    /// Opens a new incident unless the monitor already has an active one.
    ///
    /// The insert is conditional (`WHERE NOT EXISTS`) and backed by the
    /// partial unique index, so two workers racing on the same monitor
    /// cannot both open: the loser either inserts nothing or trips the
    /// constraint, and both cases report `None`.
    pub fn open_incident(&self, incident: &NewIncident) -> Result<Option<IncidentRow>> {
        let conn = self.lock();
        let outcome = conn
            .prepare_cached(
                "INSERT INTO incidents
                     (monitor_id, status, severity, title, description, started_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6
                 WHERE NOT EXISTS (
                     SELECT 1 FROM incidents
                     WHERE monitor_id = ?1 AND resolved_at IS NULL
                 )",
            )?
            .execute(params![
                incident.monitor_id,
                IncidentStatus::Investigating.to_string(),
                incident.severity.to_string(),
                incident.title,
                incident.description,
                to_millis(incident.started_at),
            ]);

        let inserted = match outcome {
            Ok(count) => count,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        if inserted == 0 {
            return Ok(None);
        }

        let id = conn.last_insert_rowid();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"
        ))?;
        let raw = stmt.query_row(params![id], row_to_incident)?;
        Ok(Some(materialize(raw)?))
    }

    /// Resolves an incident. Returns false when it was already resolved or
    /// does not exist.
    pub fn resolve_incident(&self, incident_id: i64, resolved_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let updated = conn
            .prepare_cached(
                "UPDATE incidents SET status = ?1, resolved_at = ?2
                 WHERE id = ?3 AND resolved_at IS NULL",
            )?
            .execute(params![
                IncidentStatus::Resolved.to_string(),
                to_millis(resolved_at),
                incident_id,
            ])?;
        Ok(updated > 0)
    }

    /// Incident history for a monitor, newest first.
    pub fn incidents_for_monitor(&self, monitor_id: i64, limit: usize) -> Result<Vec<IncidentRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE monitor_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![monitor_id, limit as i64], row_to_incident)?;
        rows.map(|raw| materialize(raw?)).collect()
    }

    /// Count of active incidents for a monitor. The one-active invariant
    /// keeps this at 0 or 1; exposed for invariant checks.
    pub fn count_active_incidents(&self, monitor_id: i64) -> Result<i64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM incidents WHERE monitor_id = ?1 AND resolved_at IS NULL",
        )?;
        Ok(stmt.query_row(params![monitor_id], |row| row.get(0))?)
    }

    /// Retention for resolved incidents past the archive horizon.
    pub fn delete_incidents_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = to_millis(Utc::now() - Duration::days(days));
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "DELETE FROM incidents WHERE resolved_at IS NOT NULL AND started_at < ?1",
        )?;
        Ok(stmt.execute(params![cutoff])?)
    }
}
