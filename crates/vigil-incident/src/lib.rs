//! Incident detection: turns the per-monitor stream of check results into
//! open/resolve incident transitions with threshold hysteresis and
//! maintenance suppression. State lives in the incident table; each call is
//! stateless, and the one-active-incident invariant is enforced by the
//! store's conditional insert.

pub mod flapping;
pub mod maintenance;

#[cfg(test)]
mod tests;

pub use flapping::{flapping_status, FlappingStatus};
pub use maintenance::{DailyWindow, MaintenanceOracle, MaintenanceStatus};

use std::sync::Arc;
use tokio::sync::broadcast;
use vigil_common::{
    CheckResult, CheckStatus, IncidentEvent, IncidentEventKind, Severity,
};
use vigil_storage::{NewCheck, NewIncident, Result, Store};

/// Consecutive failing checks required before an incident opens.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 2;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct IncidentDetector {
    store: Arc<Store>,
    oracle: Arc<MaintenanceOracle>,
    failure_threshold: usize,
    events: broadcast::Sender<IncidentEvent>,
}

impl IncidentDetector {
    pub fn new(store: Arc<Store>, oracle: Arc<MaintenanceOracle>, failure_threshold: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            oracle,
            failure_threshold: failure_threshold.max(1),
            events,
        }
    }

    /// Lifecycle events (opened/resolved) for an external notifier.
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.events.subscribe()
    }

    /// Processes one check result: persists the check row, then updates
    /// incident state unless the monitor is in maintenance.
    pub fn process(&self, result: &CheckResult) -> Result<()> {
        let status = if result.success {
            CheckStatus::Up
        } else {
            CheckStatus::Down
        };
        self.store.save_check(&NewCheck {
            monitor_id: result.monitor_id,
            status,
            response_time_ms: result.response_time_ms as i64,
            error: result.error.clone(),
            checked_at: result.timestamp,
        })?;

        let maintenance = self
            .oracle
            .in_maintenance(result.monitor_id, result.timestamp)?;
        if maintenance.in_maintenance {
            tracing::debug!(
                monitor_id = result.monitor_id,
                ends_at = ?maintenance.ends_at,
                "check processed during maintenance, incident state untouched"
            );
            return Ok(());
        }

        let active = self.store.active_incident(result.monitor_id)?;

        if result.success {
            if let Some(incident) = active {
                self.store.resolve_incident(incident.id, result.timestamp)?;
                tracing::info!(
                    monitor_id = result.monitor_id,
                    incident_id = incident.id,
                    "incident resolved"
                );
                self.emit(IncidentEvent {
                    kind: IncidentEventKind::Resolved,
                    monitor_id: result.monitor_id,
                    incident_id: incident.id,
                    timestamp: result.timestamp,
                    severity: Some(incident.severity),
                    title: Some(incident.title),
                });
            }
            return Ok(());
        }

        if active.is_some() {
            // Already open; nothing to do.
            return Ok(());
        }

        let recent = self
            .store
            .recent_checks(result.monitor_id, self.failure_threshold)?;
        let consecutive_failures = recent
            .iter()
            .take_while(|check| check.status == CheckStatus::Down)
            .count();
        if consecutive_failures < self.failure_threshold {
            return Ok(());
        }

        let severity = severity_for(result.error.as_deref());
        let opened = self.store.open_incident(&NewIncident {
            monitor_id: result.monitor_id,
            severity,
            title: format!("{} is down", result.monitor_name),
            description: result.error.clone(),
            started_at: result.timestamp,
        })?;
        // None means another worker won the race; the invariant holds either
        // way and the open event belongs to the winner.
        if let Some(incident) = opened {
            tracing::warn!(
                monitor_id = result.monitor_id,
                incident_id = incident.id,
                severity = %incident.severity,
                "incident opened"
            );
            self.emit(IncidentEvent {
                kind: IncidentEventKind::Opened,
                monitor_id: result.monitor_id,
                incident_id: incident.id,
                timestamp: result.timestamp,
                severity: Some(incident.severity),
                title: Some(incident.title),
            });
        }
        Ok(())
    }

    fn emit(&self, event: IncidentEvent) {
        // No receivers is fine; events are best-effort in-process signals.
        let _ = self.events.send(event);
    }
}

/// Severity derived from the failing check's error text.
pub fn severity_for(error: Option<&str>) -> Severity {
    let Some(error) = error else {
        return Severity::Minor;
    };
    let lower = error.to_lowercase();
    if lower.contains("dns") || lower.contains("certificate") {
        Severity::Critical
    } else if lower.contains("timeout")
        || lower.contains("econnrefused")
        || lower.contains("connection refused")
    {
        Severity::Major
    } else {
        Severity::Minor
    }
}
