use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::time::interval;
use vigil_common::{validate_monitors, Monitor};
use vigil_condition::Condition;
use vigil_incident::{IncidentDetector, MaintenanceOracle};
use vigil_storage::Store;

use crate::runner::Runner;

/// A monitor plus its conditions, parsed once at (re)load.
#[derive(Clone)]
struct ScheduledMonitor {
    monitor: Monitor,
    conditions: Arc<Vec<Condition>>,
}

/// Per-monitor repeating dispatch with bounded concurrency.
///
/// Due times are derived from the persisted latest check row, so a restart
/// re-schedules every monitor from durable state: a monitor whose interval
/// elapsed while the process was down runs immediately (at-least-once).
/// Within one monitor, an invocation that outlives its interval may overlap
/// the next one; probes are idempotent observations and no per-monitor mutual
/// exclusion is enforced.
pub struct Scheduler {
    store: Arc<Store>,
    runner: Arc<Runner>,
    detector: Arc<IncidentDetector>,
    oracle: Arc<MaintenanceOracle>,
    monitors: RwLock<HashMap<i64, ScheduledMonitor>>,
    next_due: RwLock<HashMap<i64, DateTime<Utc>>>,
    permits: Arc<Semaphore>,
    worker_concurrency: usize,
    tick: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        runner: Arc<Runner>,
        detector: Arc<IncidentDetector>,
        oracle: Arc<MaintenanceOracle>,
        worker_concurrency: usize,
        tick: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let worker_concurrency = worker_concurrency.max(1);
        Self {
            store,
            runner,
            detector,
            oracle,
            monitors: RwLock::new(HashMap::new()),
            next_due: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(worker_concurrency)),
            worker_concurrency,
            tick,
            shutdown_tx,
        }
    }

    /// Replaces the scheduled monitor set: validates, syncs the store in one
    /// transaction, replaces the recurring-maintenance map wholesale, then
    /// swaps the in-memory set and re-seeds due times from durable state.
    /// Idempotent for an unchanged list; on validation failure the previous
    /// configuration stays active.
    pub async fn reload(&self, monitors: Vec<Monitor>) -> anyhow::Result<()> {
        validate_monitors(&monitors).map_err(|reason| anyhow::anyhow!(reason))?;
        self.store.sync_monitors(&monitors)?;
        self.oracle.load_from_monitors(&monitors);

        let mut scheduled = HashMap::with_capacity(monitors.len());
        let mut due = HashMap::with_capacity(monitors.len());
        let now = Utc::now();
        for monitor in monitors {
            due.insert(monitor.id, self.seed_due(&monitor, now)?);
            let conditions = Arc::new(vigil_condition::parse_all(&monitor.conditions));
            scheduled.insert(
                monitor.id,
                ScheduledMonitor {
                    monitor,
                    conditions,
                },
            );
        }

        let count = scheduled.len();
        *self.monitors.write().await = scheduled;
        *self.next_due.write().await = due;
        tracing::info!(monitors = count, "scheduler reloaded");
        Ok(())
    }

    /// First due time: the last persisted check plus one interval, clamped
    /// to now so overdue monitors run on the next tick.
    fn seed_due(&self, monitor: &Monitor, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        let due = match self.store.latest_check(monitor.id)? {
            Some(last) => {
                let next = last.checked_at
                    + ChronoDuration::seconds(monitor.interval_seconds as i64);
                next.min(now)
            }
            None => now,
        };
        Ok(due)
    }

    /// Tick loop. Runs until `shutdown` is called, then drains in-flight
    /// checks within the grace period.
    pub async fn run(&self) {
        tracing::info!(
            concurrency = self.worker_concurrency,
            tick_ms = self.tick.as_millis() as u64,
            "scheduler started"
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.dispatch_due().await,
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped claiming new work");
    }

    /// Spawns a check task for every monitor whose due time has passed. The
    /// due time advances at dispatch so a slow probe cannot re-trigger every
    /// tick; the task itself waits for a worker permit.
    async fn dispatch_due(&self) {
        let now = Utc::now();
        let due_ids: Vec<i64> = {
            let due = self.next_due.read().await;
            due.iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| *id)
                .collect()
        };
        if due_ids.is_empty() {
            return;
        }

        let monitors = self.monitors.read().await;
        let mut next_due = self.next_due.write().await;
        for id in due_ids {
            let Some(scheduled) = monitors.get(&id) else {
                next_due.remove(&id);
                continue;
            };
            next_due.insert(
                id,
                now + ChronoDuration::seconds(scheduled.monitor.interval_seconds as i64),
            );
            self.spawn_check(scheduled.clone());
        }
    }

    fn spawn_check(&self, scheduled: ScheduledMonitor) {
        let runner = self.runner.clone();
        let detector = self.detector.clone();
        let permits = self.permits.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // A full pool means this dispatch waits its turn; the semaphore
            // is the worker-concurrency bound.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if *shutdown_rx.borrow() {
                return;
            }

            let result = runner
                .run_check(&scheduled.monitor, &scheduled.conditions)
                .await;
            tracing::debug!(
                monitor_id = result.monitor_id,
                success = result.success,
                response_time_ms = result.response_time_ms,
                "check completed"
            );

            // One bounded retry for the persistence path; after that the
            // sample is lost and the next interval produces a fresh one.
            if let Err(first) = detector.process(&result) {
                tracing::warn!(
                    monitor_id = result.monitor_id,
                    error = %first,
                    "failed to process check result, retrying once"
                );
                if let Err(second) = detector.process(&result) {
                    tracing::error!(
                        monitor_id = result.monitor_id,
                        error = %second,
                        "dropping check result after retry"
                    );
                }
            }
        });
    }

    /// Graceful shutdown: stop claiming, then wait up to `grace` for
    /// in-flight checks (all permits returning) before giving up.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let drained = tokio::time::timeout(
            grace,
            self.permits
                .clone()
                .acquire_many_owned(self.worker_concurrency as u32),
        )
        .await;
        match drained {
            Ok(_) => tracing::info!("scheduler drained"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "grace period elapsed with checks still in flight"
            ),
        }
    }

    /// Ids currently scheduled; used by the aggregator and tests.
    pub async fn monitor_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.monitors.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
