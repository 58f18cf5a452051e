use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use vigil_storage::{DaySummary, Result, Store};

const HOURLY_TICK: Duration = Duration::from_secs(3600);

/// Rolls check rows into per-(monitor, day) uptime summaries and applies
/// retention. Aggregation is a pure function of the day's rows, so every
/// entry point here is idempotent.
pub struct Aggregator {
    store: Arc<Store>,
    retention_days: i64,
    history_retention_days: i64,
}

impl Aggregator {
    pub fn new(store: Arc<Store>, retention_days: i64, history_retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
            history_retention_days,
        }
    }

    /// Startup backfill: write a summary for every `(monitor, day)` in the
    /// retention window that has check rows but no summary row yet.
    pub fn backfill(&self) -> Result<usize> {
        let mut written = 0;
        for (monitor_id, date) in self.store.days_with_checks(self.retention_days)? {
            if self.store.has_day_summary(monitor_id, date)? {
                continue;
            }
            if let Some(summary) = self.store.aggregate_day(monitor_id, date)? {
                self.store.upsert_day_summary(&summary)?;
                written += 1;
            }
        }
        if written > 0 {
            tracing::info!(rows = written, "backfilled status history");
        }
        Ok(written)
    }

    /// Upserts today's row for every monitor with checks today (hourly job).
    pub fn aggregate_today(&self) -> Result<usize> {
        self.aggregate_date(Utc::now().date_naive())
    }

    /// Finalizes one day wholesale (the after-midnight job for yesterday).
    pub fn aggregate_date(&self, date: NaiveDate) -> Result<usize> {
        let mut written = 0;
        for monitor_id in self.store.monitors_with_checks_on(date)? {
            if let Some(summary) = self.store.aggregate_day(monitor_id, date)? {
                self.store.upsert_day_summary(&summary)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Retention trim: raw check rows past `retention_days`, resolved
    /// incidents and summary rows past `history_retention_days`.
    pub fn run_retention(&self) -> Result<()> {
        let checks = self.store.delete_checks_older_than(self.retention_days)?;
        let incidents = self
            .store
            .delete_incidents_older_than(self.history_retention_days)?;
        let summaries = self
            .store
            .delete_history_older_than(self.history_retention_days)?;
        if checks + incidents + summaries > 0 {
            tracing::info!(checks, incidents, summaries, "retention trim complete");
        }
        Ok(())
    }

    /// Day summaries for presentation: stored rows merged with a fresh
    /// re-aggregation of the raw rows, preferring the fresh value where both
    /// exist (the hourly job may not have seen today's latest checks yet).
    pub fn history_with_fallback(&self, monitor_id: i64, days: i64) -> Result<Vec<DaySummary>> {
        let today = Utc::now().date_naive();
        let mut result = Vec::new();
        for offset in (0..=days).rev() {
            let date = today - ChronoDuration::days(offset);
            let fresh = self.store.aggregate_day(monitor_id, date)?;
            let row = match fresh {
                Some(summary) => Some(summary),
                None => self.store.day_summary(monitor_id, date)?,
            };
            if let Some(row) = row {
                result.push(row);
            }
        }
        Ok(result)
    }

    /// Hourly driver: refresh today, finalize yesterday once per midnight
    /// crossing, and trim once per day. The first tick fires immediately.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut tick = interval(HOURLY_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut finalized_through = Utc::now().date_naive() - ChronoDuration::days(1);
        let mut last_retention: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.aggregate_today() {
                tracing::error!(error = %e, "hourly aggregation failed");
            }

            let yesterday = Utc::now().date_naive() - ChronoDuration::days(1);
            if finalized_through < yesterday {
                match self.aggregate_date(yesterday) {
                    Ok(rows) => {
                        tracing::info!(date = %yesterday, rows, "finalized daily summaries");
                        finalized_through = yesterday;
                    }
                    Err(e) => tracing::error!(error = %e, "daily finalization failed"),
                }
            }

            let today = Utc::now().date_naive();
            if last_retention != Some(today) {
                match self.run_retention() {
                    Ok(()) => last_retention = Some(today),
                    Err(e) => tracing::error!(error = %e, "retention trim failed"),
                }
            }
        }
        tracing::info!("aggregator stopped");
    }
}
