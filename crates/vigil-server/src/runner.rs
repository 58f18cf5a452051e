use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use vigil_common::{CheckResult, Monitor, ProbeResult};
use vigil_condition::Condition;
use vigil_probe::ProbeSet;

/// Default fan-out for batch runs.
pub const DEFAULT_FANOUT: usize = 20;

/// Dispatch seam between the runner and the protocol probes; tests substitute
/// scripted probers.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult;
}

#[async_trait]
impl Prober for ProbeSet {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        self.for_type(monitor.monitor_type).probe(monitor).await
    }
}

/// Runs single checks and bounded batches. A probe that panics is converted
/// into a failed result; it can never take the worker down. The monitor type
/// is a closed enum, so "unknown type" is rejected at config parse time
/// rather than here.
pub struct Runner {
    prober: Arc<dyn Prober>,
}

impl Runner {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Probes the monitor, evaluates its conditions against the context, and
    /// composes the check result. `success` requires the transport-level
    /// outcome AND every condition.
    pub async fn run_check(&self, monitor: &Monitor, conditions: &[Condition]) -> CheckResult {
        let prober = self.prober.clone();
        let probed = {
            let monitor = monitor.clone();
            tokio::spawn(async move { prober.probe(&monitor).await }).await
        };
        let probe_result = match probed {
            Ok(result) => result,
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                tracing::error!(
                    monitor_id = monitor.id,
                    error = %reason,
                    "probe aborted, recording failed check"
                );
                ProbeResult::failure(reason, 0)
            }
        };

        let condition_results = vigil_condition::evaluate_all(conditions, &probe_result.context);
        let all_passed = condition_results.iter().all(|outcome| outcome.passed);

        CheckResult {
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            timestamp: Utc::now(),
            success: probe_result.success && all_passed,
            response_time_ms: probe_result.response_time_ms,
            error: probe_result.error,
            condition_results,
        }
    }

    /// Runs a batch of monitors with at most `concurrency` probes in flight.
    /// Always returns exactly one result per monitor, in input order,
    /// regardless of individual probe failures.
    pub async fn run_checks(
        self: &Arc<Self>,
        monitors: &[Monitor],
        concurrency: usize,
    ) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(monitors.len());

        for monitor in monitors {
            let runner = self.clone();
            let semaphore = semaphore.clone();
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move {
                // Only fails if the semaphore is closed, which never happens
                // here; the Option keeps the permit alive either way.
                let _permit = semaphore.acquire_owned().await.ok();
                let conditions = vigil_condition::parse_all(&monitor.conditions);
                runner.run_check(&monitor, &conditions).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, monitor) in handles.into_iter().zip(monitors) {
            match handle.await {
                Ok(result) => results.push(result),
                // The inner spawn already contains probe panics; this arm
                // covers the batch task itself dying.
                Err(join_error) => {
                    tracing::error!(
                        monitor_id = monitor.id,
                        error = %join_error,
                        "check task failed"
                    );
                    results.push(CheckResult {
                        monitor_id: monitor.id,
                        monitor_name: monitor.name.clone(),
                        timestamp: Utc::now(),
                        success: false,
                        response_time_ms: 0,
                        error: Some(join_error.to_string()),
                        condition_results: Vec::new(),
                    });
                }
            }
        }
        results
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("probe panicked: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("probe panicked: {text}")
    } else {
        "probe panicked".to_string()
    }
}
