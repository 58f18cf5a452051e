use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil_common::{context_key, Monitor, MonitorType, ProbeContext, ProbeResult};
use vigil_server::runner::{Prober, Runner};

fn monitor(id: i64) -> Monitor {
    Monitor {
        id,
        name: format!("monitor-{id}"),
        group: None,
        monitor_type: MonitorType::Http,
        url: format!("http://host-{id}"),
        interval_seconds: 10,
        public: true,
        conditions: vec![],
        dns: None,
        maintenance_windows: vec![],
    }
}

fn ok_result(status: i64) -> ProbeResult {
    let mut context = ProbeContext::new();
    context.insert(context_key::STATUS.into(), json!(status));
    context.insert(context_key::CONNECTED.into(), json!(true));
    ProbeResult {
        success: true,
        response_time_ms: 5,
        context,
        error: None,
    }
}

/// Scripted prober: sleeps briefly, tracks peak concurrency, and panics for
/// monitors whose id is in the panic set.
struct ScriptedProber {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    panic_ids: Vec<i64>,
    status: i64,
}

impl ScriptedProber {
    fn new(status: i64, panic_ids: Vec<i64>) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            panic_ids,
            status,
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_ids.contains(&monitor.id) {
            panic!("scripted probe failure for monitor {}", monitor.id);
        }
        ok_result(self.status)
    }
}

#[tokio::test]
async fn batch_respects_concurrency_bound() {
    let prober = Arc::new(ScriptedProber::new(200, vec![]));
    let runner = Arc::new(Runner::new(prober.clone()));
    let monitors: Vec<Monitor> = (1..=50).map(monitor).collect();

    let results = runner.run_checks(&monitors, 5).await;

    assert_eq!(results.len(), 50);
    assert!(results.iter().all(|r| r.success));
    // No duplicates, input order preserved.
    let ids: Vec<i64> = results.iter().map(|r| r.monitor_id).collect();
    assert_eq!(ids, (1..=50).collect::<Vec<i64>>());
    assert!(
        prober.peak.load(Ordering::SeqCst) <= 5,
        "peak concurrency {} exceeded bound",
        prober.peak.load(Ordering::SeqCst)
    );
    assert_eq!(prober.calls.load(Ordering::SeqCst), 50);
}

#[tokio::test]
async fn batch_survives_panicking_probes() {
    // 9 of 10 probes panic; the batch still returns all 10 results.
    let prober = Arc::new(ScriptedProber::new(200, (1..=9).collect()));
    let runner = Arc::new(Runner::new(prober));
    let monitors: Vec<Monitor> = (1..=10).map(monitor).collect();

    let results = runner.run_checks(&monitors, 4).await;

    assert_eq!(results.len(), 10);
    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 9);
    for result in &failed {
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("panicked"), "unexpected error: {error}");
    }
    assert!(results[9].success);
}

#[tokio::test]
async fn single_check_converts_panic_to_failed_result() {
    let prober = Arc::new(ScriptedProber::new(200, vec![1]));
    let runner = Runner::new(prober);

    let result = runner.run_check(&monitor(1), &[]).await;
    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("scripted probe failure for monitor 1"));
}

#[tokio::test]
async fn conditions_gate_the_success_flag() {
    let prober = Arc::new(ScriptedProber::new(500, vec![]));
    let runner = Runner::new(prober);
    let mut m = monitor(1);
    m.conditions = vec!["[STATUS] == 200".to_string()];
    let conditions = vigil_condition::parse_all(&m.conditions);

    let result = runner.run_check(&m, &conditions).await;

    // Transport succeeded but the condition failed.
    assert!(!result.success);
    assert!(result.error.is_none());
    assert_eq!(result.condition_results.len(), 1);
    assert!(!result.condition_results[0].passed);
    assert_eq!(result.condition_results[0].condition, "[STATUS] == 200");
}

#[tokio::test]
async fn passing_conditions_keep_success() {
    let prober = Arc::new(ScriptedProber::new(200, vec![]));
    let runner = Runner::new(prober);
    let mut m = monitor(1);
    m.conditions = vec![
        "[STATUS] == 200".to_string(),
        "[CONNECTED]".to_string(),
    ];
    let conditions = vigil_condition::parse_all(&m.conditions);

    let result = runner.run_check(&m, &conditions).await;
    assert!(result.success);
    assert!(result.condition_results.iter().all(|c| c.passed));
}
