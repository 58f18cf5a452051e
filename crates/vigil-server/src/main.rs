use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vigil_incident::{IncidentDetector, MaintenanceOracle};
use vigil_probe::ProbeSet;
use vigil_server::aggregator::Aggregator;
use vigil_server::config::Config;
use vigil_server::runner::Runner;
use vigil_server::scheduler::Scheduler;
use vigil_storage::Store;

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("failed to install default CryptoProvider: {e:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/vigil.toml".to_string());
    let config = Config::load(&config_path)?;

    tracing::info!(
        config = %config_path,
        monitors = config.monitors.len(),
        db = %config.data.db_path,
        "vigil starting"
    );

    // Explicit wiring: every shared resource (store, maintenance map, worker
    // pool) is a construction parameter, not process-global state.
    let store = Arc::new(Store::open(Path::new(&config.data.db_path))?);
    let oracle = Arc::new(MaintenanceOracle::new(store.clone()));
    let detector = Arc::new(IncidentDetector::new(
        store.clone(),
        oracle.clone(),
        config.incident.failure_threshold,
    ));
    let probes = Arc::new(ProbeSet::new(config.probe_config())?);
    let runner = Arc::new(Runner::new(probes));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        runner,
        detector.clone(),
        oracle,
        config.scheduler.worker_concurrency,
        Duration::from_secs(config.scheduler.tick_seconds),
    ));

    scheduler.reload(config.monitors.clone()).await?;

    // Surface incident transitions in the log; an external notifier would
    // subscribe the same way.
    let mut incident_events = detector.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = incident_events.recv().await {
            tracing::info!(
                kind = ?event.kind,
                monitor_id = event.monitor_id,
                incident_id = event.incident_id,
                severity = ?event.severity,
                "incident lifecycle event"
            );
        }
    });

    let aggregator = Arc::new(Aggregator::new(
        store,
        config.data.retention_days,
        config.data.incidents_retention_days,
    ));
    if let Err(e) = aggregator.backfill() {
        tracing::error!(error = %e, "status history backfill failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregator_handle = tokio::spawn(aggregator.run(shutdown_rx));

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    wait_for_signal().await;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    scheduler
        .shutdown(Duration::from_secs(config.scheduler.shutdown_grace_seconds))
        .await;
    let _ = scheduler_task.await;
    let _ = aggregator_handle.await;
    event_log.abort();

    tracing::info!("vigil stopped");
    Ok(())
}

/// SIGINT and SIGTERM both trigger graceful shutdown.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
