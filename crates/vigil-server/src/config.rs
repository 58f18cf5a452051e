use serde::Deserialize;
use std::time::Duration;
use vigil_common::{validate_monitors, Monitor};
use vigil_probe::ProbeConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub incident: IncidentConfig,
    /// The monitor list the core consumes. How it is produced (hand-written
    /// TOML, generated from another source) is not the engine's concern.
    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Horizon for raw check rows.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Horizon for resolved incidents and day summaries.
    #[serde(default = "default_incidents_retention_days")]
    pub incidents_retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running checks.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// How long shutdown waits for in-flight checks before giving up.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSection {
    #[serde(default = "default_probe_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_tls_expiry_timeout_seconds")]
    pub tls_expiry_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncidentConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            incidents_retention_days: default_incidents_retention_days(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            tick_seconds: default_tick_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout_seconds(),
            tls_expiry_timeout_seconds: default_tls_expiry_timeout_seconds(),
        }
    }
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_db_path() -> String {
    "data/vigil.db".to_string()
}

fn default_retention_days() -> i64 {
    90
}

fn default_incidents_retention_days() -> i64 {
    365
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_tick_seconds() -> u64 {
    1
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_probe_timeout_seconds() -> u64 {
    30
}

fn default_tls_expiry_timeout_seconds() -> u64 {
    5
}

fn default_failure_threshold() -> usize {
    2
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config '{path}': {e}"))?;
        validate_monitors(&config.monitors).map_err(|reason| anyhow::anyhow!(reason))?;
        Ok(config)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.probe.timeout_seconds),
            tls_expiry_timeout: Duration::from_secs(self.probe.tls_expiry_timeout_seconds),
        }
    }
}
