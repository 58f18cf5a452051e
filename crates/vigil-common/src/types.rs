use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum allowed probe interval.
pub const MIN_INTERVAL_SECONDS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Tcp,
    Websocket,
    Dns,
    Ping,
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorType::Http => write!(f, "http"),
            MonitorType::Tcp => write!(f, "tcp"),
            MonitorType::Websocket => write!(f, "websocket"),
            MonitorType::Dns => write!(f, "dns"),
            MonitorType::Ping => write!(f, "ping"),
        }
    }
}

impl std::str::FromStr for MonitorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(MonitorType::Http),
            "tcp" => Ok(MonitorType::Tcp),
            "websocket" => Ok(MonitorType::Websocket),
            "dns" => Ok(MonitorType::Dns),
            "ping" => Ok(MonitorType::Ping),
            _ => Err(format!("unknown monitor type: {s}")),
        }
    }
}

/// Protocol-specific parameters. Only DNS carries any today.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsParams {
    /// Name to query; falls back to the monitor URL when absent.
    pub query_name: Option<String>,
    /// Record type (A, AAAA, CNAME, MX, TXT, ...); defaults to A.
    pub query_type: Option<String>,
}

/// A maintenance window during which incident detection is silenced.
///
/// `Fixed` windows are absolute intervals and are persisted; `Daily` windows
/// recur every day at the same wall-clock times in their timezone and live in
/// process memory. Daily windows may wrap past midnight
/// (`start_time > end_time` means overnight).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MaintenanceWindowSpec {
    Fixed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default)]
        description: Option<String>,
    },
    Daily {
        /// "HH:MM" in the window's timezone.
        start_time: String,
        /// "HH:MM" in the window's timezone.
        end_time: String,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default)]
        description: Option<String>,
    },
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_public() -> bool {
    true
}

/// A configured monitor. Immutable within a scheduling epoch; the whole set
/// is replaced on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: u64,
    /// Visibility flag for presentation layers; the core never consults it.
    #[serde(default = "default_public")]
    pub public: bool,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub dns: Option<DnsParams>,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindowSpec>,
}

impl Monitor {
    /// Validates the per-monitor invariants. Uniqueness of ids is a list-level
    /// property checked by [`validate_monitors`].
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("monitor {}: empty name", self.id));
        }
        if self.interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(format!(
                "monitor {} ({}): interval_seconds must be >= {MIN_INTERVAL_SECONDS}, got {}",
                self.id, self.name, self.interval_seconds
            ));
        }
        for window in &self.maintenance_windows {
            // An unknown timezone must fail here: past validation it would
            // silently disable the window instead of suppressing incidents.
            match window {
                MaintenanceWindowSpec::Fixed {
                    start,
                    end,
                    timezone,
                    ..
                } => {
                    if start >= end {
                        return Err(format!(
                            "monitor {} ({}): fixed maintenance window must have start < end",
                            self.id, self.name
                        ));
                    }
                    self.validate_timezone(timezone)?;
                }
                MaintenanceWindowSpec::Daily {
                    start_time,
                    end_time,
                    timezone,
                    ..
                } => {
                    // Overnight wraparound (start > end) is valid; only the
                    // time format itself is checked here.
                    for (label, value) in [("start_time", start_time), ("end_time", end_time)] {
                        if NaiveTime::parse_from_str(value, "%H:%M").is_err() {
                            return Err(format!(
                                "monitor {} ({}): daily window {label} '{value}' is not HH:MM",
                                self.id, self.name
                            ));
                        }
                    }
                    self.validate_timezone(timezone)?;
                }
            }
        }
        Ok(())
    }

    fn validate_timezone(&self, timezone: &str) -> Result<(), String> {
        if timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!(
                "monitor {} ({}): unknown timezone '{timezone}' in maintenance window",
                self.id, self.name
            ));
        }
        Ok(())
    }
}

/// Validates every monitor and the list-level unique-id invariant.
pub fn validate_monitors(monitors: &[Monitor]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for monitor in monitors {
        monitor.validate()?;
        if !seen.insert(monitor.id) {
            return Err(format!("duplicate monitor id: {}", monitor.id));
        }
    }
    Ok(())
}

/// Well-known probe context keys. Absent keys read as null and compare false.
pub mod context_key {
    pub const STATUS: &str = "STATUS";
    pub const RESPONSE_TIME: &str = "RESPONSE_TIME";
    pub const CONNECTED: &str = "CONNECTED";
    pub const BODY: &str = "BODY";
    pub const HEADERS: &str = "HEADERS";
    pub const CERTIFICATE_EXPIRATION: &str = "CERTIFICATE_EXPIRATION";
    pub const CERTIFICATE_EXPIRY_DAYS: &str = "CERTIFICATE_EXPIRY_DAYS";
    pub const DNS_RCODE: &str = "DNS_RCODE";
    pub const ERROR: &str = "ERROR";
    pub const TIMESTAMP: &str = "TIMESTAMP";
}

/// The bag of observable attributes produced by one probe invocation.
pub type ProbeContext = HashMap<String, serde_json::Value>;

/// Transport-level outcome of a single probe. Condition evaluation happens
/// afterwards against `context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub response_time_ms: u64,
    pub context: ProbeContext,
    pub error: Option<String>,
}

impl ProbeResult {
    /// A failed result with ERROR, CONNECTED=false and TIMESTAMP populated,
    /// as every probe yields on transport failure or timeout.
    pub fn failure(error: impl Into<String>, elapsed_ms: u64) -> Self {
        let error = error.into();
        let mut context = ProbeContext::new();
        context.insert(context_key::CONNECTED.into(), serde_json::json!(false));
        context.insert(context_key::ERROR.into(), serde_json::json!(error.clone()));
        context.insert(
            context_key::TIMESTAMP.into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
        Self {
            success: false,
            response_time_ms: elapsed_ms,
            context,
            error: Some(error),
        }
    }
}

/// Outcome of one condition, parallel to `Monitor::conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub condition: String,
    pub passed: bool,
}

/// The composed result of running one check for one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub monitor_id: i64,
    pub monitor_name: String,
    pub timestamp: DateTime<Utc>,
    /// Probe-level success AND every condition passed.
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub condition_results: Vec<ConditionOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Up => write!(f, "up"),
            CheckStatus::Down => write!(f, "down"),
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            _ => Err(format!("unknown check status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Minor => write!(f, "minor"),
            Severity::Major => write!(f, "major"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Investigating => write!(f, "investigating"),
            IncidentStatus::Identified => write!(f, "identified"),
            IncidentStatus::Monitoring => write!(f, "monitoring"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investigating" => Ok(IncidentStatus::Investigating),
            "identified" => Ok(IncidentStatus::Identified),
            "monitoring" => Ok(IncidentStatus::Monitoring),
            "resolved" => Ok(IncidentStatus::Resolved),
            _ => Err(format!("unknown incident status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentEventKind {
    Opened,
    Resolved,
}

/// In-process lifecycle event emitted on incident transitions. An external
/// notifier may observe these; delivery and retry are not the detector's
/// concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub kind: IncidentEventKind,
    pub monitor_id: i64,
    pub incident_id: i64,
    pub timestamp: DateTime<Utc>,
    pub severity: Option<Severity>,
    pub title: Option<String>,
}
