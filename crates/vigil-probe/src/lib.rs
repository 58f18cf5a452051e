//! Protocol probes. Each probe performs one observation of a target and
//! produces a [`ProbeResult`]: a transport-level success flag, the elapsed
//! wall-clock time, and a context of observable attributes for the condition
//! layer. Probes never return errors to callers — every failure mode is
//! folded into the result.

pub mod dns;
pub mod http;
pub mod ping;
pub mod tcp;
pub mod tls;
pub mod websocket;

use async_trait::async_trait;
use std::time::Duration;
use vigil_common::{Monitor, MonitorType, ProbeResult};

/// Internal probe failure classification; always folded into
/// `ProbeResult.error` before leaving this crate.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timeout after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Network(String),
    #[error("invalid target: {0}")]
    Target(String),
}

/// Probe tunables shared by all protocols.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Overall budget for one probe.
    pub timeout: Duration,
    /// Budget for the HTTPS certificate side-channel; it never delays the
    /// primary result beyond this.
    pub tls_expiry_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            tls_expiry_timeout: Duration::from_secs(5),
        }
    }
}

/// A protocol-specific prober.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult;
}

/// The full set of protocol probes, one per [`MonitorType`].
pub struct ProbeSet {
    http: http::HttpProbe,
    tcp: tcp::TcpProbe,
    websocket: websocket::WebsocketProbe,
    dns: dns::DnsProbe,
    ping: ping::PingProbe,
}

impl ProbeSet {
    pub fn new(config: ProbeConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::HttpProbe::new(&config)?,
            tcp: tcp::TcpProbe::new(&config),
            websocket: websocket::WebsocketProbe::new(&config),
            dns: dns::DnsProbe::new(&config)?,
            ping: ping::PingProbe::new(&config),
        })
    }

    pub fn for_type(&self, monitor_type: MonitorType) -> &dyn Probe {
        match monitor_type {
            MonitorType::Http => &self.http,
            MonitorType::Tcp => &self.tcp,
            MonitorType::Websocket => &self.websocket,
            MonitorType::Dns => &self.dns,
            MonitorType::Ping => &self.ping,
        }
    }
}

/// Walks an error's source chain so the stored text keeps the root cause
/// (reqwest and io errors often bury "connection refused" one level down).
pub(crate) fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
