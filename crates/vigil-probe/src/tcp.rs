use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use vigil_common::{context_key, Monitor, ProbeContext, ProbeResult};

use crate::{Probe, ProbeConfig, ProbeError};

/// TCP probe: dial host:port within the timeout, close immediately.
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

/// Accepts `host:port` with an optional `tcp://` prefix.
fn parse_target(url: &str) -> Result<String, ProbeError> {
    let target = url.strip_prefix("tcp://").unwrap_or(url);
    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(target.to_string())
        }
        _ => Err(ProbeError::Target(format!("expected host:port, got {url}"))),
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let target = match parse_target(&monitor.url) {
            Ok(target) => target,
            Err(e) => return ProbeResult::failure(e.to_string(), 0),
        };

        let start = Instant::now();
        let connect = tokio::time::timeout(self.timeout, TcpStream::connect(&target)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match connect {
            Ok(Ok(stream)) => {
                drop(stream);
                let mut context = ProbeContext::new();
                context.insert(context_key::CONNECTED.into(), json!(true));
                context.insert(context_key::RESPONSE_TIME.into(), json!(elapsed_ms));
                context.insert(
                    context_key::TIMESTAMP.into(),
                    json!(Utc::now().to_rfc3339()),
                );
                ProbeResult {
                    success: true,
                    response_time_ms: elapsed_ms,
                    context,
                    error: None,
                }
            }
            Ok(Err(e)) => ProbeResult::failure(
                format!("TCP connection failed: {}", crate::error_chain_text(&e)),
                elapsed_ms,
            ),
            Err(_) => {
                ProbeResult::failure(ProbeError::Timeout(self.timeout).to_string(), elapsed_ms)
            }
        }
    }
}
