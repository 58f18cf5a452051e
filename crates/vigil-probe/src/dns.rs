use async_trait::async_trait;
use chrono::Utc;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, ResolveErrorKind, TokioResolver};
use serde_json::json;
use std::time::{Duration, Instant};
use vigil_common::{context_key, Monitor, ProbeContext, ProbeResult};

use crate::{Probe, ProbeConfig};

/// DNS probe: queries the system resolver for the configured name and record
/// type (default A). Success requires a non-empty NOERROR answer; the
/// response code is exposed as `DNS_RCODE` either way.
pub struct DnsProbe {
    resolver: TokioResolver,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| anyhow::anyhow!("failed to create DNS resolver: {e}"))?
            .build();
        Ok(Self {
            resolver,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Probe for DnsProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let params = monitor.dns.clone().unwrap_or_default();
        let query_name = params
            .query_name
            .unwrap_or_else(|| monitor.url.clone());
        let record_type = match params.query_type.as_deref() {
            None => RecordType::A,
            Some(raw) => match raw.to_uppercase().parse::<RecordType>() {
                Ok(rt) => rt,
                Err(_) => {
                    return ProbeResult::failure(
                        format!("DNS query failed: unknown record type {raw}"),
                        0,
                    );
                }
            },
        };

        let start = Instant::now();
        let lookup =
            tokio::time::timeout(self.timeout, self.resolver.lookup(query_name.clone(), record_type))
                .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match lookup {
            Ok(Ok(answer)) => {
                if answer.iter().next().is_none() {
                    let mut result = ProbeResult::failure(
                        format!("DNS query for {query_name} returned no records"),
                        elapsed_ms,
                    );
                    result
                        .context
                        .insert(context_key::DNS_RCODE.into(), json!("NOERROR"));
                    return result;
                }
                let mut context = ProbeContext::new();
                context.insert(context_key::CONNECTED.into(), json!(true));
                context.insert(context_key::RESPONSE_TIME.into(), json!(elapsed_ms));
                context.insert(context_key::DNS_RCODE.into(), json!("NOERROR"));
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
            Ok(Err(e)) => {
                let rcode = rcode_of(&e);
                let mut result = ProbeResult::failure(
                    format!("DNS query for {query_name} failed: {e}"),
                    elapsed_ms,
                );
                if let Some(rcode) = rcode {
                    result
                        .context
                        .insert(context_key::DNS_RCODE.into(), json!(rcode));
                }
                result
            }
            Err(_) => ProbeResult::failure(
                format!(
                    "DNS query for {query_name} timeout after {}s",
                    self.timeout.as_secs()
                ),
                elapsed_ms,
            ),
        }
    }
}

/// Extracts the response code from a resolver error when the server did
/// answer (NXDOMAIN, SERVFAIL, ...); transport-level failures have none.
fn rcode_of(error: &ResolveError) -> Option<String> {
    if let ResolveErrorKind::Proto(proto) = error.kind() {
        if let ProtoErrorKind::NoRecordsFound { response_code, .. } = proto.kind() {
            return Some(rcode_label(*response_code));
        }
    }
    None
}

fn rcode_label(code: ResponseCode) -> String {
    match code {
        ResponseCode::NoError => "NOERROR".to_string(),
        ResponseCode::FormErr => "FORMERR".to_string(),
        ResponseCode::ServFail => "SERVFAIL".to_string(),
        ResponseCode::NXDomain => "NXDOMAIN".to_string(),
        ResponseCode::NotImp => "NOTIMP".to_string(),
        ResponseCode::Refused => "REFUSED".to_string(),
        other => other.to_string().to_uppercase(),
    }
}
