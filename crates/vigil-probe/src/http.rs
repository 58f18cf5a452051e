use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use vigil_common::{context_key, Monitor, ProbeContext, ProbeResult};

use crate::tls::{self, CertExpiry};
use crate::{error_chain_text, Probe, ProbeConfig};

/// HTTP(S) probe. Issues a GET, follows up to 5 redirects, and accepts every
/// status code — status filtering belongs to the condition layer. For https
/// targets the certificate side-channel runs concurrently and fills the
/// certificate context keys when it succeeds within its own budget.
pub struct HttpProbe {
    client: reqwest::Client,
    tls_expiry_timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            tls_expiry_timeout: config.tls_expiry_timeout,
        })
    }

    async fn certificate_expiry(&self, url: &str) -> Option<CertExpiry> {
        let parsed = reqwest::Url::parse(url).ok()?;
        if parsed.scheme() != "https" {
            return None;
        }
        let host = parsed.host_str()?.to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);
        tls::certificate_expiry(&host, port, self.tls_expiry_timeout).await
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let request = async {
            let start = Instant::now();
            let outcome = self.client.get(&monitor.url).send().await;
            (outcome, start.elapsed().as_millis() as u64)
        };

        // The TLS observation must not delay the primary result beyond its
        // own budget, which certificate_expiry enforces internally.
        let ((outcome, elapsed_ms), expiry) =
            tokio::join!(request, self.certificate_expiry(&monitor.url));

        let mut result = match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers: serde_json::Map<String, Value> = response
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_string(),
                            json!(value.to_str().unwrap_or_default()),
                        )
                    })
                    .collect();

                match response.bytes().await {
                    Ok(bytes) => {
                        let body = decode_body(&bytes);
                        let mut context = ProbeContext::new();
                        context.insert(context_key::STATUS.into(), json!(status));
                        context.insert(context_key::RESPONSE_TIME.into(), json!(elapsed_ms));
                        context.insert(context_key::CONNECTED.into(), json!(true));
                        context.insert(context_key::BODY.into(), body);
                        context.insert(context_key::HEADERS.into(), Value::Object(headers));
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
                    Err(e) => ProbeResult::failure(describe(&e), elapsed_ms),
                }
            }
            Err(e) => ProbeResult::failure(describe(&e), elapsed_ms),
        };

        if let Some(expiry) = expiry {
            result.context.insert(
                context_key::CERTIFICATE_EXPIRY_DAYS.into(),
                json!(expiry.days),
            );
            result.context.insert(
                context_key::CERTIFICATE_EXPIRATION.into(),
                json!(expiry.label),
            );
        }

        result
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timeout".to_string()
    } else {
        error_chain_text(error)
    }
}

/// Decodes a response body as JSON when it parses, otherwise as a lossy
/// string, so `[BODY]` paths work on JSON APIs and `contains` works on HTML.
fn decode_body(bytes: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        value
    } else {
        json!(String::from_utf8_lossy(bytes))
    }
}
