use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use vigil_common::{context_key, Monitor, ProbeContext, ProbeResult};

use crate::{Probe, ProbeConfig, ProbeError};

const MAX_HANDSHAKE_RESPONSE: usize = 8 * 1024;

/// WebSocket probe: performs the opening handshake and closes. Success means
/// the server answered `101 Switching Protocols` with an `Upgrade: websocket`
/// header; no data frames are exchanged.
pub struct WebsocketProbe {
    timeout: Duration,
}

impl WebsocketProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

struct WsTarget {
    host: String,
    port: u16,
    path: String,
    tls: bool,
}

fn parse_target(url: &str) -> Result<WsTarget, ProbeError> {
    let (tls, rest) = if let Some(rest) = url.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        (false, rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(ProbeError::Target(format!(
            "expected ws:// or wss:// URL, got {url}"
        )));
    };

    let (authority, path) = match rest.find('/') {
        Some(at) => (&rest[..at], rest[at..].to_string()),
        None => (rest, "/".to_string()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProbeError::Target(format!("invalid port in {url}")))?;
            (host, port)
        }
        None => (authority, if tls { 443 } else { 80 }),
    };
    if host.is_empty() {
        return Err(ProbeError::Target(format!("missing host in {url}")));
    }

    Ok(WsTarget {
        host: host.to_string(),
        port,
        path,
        tls,
    })
}

/// Writes the upgrade request, reads the response head, and verifies the
/// switch to the websocket protocol. The frame layer is never entered; a
/// masked empty Close frame is sent before the connection drops.
async fn handshake<S>(stream: &mut S, host: &str, path: &str) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = BASE64.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send handshake: {e}")))?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| ProbeError::Network(format!("failed to read handshake: {e}")))?;
        if n == 0 {
            return Err(ProbeError::Network(
                "connection closed during handshake".to_string(),
            ));
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_HANDSHAKE_RESPONSE {
            return Err(ProbeError::Network("handshake response too large".to_string()));
        }
    }

    let head = String::from_utf8_lossy(&response);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "101" {
        return Err(ProbeError::Network(format!(
            "handshake rejected: {status_line}"
        )));
    }
    let upgraded = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        });
    if !upgraded {
        return Err(ProbeError::Network(
            "handshake response missing Upgrade: websocket".to_string(),
        ));
    }

    // Masked Close frame with empty payload (client frames must be masked).
    let mask = rand::random::<[u8; 4]>();
    let close = [0x88, 0x80, mask[0], mask[1], mask[2], mask[3]];
    let _ = stream.write_all(&close).await;

    Ok(())
}

async fn run(target: &WsTarget) -> Result<(), ProbeError> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|e| ProbeError::Network(format!("TCP connection failed: {e}")))?;

    if target.tls {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
            .map_err(|e| ProbeError::Target(format!("invalid server name: {e}")))?;
        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProbeError::Network(format!("TLS handshake failed: {e}")))?;
        handshake(&mut stream, &target.host, &target.path).await
    } else {
        let mut stream = tcp;
        handshake(&mut stream, &target.host, &target.path).await
    }
}

#[async_trait]
impl Probe for WebsocketProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let target = match parse_target(&monitor.url) {
            Ok(target) => target,
            Err(e) => return ProbeResult::failure(e.to_string(), 0),
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, run(&target)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
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
            Ok(Err(e)) => ProbeResult::failure(e.to_string(), elapsed_ms),
            Err(_) => {
                ProbeResult::failure(ProbeError::Timeout(self.timeout).to_string(), elapsed_ms)
            }
        }
    }
}
