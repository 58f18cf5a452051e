//! ICMP echo probe. Uses a RAW socket when privileged, falling back to an
//! unprivileged DGRAM ICMP socket (Linux `ping_group_range`, macOS). The
//! blocking socket work runs on the blocking thread pool so reply timing is
//! not skewed by the async scheduler.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use vigil_common::{context_key, Monitor, ProbeContext, ProbeResult};

use crate::{Probe, ProbeConfig, ProbeError};

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;
const PACKET_LEN: usize = 64;

static SEQUENCE: AtomicU16 = AtomicU16::new(0);

pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult {
        let host = monitor.url.clone();
        let timeout = self.timeout;

        let ip = match resolve(&host).await {
            Ok(ip) => ip,
            Err(e) => return ProbeResult::failure(e.to_string(), 0),
        };

        let outcome = tokio::task::spawn_blocking(move || echo(ip, timeout)).await;
        match outcome {
            Ok(Ok(elapsed_ms)) => {
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
            Ok(Err(e)) => {
                let elapsed = match &e {
                    ProbeError::Timeout(d) => d.as_millis() as u64,
                    _ => 0,
                };
                ProbeResult::failure(e.to_string(), elapsed)
            }
            Err(join_error) => ProbeResult::failure(
                format!("ping task failed: {join_error}"),
                0,
            ),
        }
    }
}

async fn resolve(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0u16))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed for {host}: {e}")))?;
    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {host}")))
}

/// Sends one echo request and waits for the matching reply. Returns the
/// round-trip time in milliseconds.
fn echo(ip: IpAddr, timeout: Duration) -> Result<u64, ProbeError> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };

    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where the OS allows it.
    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| ProbeError::Network(format!("failed to create ICMP socket: {e}")))?;

    socket
        .set_read_timeout(Some(timeout))
        .and_then(|()| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| ProbeError::Network(format!("failed to configure socket: {e}")))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {e}")))?;

    let identifier: u16 = rand::random();
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(request_type, ip.is_ipv4(), identifier, sequence);

    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| ProbeError::Network(format!("failed to send echo request: {e}")))?;

    // Replies for other concurrent pings can arrive on the same socket; keep
    // reading until our identifier/sequence shows up or the budget runs out.
    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("failed to receive echo reply: {e}"))
            }
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // recv initialized `len` bytes.
        let data: &[u8] =
            unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if let Some((reply_id, reply_seq)) = parse_echo_reply(data, reply_type) {
            if reply_id == identifier && reply_seq == sequence {
                return Ok(elapsed.as_millis() as u64);
            }
        }
    }
}

/// 8-byte ICMP header plus a zero payload. The v4 checksum is computed here;
/// the kernel fills it in for ICMPv6.
fn build_echo_request(request_type: u8, is_v4: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; PACKET_LEN];
    packet[0] = request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    if is_v4 {
        let checksum = rfc1071_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// Extracts (identifier, sequence) from an echo reply, skipping the IPv4
/// header when a RAW socket delivered the full IP packet.
fn parse_echo_reply(data: &[u8], reply_type: u8) -> Option<(u16, u16)> {
    let offset = if !data.is_empty() && data[0] >> 4 == 4 {
        20
    } else {
        0
    };
    if data.len() < offset + 8 {
        return None;
    }
    if data[offset] != reply_type {
        return None;
    }
    let id = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
    let seq = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
    Some((id, seq))
}

fn rfc1071_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [odd] = chunks.remainder() {
        sum += u32::from(*odd) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_layout() {
        let packet = build_echo_request(ECHO_REQUEST_V4, true, 0x1234, 0x0007);
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(packet[0], ECHO_REQUEST_V4);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0x00, 0x07]);
        // v4 checksum is filled in, v6 left for the kernel.
        assert_ne!(&packet[2..4], &[0, 0]);
        let v6 = build_echo_request(ECHO_REQUEST_V6, false, 1, 1);
        assert_eq!(&v6[2..4], &[0, 0]);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        // A packet with its own checksum folded in sums to 0xFFFF (RFC 1071).
        let packet = build_echo_request(ECHO_REQUEST_V4, true, 0xBEEF, 42);
        let mut sum: u32 = 0;
        for chunk in packet.chunks_exact(2) {
            sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum as u16, 0xFFFF);
    }

    #[test]
    fn reply_parsing_skips_ip_header() {
        // DGRAM delivery: bare ICMP header.
        let mut bare = vec![0u8; 8];
        bare[0] = ECHO_REPLY_V4;
        bare[4..6].copy_from_slice(&0xABCDu16.to_be_bytes());
        bare[6..8].copy_from_slice(&3u16.to_be_bytes());
        assert_eq!(parse_echo_reply(&bare, ECHO_REPLY_V4), Some((0xABCD, 3)));

        // RAW delivery: 20-byte IPv4 header in front.
        let mut raw = vec![0u8; 28];
        raw[0] = 0x45;
        raw[20] = ECHO_REPLY_V4;
        raw[24..26].copy_from_slice(&0xABCDu16.to_be_bytes());
        raw[26..28].copy_from_slice(&3u16.to_be_bytes());
        assert_eq!(parse_echo_reply(&raw, ECHO_REPLY_V4), Some((0xABCD, 3)));

        // Wrong type is ignored.
        assert_eq!(parse_echo_reply(&[ECHO_REQUEST_V4; 8], ECHO_REPLY_V4), None);
        // Truncated packets are ignored.
        assert_eq!(parse_echo_reply(&[0u8; 4], ECHO_REPLY_V4), None);
    }
}
