//! HTTPS certificate expiry side-channel.
//!
//! Opens a TLS connection with SNI to the probed host, reads the peer's leaf
//! certificate and reports time until `not_after`. Verification is disabled
//! on purpose: expiry must be observable even when the chain is already
//! invalid.

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

/// Days until expiry plus the compact display form ("30d", "5h").
#[derive(Debug, Clone)]
pub struct CertExpiry {
    pub days: i64,
    pub label: String,
}

#[derive(Debug)]
struct NoVerification {
    provider: rustls::crypto::CryptoProvider,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn unverified_config() -> ClientConfig {
    let provider = rustls::crypto::ring::default_provider();
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
        .with_no_client_auth()
}

/// Fetches the peer certificate of `host:port` and computes time until
/// expiry. Returns `None` on any failure or when `budget` elapses; the caller
/// simply omits the certificate context keys.
pub async fn certificate_expiry(host: &str, port: u16, budget: Duration) -> Option<CertExpiry> {
    match tokio::time::timeout(budget, fetch_not_after(host, port)).await {
        Ok(Ok(not_after)) => Some(expiry_from(not_after, Utc::now())),
        Ok(Err(e)) => {
            tracing::debug!(host, error = %e, "certificate expiry probe failed");
            None
        }
        Err(_) => {
            tracing::debug!(host, "certificate expiry probe timed out");
            None
        }
    }
}

async fn fetch_not_after(host: &str, port: u16) -> anyhow::Result<DateTime<Utc>> {
    let connector = TlsConnector::from(Arc::new(unverified_config()));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| anyhow::anyhow!("invalid server name: {e}"))?;

    let tcp = TcpStream::connect((host, port)).await?;
    let stream = connector.connect(server_name, tcp).await?;

    let (_io, conn) = stream.into_inner();
    let certs = conn
        .peer_certificates()
        .ok_or_else(|| anyhow::anyhow!("no peer certificates"))?;
    let leaf = certs
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty certificate chain"))?;

    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| anyhow::anyhow!("failed to parse X.509 certificate: {e}"))?;
    let not_after = cert.validity().not_after.to_datetime();
    DateTime::from_timestamp(not_after.unix_timestamp(), 0)
        .ok_or_else(|| anyhow::anyhow!("certificate not_after out of range"))
}

/// `days` is floored, so a certificate 12 hours from expiry reports 0 days /
/// "12h", and one already expired reports negative days / "0h".
fn expiry_from(not_after: DateTime<Utc>, now: DateTime<Utc>) -> CertExpiry {
    let seconds = (not_after - now).num_seconds();
    let days = seconds.div_euclid(86_400);
    let label = if days >= 1 {
        format!("{days}d")
    } else {
        let hours = seconds.div_euclid(3_600).max(0);
        format!("{hours}h")
    };
    CertExpiry { days, label }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn whole_days_format_as_days() {
        let now = Utc::now();
        let expiry = expiry_from(now + ChronoDuration::days(30), now);
        assert_eq!(expiry.days, 30);
        assert_eq!(expiry.label, "30d");
    }

    #[test]
    fn under_a_day_formats_as_hours() {
        let now = Utc::now();
        let expiry = expiry_from(now + ChronoDuration::hours(5), now);
        assert_eq!(expiry.days, 0);
        assert_eq!(expiry.label, "5h");
    }

    #[test]
    fn expired_certificate_floors_hours_at_zero() {
        let now = Utc::now();
        let expiry = expiry_from(now - ChronoDuration::hours(3), now);
        assert!(expiry.days < 0);
        assert_eq!(expiry.label, "0h");
    }

    #[test]
    fn partial_day_floors_down() {
        let now = Utc::now();
        let expiry = expiry_from(now + ChronoDuration::hours(36), now);
        assert_eq!(expiry.days, 1);
        assert_eq!(expiry.label, "1d");
    }
}
