//! TLS interception probe
//!
//! Chains are verified against the system trust store. A verification failure is
//! itself strong evidence of a substituted certificate; a verified chain is
//! still checked for an unfamiliar issuer and a subject that does not name the
//! host.

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use x0t_core::BlockingType;

use super::{CensorshipDetector, DetectionResult, Verdict};
use crate::error::{NetError, Result};
use crate::transport::millis;

/// Fields of the leaf certificate the probe looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    /// Issuer distinguished name
    pub issuer: String,
    /// Issuer organisation (O)
    pub issuer_org: Option<String>,
    /// Subject distinguished name
    pub subject: String,
    /// Subject common name (CN)
    pub common_name: Option<String>,
}

pub(crate) fn build_connector() -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(rustls_native_certs::load_native_certs()?);
    if added == 0 {
        warn!("No system root certificates found, every chain will fail verification");
    }
    debug!(added, ignored, "Loaded system root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::invalid_config(format!("TLS setup: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Extract issuer and subject from a DER certificate
pub fn parse_certificate(der: &[u8]) -> Result<CertificateInfo> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| NetError::Decode(format!("certificate: {e}")))?;

    let first = |attr: Option<&x509_parser::x509::AttributeTypeAndValue<'_>>| {
        attr.and_then(|a| a.as_str().ok()).map(str::to_string)
    };

    let info = CertificateInfo {
        issuer: cert.issuer().to_string(),
        issuer_org: first(cert.issuer().iter_organization().next()),
        subject: cert.subject().to_string(),
        common_name: first(cert.subject().iter_common_name().next()),
    };
    Ok(info)
}

fn name_matches(host: &str, common_name: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let cn = common_name.to_ascii_lowercase();
    if cn.contains(&host) {
        return true;
    }
    // *.example.com covers exactly one extra label
    match cn.strip_prefix("*.") {
        Some(suffix) => host
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.')),
        None => false,
    }
}

/// Unknown issuer organisation, then subject/host mismatch
pub fn classify_certificate(host: &str, cert: &CertificateInfo, known_issuers: &[String]) -> Verdict {
    let mut verdict = Verdict::CLEAR;

    if let Some(org) = cert.issuer_org.as_deref().filter(|o| !o.is_empty()) {
        let org = org.to_lowercase();
        if !known_issuers.iter().any(|ca| org.contains(&ca.to_lowercase())) {
            verdict = Verdict::blocked(BlockingType::TlsInterception, 0.6);
        }
    }

    if let Some(cn) = cert.common_name.as_deref().filter(|cn| !cn.is_empty()) {
        if !name_matches(host, cn) {
            verdict = Verdict::blocked(BlockingType::TlsInterception, verdict.confidence.max(0.8));
        }
    }

    verdict
}

fn is_verification_failure(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|e| matches!(e, rustls::Error::InvalidCertificate(_)))
}

enum Handshake {
    Verified(Option<CertificateInfo>),
    Rejected(String),
}

async fn handshake(
    connector: &TlsConnector,
    server_name: ServerName<'static>,
    host: &str,
    port: u16,
) -> Result<Handshake> {
    let tcp = TcpStream::connect((host, port)).await?;
    match connector.connect(server_name, tcp).await {
        Ok(stream) => {
            let (_, conn) = stream.get_ref();
            let leaf = conn.peer_certificates().and_then(|chain| chain.first());
            let info = leaf.map(|der| parse_certificate(der.as_ref())).transpose()?;
            Ok(Handshake::Verified(info))
        }
        Err(e) if is_verification_failure(&e) => Ok(Handshake::Rejected(e.to_string())),
        Err(e) => Err(NetError::Io(e)),
    }
}

impl CensorshipDetector {
    async fn tls_handshake(&self, host: &str, port: u16) -> Result<Handshake> {
        let timeout = Duration::from_millis(self.config.tls_timeout_ms);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| NetError::invalid_config(format!("server name {host}: {e}")))?;

        tokio::time::timeout(timeout, handshake(&self.tls, server_name, host, port))
            .await
            .map_err(|_| NetError::Timeout {
                operation: "tls",
                after_ms: millis(timeout),
            })?
    }

    /// Handshake with `host:port` and inspect the presented certificate
    #[instrument(skip(self))]
    pub async fn detect_tls_interception(&self, host: &str, port: u16) -> DetectionResult {
        let started = Instant::now();
        let target = format!("{host}:{port}");

        match self.tls_handshake(host, port).await {
            Ok(Handshake::Verified(info)) => {
                let info = info.unwrap_or_default();
                let verdict = classify_certificate(host, &info, &self.config.known_issuers);
                debug!(?verdict, issuer = ?info.issuer_org, "TLS probe classified");
                DetectionResult::from_verdict(target, verdict, json!({ "certificate": info }), started)
            }
            Ok(Handshake::Rejected(reason)) => {
                warn!(%target, %reason, "Certificate verification failed");
                let mut result = DetectionResult::from_verdict(
                    target,
                    Verdict::blocked(BlockingType::TlsInterception, 0.9),
                    json!({}),
                    started,
                );
                result.error = Some(reason);
                result
            }
            Err(e) => DetectionResult::failed(target, e, started),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        x0t_core::config::ProbeConfig::default().known_issuers
    }

    fn cert(org: &str, cn: &str) -> CertificateInfo {
        CertificateInfo {
            issuer_org: Some(org.to_string()),
            common_name: Some(cn.to_string()),
            ..CertificateInfo::default()
        }
    }

    #[test]
    fn test_known_issuer_matching_name_clear() {
        let verdict = classify_certificate("example.com", &cert("Let's Encrypt", "example.com"), &known());
        assert_eq!(verdict, Verdict::CLEAR);
    }

    #[test]
    fn test_unknown_issuer() {
        let verdict = classify_certificate("example.com", &cert("Corp Proxy CA", "example.com"), &known());
        assert_eq!(verdict.blocking_type, BlockingType::TlsInterception);
        assert_eq!(verdict.confidence, 0.6);
    }

    #[test]
    fn test_name_mismatch_raises_confidence() {
        let verdict = classify_certificate("example.com", &cert("Corp Proxy CA", "blocked.gov"), &known());
        assert_eq!(verdict.confidence, 0.8);
        let verdict = classify_certificate("example.com", &cert("DigiCert Inc", "other.net"), &known());
        assert_eq!(verdict.confidence, 0.8);
    }

    #[test]
    fn test_wildcard_names() {
        assert!(name_matches("www.example.com", "*.example.com"));
        assert!(!name_matches("a.b.example.com", "*.example.com"));
        assert!(!name_matches("example.com", "*.example.com"));
        assert!(name_matches("Example.COM", "example.com"));
    }

    #[test]
    fn test_missing_fields_are_clear() {
        assert_eq!(
            classify_certificate("example.com", &CertificateInfo::default(), &known()),
            Verdict::CLEAR
        );
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(parse_certificate(b"not a certificate").is_err());
    }

    #[test]
    fn test_connector_builds() {
        assert!(build_connector().is_ok());
    }
}
