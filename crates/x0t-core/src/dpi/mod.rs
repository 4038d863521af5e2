//! Synthetic DPI model
//!
//! A small deep-packet-inspection engine used as the fitness oracle for the
//! evasion optimizer. The verdict order is fixed:
//!
//! 1. mimic signatures (HTTP, DNS, ICMP), first match wins
//! 2. forbidden signatures, which override any mimic match (threat 10)
//! 3. high entropy without a mimic (threat 7, detected)
//! 4. very high entropy with a mimic (threat 4, allowed)

mod signatures;

pub use signatures::{
    match_mimic, ForbiddenSignature, MatchKind, FORBIDDEN_SIGNATURES, RAW_MESH_SIGNATURE,
};
pub(crate) use signatures::find;

use crate::stego::MimicProtocol;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Entropy above which an unrecognised packet is treated as an encrypted tunnel
pub const RAW_ENTROPY_THRESHOLD: f64 = 7.5;

/// Entropy above which a mimic packet is flagged as suspicious
pub const MIMIC_ENTROPY_THRESHOLD: f64 = 7.8;

/// Name reported for high-entropy packets with no protocol disguise
pub const HIGH_ENTROPY_SIGNATURE: &str = "high_entropy";

/// Censorship mechanism taxonomy shared with the network probe suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingType {
    /// No blocking detected
    None,
    /// Resolver returns forged or poisoned answers
    DnsManipulation,
    /// Connections torn down by injected RSTs
    TcpReset,
    /// Connections silently black-holed
    TcpTimeout,
    /// TLS certificate substituted by a middlebox
    TlsInterception,
    /// Content-based packet filtering
    DpiBlocking,
    /// Bandwidth degraded over the lifetime of a flow
    Throttling,
    /// Block page, 403/451 or redirect
    HttpBlocking,
    /// Probe failed or the result is inconclusive
    Unknown,
}

impl BlockingType {
    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingType::None => "none",
            BlockingType::DnsManipulation => "dns_manipulation",
            BlockingType::TcpReset => "tcp_reset",
            BlockingType::TcpTimeout => "tcp_timeout",
            BlockingType::TlsInterception => "tls_interception",
            BlockingType::DpiBlocking => "dpi_blocking",
            BlockingType::Throttling => "throttling",
            BlockingType::HttpBlocking => "http_blocking",
            BlockingType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BlockingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for a single packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    /// Packet would be blocked
    pub detected: bool,
    /// Name of the signature or heuristic that fired
    pub detected_as: Option<String>,
    /// Packet passes for an allowed protocol
    pub mimic_valid: bool,
    /// Protocol it passes for
    pub mimic_protocol: Option<MimicProtocol>,
    /// Shannon entropy in bits per byte
    pub entropy: f64,
    /// 0 (clean) to 10 (known forbidden protocol)
    pub threat_level: u8,
}

/// The DPI model. Stateless; kept as a type so callers can hold one the way
/// they would hold a real classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DpiModel;

impl DpiModel {
    /// Create a new model
    pub fn new() -> Self {
        Self
    }

    /// Inspect one packet
    pub fn inspect(&self, packet: &[u8]) -> Inspection {
        let entropy = shannon_entropy(packet);
        let mimic = match_mimic(packet);

        let mut result = Inspection {
            detected: false,
            detected_as: None,
            mimic_valid: mimic.is_some(),
            mimic_protocol: mimic,
            entropy,
            threat_level: 0,
        };

        if let Some(sig) = FORBIDDEN_SIGNATURES.iter().find(|s| s.matches(packet)) {
            trace!(signature = sig.name, "Forbidden signature matched");
            result.detected = true;
            result.detected_as = Some(sig.name.to_string());
            result.threat_level = 10;
            return result;
        }

        if !result.mimic_valid && entropy > RAW_ENTROPY_THRESHOLD {
            result.detected = true;
            result.detected_as = Some(HIGH_ENTROPY_SIGNATURE.to_string());
            result.threat_level = 7;
        } else if result.mimic_valid && entropy > MIMIC_ENTROPY_THRESHOLD {
            result.threat_level = 4;
        }

        result
    }
}

/// Shannon entropy of `data` in bits per byte (0.0 for empty input)
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut histogram = [0usize; 256];
    for &b in data {
        histogram[usize::from(b)] += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let len = data.len() as f64;
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[7; 100]), 0.0);

        let all: Vec<u8> = (0..=255).collect();
        assert!((shannon_entropy(&all) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_forbidden_overrides_mimic() {
        let model = DpiModel::new();
        let packet = br#"GET /x HTTP/1.1 {"type":"heartbeat"}"#;
        let verdict = model.inspect(packet);
        assert!(verdict.mimic_valid);
        assert!(verdict.detected);
        assert_eq!(verdict.threat_level, 10);
        assert_eq!(verdict.detected_as.as_deref(), Some(RAW_MESH_SIGNATURE));
    }

    #[test]
    fn test_plain_http_is_clean() {
        let verdict = DpiModel::new().inspect(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert!(!verdict.detected);
        assert!(verdict.mimic_valid);
        assert_eq!(verdict.mimic_protocol, Some(MimicProtocol::Http));
        assert_eq!(verdict.threat_level, 0);
    }

    #[test]
    fn test_high_entropy_mimic_is_allowed() {
        // ICMP header followed by every byte value: entropy close to 8
        let mut packet = vec![8u8, 0, 0, 0, 0, 1, 0, 1];
        for _ in 0..8 {
            packet.extend(0..=255u8);
        }
        let verdict = DpiModel::new().inspect(&packet);
        assert!(verdict.mimic_valid);
        assert!(!verdict.detected);
        assert_eq!(verdict.threat_level, 4);
    }

    #[test]
    fn test_blocking_type_serde() {
        let json = serde_json::to_string(&BlockingType::TlsInterception).unwrap();
        assert_eq!(json, "\"tls_interception\"");
        assert_eq!(BlockingType::TcpReset.to_string(), "tcp_reset");
    }
}
