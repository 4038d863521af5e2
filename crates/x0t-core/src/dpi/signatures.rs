//! Signature tables for the DPI model
//!
//! Mimic signatures are the protocols a disguised packet is allowed to look
//! like. Forbidden signatures are byte patterns of tunnels and of the mesh's
//! own unwrapped control traffic.

use crate::stego::MimicProtocol;
use once_cell::sync::Lazy;

/// How a forbidden pattern is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Pattern must be at offset 0
    Prefix,
    /// Pattern may appear anywhere
    Contains,
}

/// A named forbidden byte pattern
#[derive(Debug, Clone)]
pub struct ForbiddenSignature {
    /// Name reported as `detected_as`
    pub name: &'static str,
    /// Raw pattern
    pub pattern: &'static [u8],
    /// Match mode
    pub kind: MatchKind,
}

impl ForbiddenSignature {
    /// Check whether `packet` carries this signature
    pub fn matches(&self, packet: &[u8]) -> bool {
        match self.kind {
            MatchKind::Prefix => packet.starts_with(self.pattern),
            MatchKind::Contains => contains(packet, self.pattern),
        }
    }
}

/// Name reported for the mesh's own unwrapped heartbeat traffic
pub const RAW_MESH_SIGNATURE: &str = "x0tta6bl4_RAW";

/// Forbidden protocol signatures, checked in order
pub static FORBIDDEN_SIGNATURES: Lazy<Vec<ForbiddenSignature>> = Lazy::new(|| {
    vec![
        // WireGuard handshake initiation: type 1 + three reserved zero bytes
        ForbiddenSignature {
            name: "WireGuard",
            pattern: &[0x01, 0x00, 0x00, 0x00],
            kind: MatchKind::Prefix,
        },
        // OpenVPN over TCP: packet length + P_CONTROL_HARD_RESET_CLIENT_V2
        ForbiddenSignature {
            name: "OpenVPN",
            pattern: &[0x00, 0x0e, 0x38],
            kind: MatchKind::Prefix,
        },
        ForbiddenSignature {
            name: "SOCKS5",
            pattern: &[0x05, 0x01, 0x00],
            kind: MatchKind::Prefix,
        },
        ForbiddenSignature {
            name: "HTTP_CONNECT",
            pattern: b"CONNECT ",
            kind: MatchKind::Prefix,
        },
        ForbiddenSignature {
            name: RAW_MESH_SIGNATURE,
            pattern: br#""type":"heartbeat""#,
            kind: MatchKind::Contains,
        },
        ForbiddenSignature {
            name: RAW_MESH_SIGNATURE,
            pattern: br#""type": "heartbeat""#,
            kind: MatchKind::Contains,
        },
        ForbiddenSignature {
            name: RAW_MESH_SIGNATURE,
            pattern: br#"{"node_id":"#,
            kind: MatchKind::Contains,
        },
    ]
});

const HTTP_METHODS: &[&[u8]] = &[
    b"GET ", b"POST ", b"HEAD ", b"PUT ", b"DELETE ", b"OPTIONS ", b"PATCH ",
];

/// Returns the first mimic protocol `packet` passes for, checked HTTP, DNS, ICMP
pub fn match_mimic(packet: &[u8]) -> Option<MimicProtocol> {
    if is_http(packet) {
        Some(MimicProtocol::Http)
    } else if is_dns(packet) {
        Some(MimicProtocol::Dns)
    } else if is_icmp_echo(packet) {
        Some(MimicProtocol::Icmp)
    } else {
        None
    }
}

fn is_http(packet: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| packet.starts_with(m)) && contains(packet, b"HTTP/1.")
}

fn is_dns(packet: &[u8]) -> bool {
    if packet.len() < 12 {
        return false;
    }
    let flags = u16::from_be_bytes([packet[2], packet[3]]);
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    (flags == 0x0100 || flags == 0x8180) && qdcount == 1
}

fn is_icmp_echo(packet: &[u8]) -> bool {
    // Echo request (8) or reply (0), code 0
    packet.len() >= 8 && (packet[0] == 8 || packet[0] == 0) && packet[1] == 0
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Position of the first occurrence of `needle` in `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find() {
        assert_eq!(find(b"abcdef", b"cd"), Some(2));
        assert_eq!(find(b"abc", b"abcd"), None);
        assert_eq!(find(b"abc", b""), None);
    }

    #[test]
    fn test_http_mimic() {
        assert_eq!(
            match_mimic(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"),
            Some(MimicProtocol::Http)
        );
        assert_eq!(match_mimic(b"GET / SPDY\r\n"), None);
    }

    #[test]
    fn test_dns_mimic() {
        let mut query = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01];
        query.extend_from_slice(&[0; 6]);
        assert_eq!(match_mimic(&query), Some(MimicProtocol::Dns));

        query[5] = 2;
        assert_ne!(match_mimic(&query), Some(MimicProtocol::Dns));
    }

    #[test]
    fn test_icmp_mimic() {
        assert_eq!(
            match_mimic(&[8, 0, 0, 0, 0xab, 0xcd, 0, 1]),
            Some(MimicProtocol::Icmp)
        );
        assert_eq!(match_mimic(&[8, 1, 0, 0, 0, 0, 0, 1]), None);
    }

    #[test]
    fn test_forbidden_prefix_only_at_start() {
        let socks = FORBIDDEN_SIGNATURES
            .iter()
            .find(|s| s.name == "SOCKS5")
            .unwrap();
        assert!(socks.matches(&[0x05, 0x01, 0x00, 0x03]));
        assert!(!socks.matches(&[0xff, 0x05, 0x01, 0x00]));
    }
}
