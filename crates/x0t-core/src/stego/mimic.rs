//! Cover-protocol headers
//!
//! Every header ends with a marker that cannot occur inside base64 text, so
//! the decoder can find where the payload region starts.

use crate::error::{Error, Result};
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpCode, IcmpTypes};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol a stego packet is disguised as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimicProtocol {
    /// HTTP/1.1 GET request
    Http,
    /// ICMP echo request
    Icmp,
    /// DNS query
    Dns,
}

/// Marker terminating the HTTP header
pub const HTTP_MARKER: &[u8] = b"X-Stego-Mesh: 1\r\n\r\n";
/// Marker terminating the ICMP header
pub const ICMP_MARKER: &[u8] = b"X0T-ICMP";
/// Marker terminating the DNS header
pub const DNS_MARKER: &[u8] = b"X0T-DNS";

const HTTP_PREAMBLE: &[u8] = b"GET /index.html HTTP/1.1\r\n\
Host: cloudflare.com\r\n\
User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64)\r\n\
Accept: */*\r\n";

const ICMP_PADDING: [u8; 8] = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17];

const DNS_QNAME: &[&str] = &["stego", "x0tta6bl4", "mesh"];

impl MimicProtocol {
    /// All protocols in decoder search order
    pub const ALL: [MimicProtocol; 3] = [MimicProtocol::Http, MimicProtocol::Icmp, MimicProtocol::Dns];

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            MimicProtocol::Http => "http",
            MimicProtocol::Icmp => "icmp",
            MimicProtocol::Dns => "dns",
        }
    }

    /// Marker bytes that close this protocol's header
    pub fn marker(&self) -> &'static [u8] {
        match self {
            MimicProtocol::Http => HTTP_MARKER,
            MimicProtocol::Icmp => ICMP_MARKER,
            MimicProtocol::Dns => DNS_MARKER,
        }
    }

    /// Build a fresh header, marker included
    pub fn header(&self) -> Vec<u8> {
        match self {
            MimicProtocol::Http => http_header(),
            MimicProtocol::Icmp => icmp_header(),
            MimicProtocol::Dns => dns_header(),
        }
    }
}

impl std::fmt::Display for MimicProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MimicProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "http" => Ok(MimicProtocol::Http),
            "icmp" => Ok(MimicProtocol::Icmp),
            "dns" => Ok(MimicProtocol::Dns),
            _ => Err(Error::config_value("mimic", format!("Unknown mimic protocol: {s}"))),
        }
    }
}

fn http_header() -> Vec<u8> {
    let mut out = Vec::with_capacity(HTTP_PREAMBLE.len() + HTTP_MARKER.len());
    out.extend_from_slice(HTTP_PREAMBLE);
    out.extend_from_slice(HTTP_MARKER);
    out
}

fn icmp_header() -> Vec<u8> {
    let mut echo = [0u8; 8];
    if let Some(mut pkt) = MutableEchoRequestPacket::new(&mut echo) {
        pkt.set_icmp_type(IcmpTypes::EchoRequest);
        pkt.set_icmp_code(IcmpCode::new(0));
        pkt.set_checksum(0);
        pkt.set_identifier(rand::thread_rng().gen());
        pkt.set_sequence_number(1);
    }

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&echo);
    out.extend_from_slice(&millis.to_be_bytes());
    out.extend_from_slice(&ICMP_PADDING);
    out.extend_from_slice(ICMP_MARKER);
    out
}

fn dns_header() -> Vec<u8> {
    let id: u16 = rand::thread_rng().gen();
    let mut out = Vec::with_capacity(48);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&0x0100u16.to_be_bytes()); // standard query, RD
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&[0; 6]); // an/ns/ar counts
    for label in DNS_QNAME {
        // labels are static and short
        out.push(u8::try_from(label.len()).unwrap_or(0));
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&1u16.to_be_bytes()); // qtype A
    out.extend_from_slice(&1u16.to_be_bytes()); // qclass IN
    out.extend_from_slice(DNS_MARKER);
    out
}
