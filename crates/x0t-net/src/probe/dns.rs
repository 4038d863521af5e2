//! DNS manipulation probe
//!
//! The local answer comes from the system resolver, or from
//! `probe.local_resolver` when set. Control answers come from a raw A query
//! sent over UDP to each configured control resolver.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::json;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, instrument, warn};
use x0t_core::BlockingType;

use super::{CensorshipDetector, DetectionResult, Verdict};
use crate::error::{NetError, Result};
use crate::transport::millis;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const MAX_RESPONSE: usize = 4096;

/// Recursive A query for `domain`
pub fn build_query(id: u16, domain: &str) -> Result<Vec<u8>> {
    let name = domain.trim_end_matches('.');
    let mut buf = BytesMut::with_capacity(HEADER_LEN + name.len() + 6);
    buf.put_u16(id);
    buf.put_u16(0x0100); // RD
    buf.put_u16(1);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(NetError::invalid_config(format!("invalid domain name: {domain}")));
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    buf.put_u16(TYPE_A);
    buf.put_u16(CLASS_IN);
    Ok(buf.to_vec())
}

fn truncated() -> NetError {
    NetError::Decode("truncated DNS response".into())
}

fn skip_name(buf: &mut &[u8]) -> Result<()> {
    loop {
        if !buf.has_remaining() {
            return Err(truncated());
        }
        let len = buf.get_u8();
        match len {
            0 => return Ok(()),
            l if l & 0xC0 == 0xC0 => {
                if !buf.has_remaining() {
                    return Err(truncated());
                }
                buf.advance(1);
                return Ok(());
            }
            l => {
                let l = usize::from(l & 0x3F);
                if buf.remaining() < l {
                    return Err(truncated());
                }
                buf.advance(l);
            }
        }
    }
}

/// IPv4 addresses in the answer section of a response to query `id`
pub fn parse_a_records(response: &[u8], id: u16) -> Result<Vec<Ipv4Addr>> {
    let mut buf = response;
    if buf.remaining() < HEADER_LEN {
        return Err(truncated());
    }
    let response_id = buf.get_u16();
    let flags = buf.get_u16();
    let qdcount = buf.get_u16();
    let ancount = buf.get_u16();
    buf.advance(4);

    if response_id != id {
        return Err(NetError::Decode(format!(
            "DNS response id {response_id:#06x} does not match query {id:#06x}"
        )));
    }
    if flags & 0x8000 == 0 {
        return Err(NetError::Decode("DNS message is not a response".into()));
    }
    let rcode = flags & 0x000F;
    if rcode != 0 {
        return Err(NetError::Decode(format!("DNS server answered with rcode {rcode}")));
    }

    for _ in 0..qdcount {
        skip_name(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(truncated());
        }
        buf.advance(4);
    }

    let mut addrs = Vec::with_capacity(usize::from(ancount));
    for _ in 0..ancount {
        skip_name(&mut buf)?;
        if buf.remaining() < 10 {
            return Err(truncated());
        }
        let rtype = buf.get_u16();
        let class = buf.get_u16();
        buf.advance(4); // TTL
        let rdlength = usize::from(buf.get_u16());
        if buf.remaining() < rdlength {
            return Err(truncated());
        }
        if rtype == TYPE_A && class == CLASS_IN && rdlength == 4 {
            addrs.push(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
        }
        buf.advance(rdlength);
    }
    Ok(addrs)
}

async fn exchange(socket: &UdpSocket, query: &[u8], id: u16) -> Result<Vec<Ipv4Addr>> {
    socket.send(query).await?;
    let mut buf = vec![0u8; MAX_RESPONSE];
    loop {
        let n = socket.recv(&mut buf).await?;
        // stray datagrams for other ids are ignored
        if n >= 2 && u16::from_be_bytes([buf[0], buf[1]]) != id {
            continue;
        }
        return parse_a_records(&buf[..n], id);
    }
}

/// Send one A query to `server` and collect the answers
pub async fn query_a(server: SocketAddr, domain: &str, timeout: Duration) -> Result<Vec<Ipv4Addr>> {
    let id: u16 = rand::random();
    let query = build_query(id, domain)?;

    let bind: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;

    tokio::time::timeout(timeout, exchange(&socket, &query, id))
        .await
        .map_err(|_| NetError::Timeout {
            operation: "dns",
            after_ms: millis(timeout),
        })?
}

/// Compare the local answer with the expected set, or failing that the control consensus
pub fn classify_dns(
    local: &BTreeSet<IpAddr>,
    control: &BTreeSet<IpAddr>,
    expected: Option<&BTreeSet<IpAddr>>,
) -> Verdict {
    match expected {
        Some(expected) if !expected.is_empty() => {
            if local != expected && local != control {
                Verdict::blocked(BlockingType::DnsManipulation, 0.9)
            } else {
                Verdict::CLEAR
            }
        }
        _ => {
            if !control.is_empty() && local != control {
                Verdict::blocked(BlockingType::DnsManipulation, 0.7)
            } else {
                Verdict::CLEAR
            }
        }
    }
}

impl CensorshipDetector {
    fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.config.dns_timeout_ms)
    }

    async fn resolve_local(&self, domain: &str) -> Result<BTreeSet<IpAddr>> {
        let timeout = self.dns_timeout();
        if let Some(server) = self.config.local_resolver {
            let addrs = query_a(server, domain, timeout).await?;
            return Ok(addrs.into_iter().map(IpAddr::V4).collect());
        }

        let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((domain, 0)))
            .await
            .map_err(|_| NetError::Timeout {
                operation: "dns",
                after_ms: millis(timeout),
            })??;
        Ok(addrs.map(|a| a.ip()).filter(IpAddr::is_ipv4).collect())
    }

    /// Compare local DNS answers for `domain` against control resolvers
    ///
    /// `expected_ips` falls back to `probe.expected_dns[domain]`.
    #[instrument(skip(self, expected_ips))]
    pub async fn detect_dns_manipulation(
        &self,
        domain: &str,
        expected_ips: Option<&[IpAddr]>,
    ) -> DetectionResult {
        let started = Instant::now();
        let expected: Option<BTreeSet<IpAddr>> = expected_ips
            .or_else(|| self.config.expected_dns.get(domain).map(Vec::as_slice))
            .map(|ips| ips.iter().copied().collect());

        let local = match self.resolve_local(domain).await {
            Ok(local) => local,
            Err(e) => {
                warn!(domain, error = %e, "Local DNS lookup failed");
                return DetectionResult::failed(domain, e, started);
            }
        };

        let mut control = BTreeSet::new();
        for server in &self.config.control_resolvers {
            match query_a(*server, domain, self.dns_timeout()).await {
                Ok(addrs) => control.extend(addrs.into_iter().map(IpAddr::V4)),
                Err(e) => debug!(%server, error = %e, "Control resolver failed"),
            }
        }

        let verdict = classify_dns(&local, &control, expected.as_ref());
        debug!(domain, ?verdict, "DNS probe classified");
        DetectionResult::from_verdict(
            domain,
            verdict,
            json!({
                "local_ips": local,
                "control_ips": control,
                "expected_ips": expected,
            }),
            started,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ips: &[&str]) -> BTreeSet<IpAddr> {
        ips.iter().map(|ip| ip.parse().unwrap()).collect()
    }

    fn answer(query: &[u8], ips: &[[u8; 4]]) -> Vec<u8> {
        let mut resp = query.to_vec();
        resp[2] = 0x81;
        resp[3] = 0x80;
        resp[6..8].copy_from_slice(&(ips.len() as u16).to_be_bytes());
        for ip in ips {
            resp.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4]);
            resp.extend_from_slice(ip);
        }
        resp
    }

    #[test]
    fn test_query_layout() {
        let q = build_query(0xBEEF, "example.com").unwrap();
        assert_eq!(&q[..4], &[0xBE, 0xEF, 0x01, 0x00]);
        assert_eq!(&q[4..6], &[0, 1]);
        assert_eq!(&q[12..20], b"\x07example");
        assert_eq!(&q[q.len() - 5..], &[0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_query_rejects_bad_names() {
        assert!(build_query(1, "a..b").is_err());
        assert!(build_query(1, &"x".repeat(64)).is_err());
        assert!(build_query(1, "trailing.dot.").is_ok());
    }

    #[test]
    fn test_parse_compressed_answers() {
        let q = build_query(7, "example.com").unwrap();
        let resp = answer(&q, &[[93, 184, 216, 34], [10, 0, 0, 1]]);
        let addrs = parse_a_records(&resp, 7).unwrap();
        assert_eq!(
            addrs,
            vec![Ipv4Addr::new(93, 184, 216, 34), Ipv4Addr::new(10, 0, 0, 1)]
        );
    }

    #[test]
    fn test_parse_rejects_mismatch_and_rcode() {
        let q = build_query(7, "example.com").unwrap();
        let resp = answer(&q, &[[1, 2, 3, 4]]);
        assert!(parse_a_records(&resp, 8).is_err());

        let mut nx = resp.clone();
        nx[3] = 0x83;
        assert!(parse_a_records(&nx, 7).is_err());

        assert!(parse_a_records(&resp[..resp.len() - 2], 7).is_err());
        assert!(parse_a_records(&q, 7).is_err());
    }

    #[test]
    fn test_classify_expected_mismatch() {
        let verdict = classify_dns(
            &set(&["10.10.34.35"]),
            &set(&["93.184.216.34"]),
            Some(&set(&["93.184.216.34"])),
        );
        assert_eq!(verdict.blocking_type, BlockingType::DnsManipulation);
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn test_classify_matches_control_despite_expected() {
        let verdict = classify_dns(
            &set(&["1.1.1.1"]),
            &set(&["1.1.1.1"]),
            Some(&set(&["9.9.9.9"])),
        );
        assert_eq!(verdict, Verdict::CLEAR);
    }

    #[test]
    fn test_classify_control_only() {
        let verdict = classify_dns(&set(&["10.0.0.1"]), &set(&["1.2.3.4"]), None);
        assert_eq!(verdict.confidence, 0.7);
        assert!(verdict.is_blocked);

        let empty_expected = BTreeSet::new();
        let verdict = classify_dns(&set(&["10.0.0.1"]), &set(&["1.2.3.4"]), Some(&empty_expected));
        assert_eq!(verdict.confidence, 0.7);

        assert_eq!(classify_dns(&set(&["10.0.0.1"]), &BTreeSet::new(), None), Verdict::CLEAR);
    }
}
