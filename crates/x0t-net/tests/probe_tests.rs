//! Probe suite against loopback collaborators

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use x0t_core::config::ProbeConfig;
use x0t_core::BlockingType;
use x0t_net::probe::query_a;
use x0t_net::CensorshipDetector;

fn fast_config() -> ProbeConfig {
    ProbeConfig {
        dns_timeout_ms: 1_000,
        tcp_timeout_ms: 1_000,
        tls_timeout_ms: 1_000,
        http_timeout_ms: 2_000,
        retries: 3,
        retry_backoff_ms: 10,
        control_resolvers: Vec::new(),
        ..ProbeConfig::default()
    }
}

/// UDP resolver answering every A query with `ip`
async fn fake_resolver(ip: Ipv4Addr) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let mut resp = buf[..n].to_vec();
            resp[2] = 0x81;
            resp[3] = 0x80;
            resp[6] = 0;
            resp[7] = 1;
            resp.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 30, 0, 4]);
            resp.extend_from_slice(&ip.octets());
            let _ = socket.send_to(&resp, peer).await;
        }
    });
    addr
}

/// One-shot HTTP server returning `response` verbatim
async fn http_server(response: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            raw.extend_from_slice(&buf[..n]);
        }
        sock.write_all(response.as_bytes()).await.unwrap();
    });
    port
}

#[tokio::test]
async fn test_query_a_against_fake_resolver() {
    let server = fake_resolver(Ipv4Addr::new(203, 0, 113, 7)).await;
    let addrs = query_a(server, "example.org", Duration::from_secs(1)).await.unwrap();
    assert_eq!(addrs, vec![Ipv4Addr::new(203, 0, 113, 7)]);
}

#[tokio::test]
async fn test_query_a_times_out() {
    // bound but silent
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let err = query_a(silent.local_addr().unwrap(), "example.org", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_dns_poisoned_local_resolver() {
    let poisoned = fake_resolver(Ipv4Addr::new(10, 10, 34, 35)).await;
    let control = fake_resolver(Ipv4Addr::new(93, 184, 216, 34)).await;

    let config = ProbeConfig {
        local_resolver: Some(poisoned),
        control_resolvers: vec![control],
        ..fast_config()
    };
    let detector = CensorshipDetector::new(config).unwrap();

    let result = detector.detect_dns_manipulation("example.com", None).await;
    assert_eq!(result.blocking_type, BlockingType::DnsManipulation);
    assert!(result.is_blocked);
    assert_eq!(result.confidence, 0.7);
    assert_eq!(result.details["local_ips"][0], "10.10.34.35");

    let expected = [IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))];
    let result = detector
        .detect_dns_manipulation("example.com", Some(&expected))
        .await;
    assert_eq!(result.confidence, 0.9);
}

#[tokio::test]
async fn test_dns_consistent_answers_clear() {
    let resolver = fake_resolver(Ipv4Addr::new(93, 184, 216, 34)).await;
    let config = ProbeConfig {
        local_resolver: Some(resolver),
        control_resolvers: vec![resolver],
        ..fast_config()
    };
    let detector = CensorshipDetector::new(config).unwrap();
    let result = detector.detect_dns_manipulation("example.com", None).await;
    assert_eq!(result.blocking_type, BlockingType::None);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_dns_local_failure_is_unknown() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = ProbeConfig {
        local_resolver: Some(silent.local_addr().unwrap()),
        dns_timeout_ms: 100,
        ..fast_config()
    };
    let detector = CensorshipDetector::new(config).unwrap();
    let result = detector.detect_dns_manipulation("example.com", None).await;
    assert_eq!(result.blocking_type, BlockingType::Unknown);
    assert!(!result.is_blocked);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_tcp_open_port_clear() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector.detect_tcp_blocking("127.0.0.1", port).await;
    assert_eq!(result.blocking_type, BlockingType::None);
    assert_eq!(result.details["success_rate"], 1.0);
    assert_eq!(result.details["attempts"].as_array().unwrap().len(), 3);
    assert_eq!(result.target, format!("127.0.0.1:{port}"));
}

#[tokio::test]
async fn test_tcp_refused_not_blocked() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector.detect_tcp_blocking("127.0.0.1", port).await;
    assert!(!result.is_blocked);
    assert_eq!(result.details["success_rate"], 0.0);
    assert_eq!(result.details["attempts"][0]["outcome"], "refused");
}

#[tokio::test]
async fn test_http_451_detected() {
    let port = http_server(
        "HTTP/1.1 451 Unavailable For Legal Reasons\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    )
    .await;
    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector
        .detect_http_blocking(&format!("http://127.0.0.1:{port}/"), None)
        .await;
    assert_eq!(result.blocking_type, BlockingType::HttpBlocking);
    assert_eq!(result.confidence, 0.9);
    assert_eq!(result.details["status_code"], 451);
}

#[tokio::test]
async fn test_http_block_page_redirect_not_followed() {
    let port = http_server(
        "HTTP/1.1 302 Found\r\nlocation: http://warning.isp.example/blocked\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    )
    .await;
    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector
        .detect_http_blocking(&format!("http://127.0.0.1:{port}/"), None)
        .await;
    assert_eq!(result.confidence, 0.8);
    assert_eq!(
        result.details["redirect_location"],
        "http://warning.isp.example/blocked"
    );
}

#[tokio::test]
async fn test_http_expected_content_missing() {
    let port = http_server(
        "HTTP/1.1 200 OK\r\ncontent-length: 13\r\nconnection: close\r\n\r\naccess denied",
    )
    .await;
    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector
        .detect_http_blocking(&format!("http://127.0.0.1:{port}/"), Some("<!doctype html>"))
        .await;
    assert!(result.is_blocked);
    assert_eq!(result.confidence, 0.6);
}

#[tokio::test]
async fn test_tls_against_plain_tcp_is_unknown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = sock.read(&mut buf).await;
        let _ = sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
    });

    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector.detect_tls_interception("localhost", port).await;
    assert_eq!(result.blocking_type, BlockingType::Unknown);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_throttle_against_sink() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 65536];
        while let Ok(n) = sock.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector
        .detect_throttling("127.0.0.1", port, Some(Duration::from_millis(300)))
        .await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(matches!(
        result.blocking_type,
        BlockingType::None | BlockingType::Throttling
    ));
    assert!(result.details["samples"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn test_throttle_unreachable_is_unknown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let detector = CensorshipDetector::new(fast_config()).unwrap();
    let result = detector
        .detect_throttling("127.0.0.1", port, Some(Duration::from_millis(50)))
        .await;
    assert_eq!(result.blocking_type, BlockingType::Unknown);
}

#[tokio::test]
async fn test_full_scan_stores_results() {
    let resolver = fake_resolver(Ipv4Addr::LOCALHOST).await;
    let config = ProbeConfig {
        local_resolver: Some(resolver),
        control_resolvers: vec![resolver],
        retries: 1,
        ..fast_config()
    };
    let detector = CensorshipDetector::new(config).unwrap();

    let results = detector
        .run_full_scan(&["localhost".to_string()], false)
        .await;
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].blocking_type, BlockingType::None);

    let summary = detector.summary();
    assert_eq!(summary.total_tests, 4);
    assert!(summary.last_scan_ms.is_some());
    assert_eq!(detector.results().len(), 4);

    detector.clear_results();
    assert_eq!(detector.summary().total_tests, 0);
}
