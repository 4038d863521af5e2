//! Censorship probe suite
//!
//! Each probe talks to the real network and folds every failure into the
//! returned [`DetectionResult`] as `blocking_type = Unknown` with the error
//! message attached. The classification rules are plain functions
//! ([`classify_dns`], [`classify_tcp`], [`classify_certificate`],
//! [`classify_http`], [`analyze_throughput`]) so they can be checked without a
//! network.

mod dns;
mod http;
mod tcp;
mod throttle;
mod tls;

pub use dns::{build_query, classify_dns, parse_a_records, query_a};
pub use http::classify_http;
pub use tcp::{classify_connect_error, classify_tcp, ConnectOutcome};
pub use throttle::{analyze_throughput, ThroughputAnalysis};
pub use tls::{classify_certificate, parse_certificate, CertificateInfo};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_rustls::TlsConnector;
use tracing::{info, instrument};
use x0t_core::config::ProbeConfig;
use x0t_core::BlockingType;

use crate::error::Result;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Classified mechanism
    pub blocking_type: BlockingType,
    /// Interference detected
    pub is_blocked: bool,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Domain, `host:port` or URL probed
    pub target: String,
    /// Probe-specific evidence
    #[serde(default)]
    pub details: Value,
    /// Unix time in milliseconds when the probe finished
    pub timestamp_ms: u64,
    /// Wall time spent probing
    pub latency_ms: f64,
    /// Failure message when the probe could not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Classification produced by a rule function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// Mechanism
    pub blocking_type: BlockingType,
    /// Interference detected
    pub is_blocked: bool,
    /// 0.0 to 1.0
    pub confidence: f64,
}

impl Verdict {
    /// Nothing detected
    pub const CLEAR: Self = Self {
        blocking_type: BlockingType::None,
        is_blocked: false,
        confidence: 0.0,
    };

    /// Interference of `blocking_type`
    pub fn blocked(blocking_type: BlockingType, confidence: f64) -> Self {
        Self {
            blocking_type,
            is_blocked: true,
            confidence,
        }
    }
}

impl DetectionResult {
    pub(crate) fn from_verdict(
        target: impl Into<String>,
        verdict: Verdict,
        details: Value,
        started: Instant,
    ) -> Self {
        Self {
            blocking_type: verdict.blocking_type,
            is_blocked: verdict.is_blocked,
            confidence: verdict.confidence,
            target: target.into(),
            details,
            timestamp_ms: unix_millis(),
            latency_ms: elapsed_ms(started),
            error: None,
        }
    }

    pub(crate) fn failed(target: impl Into<String>, error: impl Display, started: Instant) -> Self {
        Self {
            blocking_type: BlockingType::Unknown,
            is_blocked: false,
            confidence: 0.0,
            target: target.into(),
            details: json!({}),
            timestamp_ms: unix_millis(),
            latency_ms: elapsed_ms(started),
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate over stored scan results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Results stored
    pub total_tests: usize,
    /// Results flagged as blocked
    pub blocked_count: usize,
    /// `blocked_count / total_tests`
    pub block_rate: f64,
    /// Result count per blocking type name
    pub by_type: BTreeMap<String, usize>,
    /// Latest result timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_ms: Option<u64>,
}

/// Runs probes and keeps the results of full scans
pub struct CensorshipDetector {
    config: ProbeConfig,
    http: reqwest::Client,
    tls: TlsConnector,
    results: RwLock<Vec<DetectionResult>>,
}

impl std::fmt::Debug for CensorshipDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CensorshipDetector")
            .field("config", &self.config)
            .field("stored_results", &self.results.read().len())
            .finish_non_exhaustive()
    }
}

impl CensorshipDetector {
    /// Build the HTTP client and TLS connector for `config`
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let http = http::build_client(&config)?;
        let tls = tls::build_connector()?;
        Ok(Self {
            config,
            http,
            tls,
            results: RwLock::new(Vec::new()),
        })
    }

    /// Probe configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// DNS, TCP, TLS and HTTP probes per target, plus throttling on request
    ///
    /// Results are stored for [`summary`](Self::summary) and returned.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn run_full_scan(
        &self,
        targets: &[String],
        include_throttling: bool,
    ) -> Vec<DetectionResult> {
        let mut results = Vec::with_capacity(targets.len() * 5);

        for target in targets {
            let url = format!("https://{target}");
            let (dns, tcp, tls, http) = tokio::join!(
                self.detect_dns_manipulation(target, None),
                self.detect_tcp_blocking(target, 443),
                self.detect_tls_interception(target, 443),
                self.detect_http_blocking(&url, None),
            );
            results.extend([dns, tcp, tls, http]);

            if include_throttling {
                results.push(self.detect_throttling(target, 443, None).await);
            }
        }

        let blocked = results.iter().filter(|r| r.is_blocked).count();
        info!(total = results.len(), blocked, "Scan finished");
        self.results.write().extend(results.iter().cloned());
        results
    }

    /// Aggregate over every stored result
    pub fn summary(&self) -> ScanSummary {
        let results = self.results.read();
        let blocked_count = results.iter().filter(|r| r.is_blocked).count();

        let mut by_type = BTreeMap::new();
        for result in results.iter() {
            *by_type.entry(result.blocking_type.as_str().to_string()).or_insert(0) += 1;
        }

        ScanSummary {
            total_tests: results.len(),
            blocked_count,
            block_rate: if results.is_empty() {
                0.0
            } else {
                blocked_count as f64 / results.len() as f64
            },
            by_type,
            last_scan_ms: results.iter().map(|r| r.timestamp_ms).max(),
        }
    }

    /// Stored results
    pub fn results(&self) -> Vec<DetectionResult> {
        self.results.read().clone()
    }

    /// Drop stored results
    pub fn clear_results(&self) {
        self.results.write().clear();
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> CensorshipDetector {
        CensorshipDetector::new(ProbeConfig::default()).unwrap()
    }

    #[test]
    fn test_summary_empty() {
        let summary = detector().summary();
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.block_rate, 0.0);
        assert!(summary.last_scan_ms.is_none());
    }

    #[test]
    fn test_summary_counts_by_type() {
        let d = detector();
        let started = Instant::now();
        d.results.write().extend([
            DetectionResult::from_verdict(
                "a",
                Verdict::blocked(BlockingType::TcpReset, 0.9),
                json!({}),
                started,
            ),
            DetectionResult::from_verdict("b", Verdict::CLEAR, json!({}), started),
            DetectionResult::failed("c", "boom", started),
            DetectionResult::from_verdict(
                "d",
                Verdict::blocked(BlockingType::TcpReset, 0.9),
                json!({}),
                started,
            ),
        ]);

        let summary = d.summary();
        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.blocked_count, 2);
        assert!((summary.block_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.by_type["tcp_reset"], 2);
        assert_eq!(summary.by_type["unknown"], 1);
        assert!(summary.last_scan_ms.is_some());

        d.clear_results();
        assert_eq!(d.summary().total_tests, 0);
    }

    #[test]
    fn test_failed_result_shape() {
        let result = DetectionResult::failed("example.com", "connection refused", Instant::now());
        assert_eq!(result.blocking_type, BlockingType::Unknown);
        assert!(!result.is_blocked);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error.as_deref(), Some("connection refused"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["blocking_type"], "unknown");
        assert!(json["timestamp_ms"].as_u64().unwrap() > 0);
    }
}
