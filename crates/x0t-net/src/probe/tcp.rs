//! TCP blocking probe

use serde::Serialize;
use serde_json::json;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use x0t_core::BlockingType;

use super::{CensorshipDetector, DetectionResult, Verdict};

/// How one connect attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// Handshake completed
    Success,
    /// No answer before the deadline
    Timeout,
    /// Reset by the peer or a middlebox
    Reset,
    /// Port closed
    Refused,
    /// Anything else
    Other,
}

#[derive(Debug, Serialize)]
struct Attempt {
    outcome: ConnectOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    connect_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Map a connect error onto an outcome
pub fn classify_connect_error(err: &io::Error) -> ConnectOutcome {
    match err.kind() {
        io::ErrorKind::ConnectionReset => ConnectOutcome::Reset,
        io::ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
        io::ErrorKind::TimedOut => ConnectOutcome::Timeout,
        _ => ConnectOutcome::Other,
    }
}

/// Majority of resets, or every attempt timing out
pub fn classify_tcp(outcomes: &[ConnectOutcome]) -> Verdict {
    let attempts = outcomes.len();
    if attempts == 0 {
        return Verdict::CLEAR;
    }
    let resets = outcomes.iter().filter(|o| **o == ConnectOutcome::Reset).count();
    let timeouts = outcomes.iter().filter(|o| **o == ConnectOutcome::Timeout).count();

    if resets >= attempts / 2 + 1 {
        Verdict::blocked(BlockingType::TcpReset, 0.9)
    } else if timeouts >= attempts {
        Verdict::blocked(BlockingType::TcpTimeout, 0.7)
    } else {
        Verdict::CLEAR
    }
}

async fn attempt(host: &str, port: u16, timeout: Duration) -> Attempt {
    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Attempt {
                outcome: ConnectOutcome::Success,
                connect_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
                error: None,
            }
        }
        Ok(Err(e)) => Attempt {
            outcome: classify_connect_error(&e),
            connect_ms: None,
            error: Some(e.to_string()),
        },
        Err(_) => Attempt {
            outcome: ConnectOutcome::Timeout,
            connect_ms: None,
            error: None,
        },
    }
}

impl CensorshipDetector {
    /// Repeated connects to `host:port` with a fixed backoff between attempts
    #[instrument(skip(self))]
    pub async fn detect_tcp_blocking(&self, host: &str, port: u16) -> DetectionResult {
        let started = Instant::now();
        let target = format!("{host}:{port}");
        let retries = self.config.retries.max(1);
        let timeout = Duration::from_millis(self.config.tcp_timeout_ms);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        let mut attempts = Vec::with_capacity(retries as usize);
        for n in 0..retries {
            let result = attempt(host, port, timeout).await;
            debug!(attempt = n + 1, outcome = ?result.outcome, "TCP attempt");
            attempts.push(result);
            if n + 1 < retries {
                tokio::time::sleep(backoff).await;
            }
        }

        let outcomes: Vec<ConnectOutcome> = attempts.iter().map(|a| a.outcome).collect();
        let successes = outcomes
            .iter()
            .filter(|o| **o == ConnectOutcome::Success)
            .count();
        let verdict = classify_tcp(&outcomes);

        DetectionResult::from_verdict(
            target,
            verdict,
            json!({
                "attempts": attempts,
                "success_rate": successes as f64 / f64::from(retries),
            }),
            started,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ConnectOutcome::{Other, Refused, Reset, Success, Timeout};

    #[test]
    fn test_reset_majority() {
        let verdict = classify_tcp(&[Reset, Reset, Success]);
        assert_eq!(verdict.blocking_type, BlockingType::TcpReset);
        assert_eq!(verdict.confidence, 0.9);

        // 3 / 2 + 1 = 2 resets needed
        assert_eq!(classify_tcp(&[Reset, Success, Success]), Verdict::CLEAR);
    }

    #[test]
    fn test_all_timeouts() {
        let verdict = classify_tcp(&[Timeout, Timeout, Timeout]);
        assert_eq!(verdict.blocking_type, BlockingType::TcpTimeout);
        assert_eq!(verdict.confidence, 0.7);

        assert_eq!(classify_tcp(&[Timeout, Timeout, Refused]), Verdict::CLEAR);
    }

    #[test]
    fn test_refused_is_not_blocking() {
        assert_eq!(classify_tcp(&[Refused, Refused, Other]), Verdict::CLEAR);
        assert_eq!(classify_tcp(&[]), Verdict::CLEAR);
    }

    #[test]
    fn test_error_kinds() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let other = io::Error::other("no route");
        assert_eq!(classify_connect_error(&reset), Reset);
        assert_eq!(classify_connect_error(&refused), Refused);
        assert_eq!(classify_connect_error(&other), Other);
    }
}
