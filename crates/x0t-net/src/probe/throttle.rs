//! Throughput degradation probe
//!
//! Pushes zero-filled chunks for a fixed window and compares the average
//! per-chunk throughput of the first and second half of the samples.

use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use x0t_core::BlockingType;

use super::{CensorshipDetector, DetectionResult, Verdict};
use crate::error::{NetError, Result};
use crate::transport::millis;

const MIN_SAMPLES: usize = 3;
const DEGRADATION_RATIO: f64 = 0.5;

/// First-half versus second-half throughput
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThroughputAnalysis {
    /// Mean bytes/s over the first half of the samples
    pub avg_first_half: f64,
    /// Mean bytes/s over the second half
    pub avg_second_half: f64,
    /// second / first, 0 when the first half is 0
    pub speed_ratio: f64,
    /// Second half fell under half the first
    pub throttled: bool,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// `None` with fewer than three samples
pub fn analyze_throughput(speeds: &[f64]) -> Option<ThroughputAnalysis> {
    if speeds.len() < MIN_SAMPLES {
        return None;
    }
    let (first, second) = speeds.split_at(speeds.len() / 2);
    let avg_first_half = mean(first);
    let avg_second_half = mean(second);

    Some(ThroughputAnalysis {
        avg_first_half,
        avg_second_half,
        speed_ratio: if avg_first_half > 0.0 {
            avg_second_half / avg_first_half
        } else {
            0.0
        },
        throttled: avg_second_half < avg_first_half * DEGRADATION_RATIO,
    })
}

impl CensorshipDetector {
    async fn sample_throughput(&self, host: &str, port: u16, window: Duration) -> Result<(Vec<f64>, u64)> {
        let timeout = Duration::from_millis(self.config.tcp_timeout_ms);
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| NetError::Timeout {
                operation: "connect",
                after_ms: millis(timeout),
            })??;

        let chunk = vec![0u8; self.config.throttle_chunk_size.max(1)];
        let mut speeds = Vec::new();
        let mut total_bytes = 0u64;
        let started = Instant::now();

        while started.elapsed() < window {
            let chunk_started = Instant::now();
            match tokio::time::timeout(timeout, stream.write_all(&chunk)).await {
                Ok(Ok(())) => {
                    total_bytes += chunk.len() as u64;
                    let secs = chunk_started.elapsed().as_secs_f64();
                    speeds.push(if secs > 0.0 { chunk.len() as f64 / secs } else { 0.0 });
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Throughput sampling stopped");
                    break;
                }
                Err(_) => {
                    debug!("Throughput sampling stalled");
                    break;
                }
            }
        }

        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "Throttle probe shutdown");
        }
        Ok((speeds, total_bytes))
    }

    /// Stream to `host:port` for `duration` (default `probe.throttle_duration_ms`)
    #[instrument(skip(self))]
    pub async fn detect_throttling(
        &self,
        host: &str,
        port: u16,
        duration: Option<Duration>,
    ) -> DetectionResult {
        let started = Instant::now();
        let target = format!("{host}:{port}");
        let window = duration.unwrap_or(Duration::from_millis(self.config.throttle_duration_ms));

        let (speeds, total_bytes) = match self.sample_throughput(host, port, window).await {
            Ok(samples) => samples,
            Err(e) => return DetectionResult::failed(target, e, started),
        };

        let Some(analysis) = analyze_throughput(&speeds) else {
            return DetectionResult::failed(target, "Insufficient data", started);
        };

        let verdict = if analysis.throttled {
            Verdict::blocked(BlockingType::Throttling, 0.8)
        } else {
            Verdict::CLEAR
        };
        debug!(samples = speeds.len(), ratio = analysis.speed_ratio, "Throttle probe classified");

        DetectionResult::from_verdict(
            target,
            verdict,
            json!({
                "avg_speed_first_half": analysis.avg_first_half,
                "avg_speed_second_half": analysis.avg_second_half,
                "speed_ratio": analysis.speed_ratio,
                "samples": speeds.len(),
                "total_bytes": total_bytes,
            }),
            started,
        )
    }
}
