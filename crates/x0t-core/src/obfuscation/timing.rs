//! Jittered inter-packet delays

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Produces `base_delay ± uniform(jitter)` delays, clamped at zero
#[derive(Debug)]
pub struct TimingObfuscator {
    jitter_ms: u64,
    base_delay_ms: u64,
    rng: SmallRng,
}

impl TimingObfuscator {
    /// Create a timing layer
    pub fn new(jitter_ms: u64, base_delay_ms: u64) -> Self {
        Self {
            jitter_ms,
            base_delay_ms,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Next randomized delay
    #[allow(clippy::cast_precision_loss)]
    pub fn get_delay(&mut self) -> Duration {
        let jitter = self.jitter_ms as f64;
        let offset = if self.jitter_ms == 0 {
            0.0
        } else {
            self.rng.gen_range(-jitter..=jitter)
        };
        let delay_ms = (self.base_delay_ms as f64 + offset).max(0.0);
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Sleep for the next delay on the tokio timer
    pub async fn wait(&mut self) {
        let delay = self.get_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Block the current thread for the next delay
    pub fn wait_blocking(&mut self) {
        let delay = self.get_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_bounds() {
        let mut timing = TimingObfuscator::new(50, 10);
        for _ in 0..100 {
            let d = timing.get_delay();
            assert!(d <= Duration::from_millis(60));
        }
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let mut timing = TimingObfuscator::new(0, 25);
        assert_eq!(timing.get_delay(), Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_async_wait_zero() {
        let mut timing = TimingObfuscator::new(0, 0);
        timing.wait().await;
    }
}
