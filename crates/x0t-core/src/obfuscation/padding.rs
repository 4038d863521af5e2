//! Length-prefixed random padding
//!
//! Wire format: `be16(padding_len) || random padding || data`.

use crate::config::PaddingStrategy;
use rand::rngs::{OsRng, SmallRng};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

const VARIABLE_BLOCKS: [usize; 4] = [64, 128, 256, 512];

/// Padding obfuscator
#[derive(Debug)]
pub struct PaddingObfuscator {
    min_size: usize,
    max_size: usize,
    strategy: PaddingStrategy,
    rng: SmallRng,
}

impl PaddingObfuscator {
    /// Create a padding layer. `max_size` is capped at 65535.
    pub fn new(min_size: usize, max_size: usize, strategy: PaddingStrategy) -> Self {
        Self {
            min_size,
            max_size: max_size.min(usize::from(u16::MAX)),
            strategy,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Target size for `current` bytes of input under the configured strategy
    fn target_size(&mut self, current: usize) -> usize {
        match self.strategy {
            PaddingStrategy::Random => {
                let low = self.min_size.max(current);
                if low >= self.max_size {
                    self.max_size
                } else {
                    self.rng.gen_range(low..=self.max_size)
                }
            }
            PaddingStrategy::Fixed => self.max_size,
            PaddingStrategy::Variable => {
                let block = VARIABLE_BLOCKS.choose(&mut self.rng).copied().unwrap_or(64);
                ((current / block + 1) * block).min(self.max_size)
            }
        }
    }

    /// Pad `data`, returning the padded bytes and the padding length.
    ///
    /// Input already at or above `max_size` gets a zero-length prefix so that
    /// [`unpad`](Self::unpad) always reverses this call.
    pub fn pad(&mut self, data: &[u8]) -> (Vec<u8>, usize) {
        let padding_len = if data.len() >= self.max_size {
            0
        } else {
            self.target_size(data.len()).saturating_sub(data.len())
        };

        let mut out = Vec::with_capacity(2 + padding_len + data.len());
        // max_size <= u16::MAX, so padding_len always fits
        out.extend_from_slice(&u16::try_from(padding_len).unwrap_or(0).to_be_bytes());
        let start = out.len();
        out.resize(start + padding_len, 0);
        OsRng.fill_bytes(&mut out[start..]);
        out.extend_from_slice(data);

        (out, padding_len)
    }

    /// Strip padding. Input with an impossible length prefix is returned unchanged.
    pub fn unpad(&self, data: &[u8]) -> Vec<u8> {
        if data.len() < 2 {
            return data.to_vec();
        }
        let padding_len = usize::from(u16::from_be_bytes([data[0], data[1]]));
        if padding_len > data.len() - 2 {
            return data.to_vec();
        }
        data[2 + padding_len..].to_vec()
    }
}
