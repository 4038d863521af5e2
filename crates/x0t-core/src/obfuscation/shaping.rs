//! Protocol-sized packet shaping

use crate::config::{ShapingProtocol, SHAPER_HEADER_ALLOWANCE};
use rand::rngs::{OsRng, SmallRng};
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

/// Typical on-the-wire sizes per protocol
pub fn protocol_sizes(protocol: ShapingProtocol) -> &'static [usize] {
    match protocol {
        ShapingProtocol::Http => &[1400, 1420, 1440, 1460],
        ShapingProtocol::Dns => &[64, 128, 256],
        ShapingProtocol::Tls => &[1280, 1400, 1420],
        ShapingProtocol::Quic => &[1200, 1350, 1450],
    }
}

/// Cuts a byte stream into chunks sized like a real protocol's packets
#[derive(Debug)]
pub struct PacketShaper {
    target_size: usize,
    mtu: usize,
    protocol: ShapingProtocol,
    rng: SmallRng,
}

impl PacketShaper {
    /// Create a shaper
    pub fn new(target_size: usize, mtu: usize, protocol: ShapingProtocol) -> Self {
        Self {
            target_size,
            mtu,
            protocol,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Split `data` into chunks; the last chunk is right-padded with random bytes
    pub fn shape(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let sizes = protocol_sizes(self.protocol);
        let cap = self.mtu.saturating_sub(SHAPER_HEADER_ALLOWANCE).max(1);
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let chunk_size = sizes
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(self.target_size)
                .min(cap);
            let end = (offset + chunk_size).min(data.len());

            let mut chunk = Vec::with_capacity(chunk_size);
            chunk.extend_from_slice(&data[offset..end]);
            if chunk.len() < chunk_size {
                let filled = chunk.len();
                chunk.resize(chunk_size, 0);
                OsRng.fill_bytes(&mut chunk[filled..]);
            }

            packets.push(chunk);
            offset += chunk_size;
        }

        packets
    }

    /// Concatenate shaped chunks (the random tail is not removed)
    pub fn reshape(&self, packets: &[Vec<u8>]) -> Vec<u8> {
        packets.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_use_protocol_sizes() {
        let mut shaper = PacketShaper::new(1400, 1500, ShapingProtocol::Dns);
        let data = vec![1u8; 1000];
        let packets = shaper.shape(&data);
        assert!(!packets.is_empty());
        for p in &packets {
            assert!([64, 128, 256].contains(&p.len()));
        }
        let joined = shaper.reshape(&packets);
        assert_eq!(&joined[..1000], data.as_slice());
    }

    #[test]
    fn test_mtu_caps_chunk_size() {
        let mut shaper = PacketShaper::new(1400, 1000, ShapingProtocol::Http);
        let packets = shaper.shape(&[0u8; 3000]);
        assert!(packets.iter().all(|p| p.len() == 960));
        assert_eq!(packets.len(), 4);
    }

    #[test]
    fn test_empty_input() {
        let mut shaper = PacketShaper::new(1400, 1500, ShapingProtocol::Quic);
        assert!(shaper.shape(&[]).is_empty());
    }
}
