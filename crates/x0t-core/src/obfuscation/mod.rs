//! Layered traffic obfuscation
//!
//! Six independently togglable layers applied in a fixed order:
//!
//! - encode: Encoding, XOR, Padding, Fragmentation, PacketShaping
//! - decode: the exact reverse
//!
//! Timing does not transform bytes; callers ask for the next delay through
//! [`Obfuscator::get_timing_delay`] or [`Obfuscator::timing_mut`].
//!
//! Only single layers and the Encoding + Padding pair are guaranteed to
//! round-trip. PacketShaping appends random filler that `deobfuscate` cannot
//! remove, and Fragmentation combined with PacketShaping re-chunks fragment
//! headers away.

mod encoding;
mod fragment;
mod padding;
mod shaping;
mod timing;
mod xor;

pub use encoding::EncodingObfuscator;
pub use fragment::{FragmentFlags, FragmentHeader, FragmentationObfuscator, FRAGMENT_HEADER_LEN};
pub use padding::PaddingObfuscator;
pub use shaping::{protocol_sizes, PacketShaper};
pub use timing::TimingObfuscator;
pub use xor::XorObfuscator;

use crate::config::{ObfuscationConfig, ObfuscationLayer};
use crate::error::Result;
use bitflags::bitflags;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, trace};

bitflags! {
    /// Set of enabled layers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayerSet: u8 {
        /// Encoding layer
        const ENCODING = 1 << 0;
        /// XOR keystream layer
        const XOR = 1 << 1;
        /// Padding layer
        const PADDING = 1 << 2;
        /// Fragmentation layer
        const FRAGMENTATION = 1 << 3;
        /// Packet shaping layer
        const PACKET_SHAPING = 1 << 4;
        /// Timing layer
        const TIMING = 1 << 5;
    }
}

impl From<ObfuscationLayer> for LayerSet {
    fn from(layer: ObfuscationLayer) -> Self {
        match layer {
            ObfuscationLayer::Encoding => LayerSet::ENCODING,
            ObfuscationLayer::Xor => LayerSet::XOR,
            ObfuscationLayer::Padding => LayerSet::PADDING,
            ObfuscationLayer::Fragmentation => LayerSet::FRAGMENTATION,
            ObfuscationLayer::PacketShaping => LayerSet::PACKET_SHAPING,
            ObfuscationLayer::Timing => LayerSet::TIMING,
        }
    }
}

impl LayerSet {
    /// Collapse a layer list (duplicates are ignored)
    pub fn from_layers(layers: &[ObfuscationLayer]) -> Self {
        layers
            .iter()
            .fold(LayerSet::empty(), |set, &layer| set | LayerSet::from(layer))
    }

    /// Layers in pipeline order
    pub fn layers(&self) -> Vec<ObfuscationLayer> {
        [
            ObfuscationLayer::Encoding,
            ObfuscationLayer::Xor,
            ObfuscationLayer::Padding,
            ObfuscationLayer::Fragmentation,
            ObfuscationLayer::PacketShaping,
            ObfuscationLayer::Timing,
        ]
        .into_iter()
        .filter(|&l| self.contains(LayerSet::from(l)))
        .collect()
    }
}

/// Pipeline statistics
#[derive(Debug, Clone, Serialize)]
pub struct ObfuscationStats {
    /// Enabled layers, in pipeline order
    pub enabled_layers: Vec<ObfuscationLayer>,
    /// Packets passed through `obfuscate`
    pub packet_count: u64,
}

/// Multi-layer obfuscation pipeline
#[derive(Debug)]
pub struct Obfuscator {
    layers: LayerSet,
    key_interval: u64,
    encoding: Option<EncodingObfuscator>,
    xor: Option<XorObfuscator>,
    padding: Option<PaddingObfuscator>,
    fragmentation: Option<FragmentationObfuscator>,
    shaper: Option<PacketShaper>,
    timing: Option<TimingObfuscator>,
    packet_count: u64,
}

impl Obfuscator {
    /// Build the enabled layers from configuration
    pub fn new(config: &ObfuscationConfig) -> Result<Self> {
        let layers = LayerSet::from_layers(&config.enabled_layers);

        let xor = if layers.contains(LayerSet::XOR) {
            let key = config.xor_key.as_deref().map(hex::decode).transpose()?;
            Some(XorObfuscator::new(key, config.xor_key_rotation))
        } else {
            None
        };

        debug!(layers = ?layers.layers(), "Obfuscation pipeline built");

        Ok(Self {
            layers,
            key_interval: u64::from(config.xor_key_interval.max(1)),
            encoding: layers
                .contains(LayerSet::ENCODING)
                .then(|| EncodingObfuscator::new(config.encoding_type)),
            xor,
            padding: layers.contains(LayerSet::PADDING).then(|| {
                PaddingObfuscator::new(
                    config.min_packet_size,
                    config.max_packet_size,
                    config.padding_strategy,
                )
            }),
            fragmentation: layers.contains(LayerSet::FRAGMENTATION).then(|| {
                FragmentationObfuscator::new(config.fragment_size, config.fragment_delay_ms)
            }),
            shaper: layers.contains(LayerSet::PACKET_SHAPING).then(|| {
                PacketShaper::new(config.target_packet_size, config.mtu, config.shaping_protocol)
            }),
            timing: layers.contains(LayerSet::TIMING).then(|| {
                TimingObfuscator::new(config.timing_jitter_ms, config.timing_delay_ms)
            }),
            packet_count: 0,
        })
    }

    /// Enabled layers
    pub fn layers(&self) -> LayerSet {
        self.layers
    }

    /// Apply every enabled layer. Returns one element unless fragmentation
    /// or shaping split the data.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn obfuscate(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut result = data.to_vec();

        if let Some(enc) = &self.encoding {
            result = enc.encode(&result);
        }
        if let Some(xor) = &mut self.xor {
            result = xor.encrypt(&result);
        }
        if let Some(pad) = &mut self.padding {
            result = pad.pad(&result).0;
        }

        let mut packets = match &self.fragmentation {
            Some(frag) => frag.fragment(&result),
            None => vec![result],
        };

        if let Some(shaper) = &mut self.shaper {
            packets = packets.iter().flat_map(|p| shaper.shape(p)).collect();
        }

        self.packet_count += 1;
        if self.packet_count % self.key_interval == 0 {
            if let Some(xor) = &mut self.xor {
                trace!(packet_count = self.packet_count, "Rotating XOR key");
                xor.rotate_key();
            }
        }

        packets
    }

    /// Reverse the enabled layers in exact reverse order
    #[instrument(skip(self, packets), fields(count = packets.len()))]
    pub fn deobfuscate(&mut self, packets: &[Vec<u8>]) -> Result<Vec<u8>> {
        let mut result = match (&self.shaper, &self.fragmentation) {
            (_, Some(frag)) => frag.reassemble(packets),
            (Some(shaper), None) => shaper.reshape(packets),
            (None, None) => packets.concat(),
        };

        if let Some(pad) = &self.padding {
            result = pad.unpad(&result);
        }
        if let Some(xor) = &mut self.xor {
            result = xor.decrypt(&result);
        }
        if let Some(enc) = &self.encoding {
            result = enc.decode(&result)?;
        }

        Ok(result)
    }

    /// Next timing delay, zero when the timing layer is off
    pub fn get_timing_delay(&mut self) -> Duration {
        self.timing
            .as_mut()
            .map_or(Duration::ZERO, TimingObfuscator::get_delay)
    }

    /// Timing layer, if enabled
    pub fn timing_mut(&mut self) -> Option<&mut TimingObfuscator> {
        self.timing.as_mut()
    }

    /// Fragmentation layer, if enabled
    pub fn fragmentation(&self) -> Option<&FragmentationObfuscator> {
        self.fragmentation.as_ref()
    }

    /// Current statistics
    pub fn stats(&self) -> ObfuscationStats {
        ObfuscationStats {
            enabled_layers: self.layers.layers(),
            packet_count: self.packet_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodingType;

    #[test]
    fn test_layer_set_dedup_and_order() {
        let set = LayerSet::from_layers(&[
            ObfuscationLayer::Padding,
            ObfuscationLayer::Encoding,
            ObfuscationLayer::Padding,
        ]);
        assert_eq!(
            set.layers(),
            vec![ObfuscationLayer::Encoding, ObfuscationLayer::Padding]
        );
    }

    #[test]
    fn test_encoding_padding_roundtrip() {
        let config = ObfuscationConfig::with_layers(&[
            ObfuscationLayer::Encoding,
            ObfuscationLayer::Padding,
        ]);
        let mut obf = Obfuscator::new(&config).unwrap();
        let packets = obf.obfuscate(b"mesh payload");
        assert_eq!(packets.len(), 1);
        assert_eq!(obf.deobfuscate(&packets).unwrap(), b"mesh payload");
    }

    #[test]
    fn test_xor_roundtrip_same_instance() {
        let config = ObfuscationConfig::with_layers(&[ObfuscationLayer::Xor]);
        let mut obf = Obfuscator::new(&config).unwrap();
        for msg in [&b"one"[..], &b"two"[..]] {
            let packets = obf.obfuscate(msg);
            assert_eq!(obf.deobfuscate(&packets).unwrap(), msg);
        }
    }

    #[test]
    fn test_hex_encoding_layer() {
        let mut config = ObfuscationConfig::with_layers(&[ObfuscationLayer::Encoding]);
        config.encoding_type = EncodingType::Hex;
        let mut obf = Obfuscator::new(&config).unwrap();
        assert_eq!(obf.obfuscate(&[0xab]), vec![b"ab".to_vec()]);
        assert!(obf.deobfuscate(&[b"zz".to_vec()]).is_err());
    }

    #[test]
    fn test_fragmentation_roundtrip() {
        let mut config = ObfuscationConfig::with_layers(&[ObfuscationLayer::Fragmentation]);
        config.fragment_size = 5;
        let mut obf = Obfuscator::new(&config).unwrap();
        let packets = obf.obfuscate(b"split me into pieces");
        assert_eq!(packets.len(), 4);
        assert_eq!(obf.deobfuscate(&packets).unwrap(), b"split me into pieces");
    }

    #[test]
    fn test_stats_and_timing() {
        let mut config = ObfuscationConfig::with_layers(&[ObfuscationLayer::Timing]);
        config.timing_jitter_ms = 0;
        config.timing_delay_ms = 7;
        let mut obf = Obfuscator::new(&config).unwrap();
        obf.obfuscate(b"a");
        obf.obfuscate(b"b");
        let stats = obf.stats();
        assert_eq!(stats.packet_count, 2);
        assert_eq!(stats.enabled_layers, vec![ObfuscationLayer::Timing]);
        assert_eq!(obf.get_timing_delay(), Duration::from_millis(7));
    }

    #[test]
    fn test_timing_delay_zero_when_disabled() {
        let mut obf = Obfuscator::new(&ObfuscationConfig::default()).unwrap();
        assert_eq!(obf.get_timing_delay(), Duration::ZERO);
    }
}
