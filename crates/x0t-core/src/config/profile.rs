//! Configuration presets
//!
//! Each preset selects a set of obfuscation layers; everything else keeps
//! its default value.

use super::*;
use serde::{Deserialize, Serialize};

/// Predefined configuration profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Padding only
    Minimal,
    /// XOR keystream + padding (default)
    Balanced,
    /// Every obfuscation layer, encoding and fragmentation included
    Paranoid,
    /// Custom profile
    Custom,
}

impl Profile {
    /// Convert profile to full configuration
    pub fn into_config(self) -> Config {
        let mut config = Config::default();

        match self {
            Profile::Minimal => {
                config.obfuscation.enabled_layers = vec![ObfuscationLayer::Padding];
                config.obfuscation.padding_strategy = PaddingStrategy::Random;
            }
            Profile::Balanced => {
                config.obfuscation.enabled_layers =
                    vec![ObfuscationLayer::Xor, ObfuscationLayer::Padding];
            }
            Profile::Paranoid => {
                config.obfuscation.enabled_layers = vec![
                    ObfuscationLayer::Encoding,
                    ObfuscationLayer::Xor,
                    ObfuscationLayer::Padding,
                    ObfuscationLayer::Fragmentation,
                    ObfuscationLayer::PacketShaping,
                    ObfuscationLayer::Timing,
                ];
                config.obfuscation.padding_strategy = PaddingStrategy::Variable;
                config.obfuscation.xor_key_interval = 100;
                config.obfuscation.shaping_protocol = ShapingProtocol::Tls;
            }
            Profile::Custom => {
                // Keep defaults, user will customize
            }
        }

        config.profile = Some(self);
        config
    }

    /// Get profile name
    pub fn name(&self) -> &'static str {
        match self {
            Profile::Minimal => "minimal",
            Profile::Balanced => "balanced",
            Profile::Paranoid => "paranoid",
            Profile::Custom => "custom",
        }
    }

    /// Get profile description
    pub fn description(&self) -> &'static str {
        match self {
            Profile::Minimal => "Length-prefixed padding only, lowest overhead",
            Profile::Balanced => "XOR keystream with key rotation plus padding (default)",
            Profile::Paranoid => "All layers: encoding, XOR, padding, fragmentation, shaping, timing",
            Profile::Custom => "Custom configuration",
        }
    }

    /// All presets, in increasing order of overhead
    pub fn all() -> &'static [Profile] {
        &[
            Profile::Minimal,
            Profile::Balanced,
            Profile::Paranoid,
            Profile::Custom,
        ]
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minimal" | "min" => Ok(Profile::Minimal),
            "balanced" | "default" => Ok(Profile::Balanced),
            "paranoid" | "max" => Ok(Profile::Paranoid),
            "custom" => Ok(Profile::Custom),
            _ => Err(Error::config_value("profile", format!("Unknown profile: {s}"))),
        }
    }
}

impl Profile {
    /// Parse profile from name string
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
    }
}
