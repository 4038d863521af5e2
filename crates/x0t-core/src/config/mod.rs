//! Configuration management for x0t
//!
//! Provides a strongly-typed configuration system with TOML support
//! and profile-based presets for the obfuscation pipeline.

mod profile;

pub use profile::Profile;

use crate::error::{Error, Result};
use crate::stego::MimicProtocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Default environment variable holding the hex-encoded master key
pub const DEFAULT_MASTER_KEY_ENV: &str = "X0T_MASTER_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,

    /// Stego codec settings
    pub codec: CodecConfig,

    /// Genetic optimizer / training settings
    pub evolution: EvolutionConfig,

    /// Obfuscation pipeline settings
    pub obfuscation: ObfuscationConfig,

    /// Pluggable transport settings
    pub transport: TransportConfig,

    /// Censorship probe settings
    pub probe: ProbeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Create configuration from a preset profile
    pub fn from_profile(profile: Profile) -> Self {
        profile.into_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let evo = &self.evolution;
        if evo.population_size == 0 {
            return Err(Error::config_value(
                "evolution.population_size",
                "Must be at least 1",
            ));
        }
        if evo.generations == 0 {
            return Err(Error::config_value("evolution.generations", "Must be at least 1"));
        }
        if !evo.overhead_weight.is_finite() || evo.overhead_weight < 0.0 {
            return Err(Error::config_value(
                "evolution.overhead_weight",
                "Must be a finite, non-negative number",
            ));
        }

        let obf = &self.obfuscation;
        if obf.max_packet_size < obf.min_packet_size {
            return Err(Error::config_value(
                "obfuscation.max_packet_size",
                "Must not be smaller than min_packet_size",
            ));
        }
        if obf.max_packet_size > usize::from(u16::MAX) {
            return Err(Error::config_value(
                "obfuscation.max_packet_size",
                "Must be at most 65535 (padding length is a 16-bit field)",
            ));
        }
        if obf.mtu <= SHAPER_HEADER_ALLOWANCE {
            return Err(Error::config_value(
                "obfuscation.mtu",
                format!("Must be greater than {SHAPER_HEADER_ALLOWANCE}"),
            ));
        }
        if obf.fragment_size == 0 || obf.fragment_size > usize::from(u16::MAX) {
            return Err(Error::config_value(
                "obfuscation.fragment_size",
                "Must be between 1 and 65535",
            ));
        }
        if obf.xor_key_interval == 0 {
            return Err(Error::config_value("obfuscation.xor_key_interval", "Must be at least 1"));
        }
        if let Some(ref key) = obf.xor_key {
            hex::decode(key).map_err(|e| {
                Error::config_value("obfuscation.xor_key", format!("Invalid hex: {e}"))
            })?;
        }

        let transport = &self.transport;
        for (key, value) in [
            ("transport.node_id", &transport.node_id),
            ("transport.private_key", &transport.private_key),
        ] {
            if let Some(hex_value) = value {
                hex::decode(hex_value)
                    .map_err(|e| Error::config_value(key, format!("Invalid hex: {e}")))?;
            }
        }
        for (key, value) in [
            ("transport.connect_timeout_ms", transport.connect_timeout_ms),
            ("transport.handshake_timeout_ms", transport.handshake_timeout_ms),
            ("transport.read_timeout_ms", transport.read_timeout_ms),
            ("transport.write_timeout_ms", transport.write_timeout_ms),
            ("probe.dns_timeout_ms", self.probe.dns_timeout_ms),
            ("probe.tcp_timeout_ms", self.probe.tcp_timeout_ms),
            ("probe.tls_timeout_ms", self.probe.tls_timeout_ms),
            ("probe.http_timeout_ms", self.probe.http_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::config_value(key, "Timeout must be non-zero"));
            }
        }

        if self.probe.retries == 0 {
            return Err(Error::config_value("probe.retries", "Must be at least 1"));
        }

        Ok(())
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Bytes reserved for outer headers when the shaper sizes chunks against the MTU
pub const SHAPER_HEADER_ALLOWANCE: usize = 40;

/// Stego codec configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Mimic protocol used when none is given explicitly
    pub default_mimic: MimicProtocol,
    /// Environment variable holding the hex-encoded master key
    pub master_key_env: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            default_mimic: MimicProtocol::Http,
            master_key_env: DEFAULT_MASTER_KEY_ENV.to_string(),
        }
    }
}

/// Genetic optimizer and training harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Number of DNA strands kept in the population
    pub population_size: usize,
    /// Generations to run per training session
    pub generations: u32,
    /// Weight of the byte-overhead penalty in the fitness score
    pub overhead_weight: f64,
    /// Sample payloads encoded for every fitness trial
    pub sample_payloads: Vec<String>,
    /// Seed for the optimizer PRNG (None = from entropy)
    pub seed: Option<u64>,
    /// Worker threads for trial evaluation (0 = available parallelism)
    pub workers: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            generations: 50,
            overhead_weight: 0.1,
            sample_payloads: vec![
                r#"{"type":"heartbeat","node_id":"edge-01","seq":1}"#.to_string(),
                "GET /api/v1/peers HTTP/1.1".to_string(),
                "mesh-datagram:0123456789abcdef0123456789abcdef".to_string(),
            ],
            seed: None,
            workers: 0,
        }
    }
}

/// Obfuscation layers, listed in encode order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObfuscationLayer {
    /// Base64 / hex re-encoding
    Encoding,
    /// SHA-256 counter-mode XOR keystream
    Xor,
    /// Length-prefixed random padding
    Padding,
    /// Headered fixed-size fragments
    Fragmentation,
    /// Protocol-sized chunking
    PacketShaping,
    /// Jittered inter-packet delay
    Timing,
}

/// Padding target-size strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingStrategy {
    /// Uniform between max(min_size, len) and max_size
    Random,
    /// Always pad to max_size
    Fixed,
    /// Next multiple of a random block size
    Variable,
}

/// Packet size table the shaper mimics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapingProtocol {
    /// Bulk HTTP segments
    Http,
    /// Small DNS datagrams
    Dns,
    /// TLS records
    Tls,
    /// QUIC datagrams
    Quic,
}

/// Reversible encoding applied by the encoding layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingType {
    /// Standard base64 with padding
    Base64,
    /// Lowercase hex
    Hex,
    /// Pass-through
    None,
}

/// Obfuscation pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Enabled layers (duplicates are ignored, order is fixed by the pipeline)
    pub enabled_layers: Vec<ObfuscationLayer>,
    /// Initial XOR key, hex encoded (None = random)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xor_key: Option<String>,
    /// Rotate the XOR key periodically
    pub xor_key_rotation: bool,
    /// Rotate the XOR key every N packets
    pub xor_key_interval: u32,
    /// Minimum padded packet size
    pub min_packet_size: usize,
    /// Maximum padded packet size
    pub max_packet_size: usize,
    /// Padding strategy
    pub padding_strategy: PaddingStrategy,
    /// Fallback chunk size for the shaper
    pub target_packet_size: usize,
    /// Path MTU
    pub mtu: usize,
    /// Size table used by the shaper
    pub shaping_protocol: ShapingProtocol,
    /// Timing jitter (+/- ms)
    pub timing_jitter_ms: u64,
    /// Timing base delay (ms)
    pub timing_delay_ms: u64,
    /// Fragment payload size
    pub fragment_size: usize,
    /// Delay between fragments (ms)
    pub fragment_delay_ms: u64,
    /// Encoding used by the encoding layer
    pub encoding_type: EncodingType,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            enabled_layers: vec![ObfuscationLayer::Xor, ObfuscationLayer::Padding],
            xor_key: None,
            xor_key_rotation: true,
            xor_key_interval: 1000,
            min_packet_size: 64,
            max_packet_size: 1500,
            padding_strategy: PaddingStrategy::Random,
            target_packet_size: 1400,
            mtu: 1500,
            shaping_protocol: ShapingProtocol::Http,
            timing_jitter_ms: 50,
            timing_delay_ms: 10,
            fragment_size: 512,
            fragment_delay_ms: 5,
            encoding_type: EncodingType::Base64,
        }
    }
}

impl ObfuscationConfig {
    /// Config with exactly the given layers and default knobs
    pub fn with_layers(layers: &[ObfuscationLayer]) -> Self {
        Self {
            enabled_layers: layers.to_vec(),
            ..Self::default()
        }
    }
}

/// Pluggable transport flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Randomized-handshake obfuscation over TCP
    Obfs4,
    /// Domain-fronted HTTP polling
    Meek,
    /// WebRTC-proxy stand-in over a plain stream
    Snowflake,
}

impl TransportKind {
    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Obfs4 => "obfs4",
            TransportKind::Meek => "meek",
            TransportKind::Snowflake => "snowflake",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "obfs4" => Ok(TransportKind::Obfs4),
            "meek" => Ok(TransportKind::Meek),
            "snowflake" => Ok(TransportKind::Snowflake),
            _ => Err(Error::config_value("transport.kind", format!("Unknown transport: {s}"))),
        }
    }
}

/// Pluggable transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport flavour
    pub kind: TransportKind,
    /// OBFS4 node id, hex (None = random 20 bytes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// OBFS4 private key, hex (None = random 32 bytes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Meek front domain (may include a port)
    pub front_domain: String,
    /// Meek endpoint path on the front
    pub meek_path: String,
    /// Use plain HTTP towards the front (testing only)
    pub meek_insecure_http: bool,
    /// Snowflake broker URL
    pub broker_url: String,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Handshake round-trip timeout
    pub handshake_timeout_ms: u64,
    /// Per-read timeout
    pub read_timeout_ms: u64,
    /// Per-write (incl. drain) timeout
    pub write_timeout_ms: u64,
    /// Receive buffer size
    pub buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Obfs4,
            node_id: None,
            private_key: None,
            front_domain: String::new(),
            meek_path: "/meek".to_string(),
            meek_insecure_http: false,
            broker_url: String::new(),
            connect_timeout_ms: 30_000,
            handshake_timeout_ms: 30_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            buffer_size: 65536,
        }
    }
}

/// Censorship probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// DNS query timeout
    pub dns_timeout_ms: u64,
    /// TCP connect timeout
    pub tcp_timeout_ms: u64,
    /// TLS handshake timeout
    pub tls_timeout_ms: u64,
    /// HTTP request timeout
    pub http_timeout_ms: u64,
    /// TCP connect attempts
    pub retries: u32,
    /// Pause between TCP attempts
    pub retry_backoff_ms: u64,
    /// Control resolvers queried directly over UDP
    pub control_resolvers: Vec<SocketAddr>,
    /// Query this resolver instead of the system resolver for the "local" answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_resolver: Option<SocketAddr>,
    /// Known-good answers per domain
    pub expected_dns: HashMap<String, Vec<IpAddr>>,
    /// Throttling test duration
    pub throttle_duration_ms: u64,
    /// Bytes written per throttling sample
    pub throttle_chunk_size: usize,
    /// Issuer organisations considered legitimate
    pub known_issuers: Vec<String>,
    /// Redirect keywords indicating a block page
    pub block_keywords: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 5_000,
            tcp_timeout_ms: 10_000,
            tls_timeout_ms: 10_000,
            http_timeout_ms: 15_000,
            retries: 3,
            retry_backoff_ms: 1_000,
            control_resolvers: vec![
                SocketAddr::from(([8, 8, 8, 8], 53)),
                SocketAddr::from(([1, 1, 1, 1], 53)),
            ],
            local_resolver: None,
            expected_dns: HashMap::new(),
            throttle_duration_ms: 5_000,
            throttle_chunk_size: 65536,
            known_issuers: [
                "Let's Encrypt",
                "DigiCert",
                "GlobalSign",
                "Cloudflare",
                "Amazon",
                "Google",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            block_keywords: ["block", "deny", "forbidden", "restricted"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log file path (None = stdout only)
    pub file: Option<String>,
    /// Enable JSON format logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json_format: false,
        }
    }
}
