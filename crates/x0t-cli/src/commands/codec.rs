//! Codec commands - encode, decode, inspect

use anyhow::{bail, Context, Result};
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use x0t_core::stego::MasterKey;
use x0t_core::{Config, Dna, DpiModel, MimicProtocol, StegoCodec};
use zeroize::Zeroizing;

use super::{read_hex_input, read_input};

/// Encode command arguments
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Mimic protocol: http, icmp or dns (default: codec.default_mimic)
    #[arg(short, long)]
    pub mimic: Option<String>,

    /// Evasion strategy JSON applied after encoding
    #[arg(long, value_name = "FILE")]
    pub dna: Option<PathBuf>,

    /// Payload is hex-encoded
    #[arg(long)]
    pub hex: bool,

    /// Payload, or `-` for stdin
    pub payload: String,
}

/// Decode command arguments
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded packet, or `-` for stdin
    pub packet: String,
}

/// Inspect command arguments
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Print the verdict as JSON
    #[arg(long)]
    pub json: bool,

    /// Hex-encoded packet, or `-` for stdin
    pub packet: String,
}

/// Build a codec from the key in `codec.master_key_env`
pub(crate) fn codec_from_env(config: &Config) -> Result<StegoCodec> {
    let var = &config.codec.master_key_env;
    let hex_key = Zeroizing::new(std::env::var(var).with_context(|| {
        format!("Set {var} to a hex-encoded master key of at least 32 bytes")
    })?);
    let key = MasterKey::from_hex(&hex_key).with_context(|| format!("Invalid key in {var}"))?;
    Ok(StegoCodec::with_key(key)?)
}

/// Load a strategy saved by `x0t train`
pub(crate) fn load_dna(path: &Path) -> Result<Dna> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read strategy from {}", path.display()))?;
    Dna::from_json(&json).with_context(|| format!("Invalid strategy in {}", path.display()))
}

/// Print one hex packet per line
pub fn encode(args: EncodeArgs, config: &Config) -> Result<()> {
    let codec = codec_from_env(config)?;
    let mimic = match args.mimic {
        Some(ref name) => name.parse::<MimicProtocol>()?,
        None => config.codec.default_mimic,
    };
    let payload = if args.hex {
        read_hex_input(&args.payload)?
    } else {
        read_input(&args.payload)?
    };
    let dna = args.dna.as_deref().map(load_dna).transpose()?;

    let packets = codec.encode(&payload, mimic, dna.as_ref());
    info!(%mimic, payload_len = payload.len(), packets = packets.len(), "Encoded payload");

    let mut out = std::io::stdout().lock();
    for packet in &packets {
        writeln!(out, "{}", hex::encode(packet))?;
    }
    Ok(())
}

/// Write the recovered payload to stdout as raw bytes
pub fn decode(args: DecodeArgs, config: &Config) -> Result<()> {
    let codec = codec_from_env(config)?;
    let packet = read_hex_input(&args.packet)?;
    debug!(len = packet.len(), "Decoding packet");

    let Some(payload) = codec.decode(&packet) else {
        bail!("Packet is not a stego packet for this key");
    };

    let mut out = std::io::stdout().lock();
    out.write_all(&payload)?;
    out.flush()?;
    Ok(())
}

/// Print the DPI model verdict
pub fn inspect(args: InspectArgs) -> Result<()> {
    let packet = read_hex_input(&args.packet)?;
    let verdict = DpiModel::new().inspect(&packet);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    println!("detected:     {}", verdict.detected);
    if let Some(ref name) = verdict.detected_as {
        println!("detected as:  {name}");
    }
    match verdict.mimic_protocol {
        Some(protocol) => println!("mimic:        {protocol}"),
        None => println!("mimic:        none"),
    }
    println!("entropy:      {:.3}", verdict.entropy);
    println!("threat level: {}", verdict.threat_level);
    Ok(())
}
