//! Obfuscate command - run a payload through the layer pipeline

use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use tracing::{info, warn};
use x0t_core::{Config, Obfuscator, Profile};

use super::{read_hex_input, read_input};

/// Obfuscate command arguments
#[derive(Args, Debug)]
pub struct ObfuscateArgs {
    /// Use the layers of this preset instead of `[obfuscation]`
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Payload is hex-encoded
    #[arg(long)]
    pub hex: bool,

    /// Reverse the packets again and report whether the payload survived
    #[arg(long)]
    pub verify: bool,

    /// Print pipeline statistics as JSON after the packets
    #[arg(long)]
    pub stats: bool,

    /// Payload, or `-` for stdin
    pub payload: String,
}

/// Print one hex packet per line
pub fn execute(args: ObfuscateArgs, config: &Config) -> Result<()> {
    let obfuscation = match args.profile {
        Some(ref name) => {
            let profile = Profile::from_name(name)
                .with_context(|| format!("Unknown profile: {name}"))?;
            Config::from_profile(profile).obfuscation
        }
        None => config.obfuscation.clone(),
    };
    let mut obfuscator = Obfuscator::new(&obfuscation).context("Failed to build pipeline")?;

    let payload = if args.hex {
        read_hex_input(&args.payload)?
    } else {
        read_input(&args.payload)?
    };

    let packets = obfuscator.obfuscate(&payload);
    let delay = obfuscator.get_timing_delay();
    info!(
        packets = packets.len(),
        delay_ms = delay.as_millis(),
        layers = ?obfuscator.layers().layers(),
        "Payload obfuscated"
    );

    let mut out = std::io::stdout().lock();
    for packet in &packets {
        writeln!(out, "{}", hex::encode(packet))?;
    }

    if args.verify {
        match obfuscator.deobfuscate(&packets) {
            Ok(restored) if restored == payload => writeln!(out, "round trip: ok")?,
            Ok(_) => {
                warn!("Restored payload differs from the input");
                writeln!(out, "round trip: mismatch")?;
            }
            Err(e) => writeln!(out, "round trip: failed ({e})")?,
        }
    }

    if args.stats {
        writeln!(out, "{}", serde_json::to_string_pretty(&obfuscator.stats())?)?;
    }
    Ok(())
}
