//! CLI commands

pub mod codec;
pub mod completions;
pub mod config;
pub mod obfuscate;
pub mod probe;
pub mod send;
pub mod train;

use anyhow::{Context, Result};
use clap::Subcommand;
use std::io::Read;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encrypt a payload and disguise it as HTTP, ICMP or DNS
    Encode(codec::EncodeArgs),

    /// Recover the payload from a stego packet
    Decode(codec::DecodeArgs),

    /// Run the DPI model over a packet
    Inspect(codec::InspectArgs),

    /// Run a payload through the obfuscation pipeline
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Evolve an evasion strategy against the DPI model
    Train(train::TrainArgs),

    /// Probe the network for censorship
    Probe(probe::ProbeArgs),

    /// Send data through a pluggable transport
    Send(send::SendArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// `-` reads stdin, anything else is taken literally
pub(crate) fn read_input(arg: &str) -> Result<Vec<u8>> {
    if arg == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        Ok(arg.as_bytes().to_vec())
    }
}

/// Hex argument or stdin, whitespace ignored
pub(crate) fn read_hex_input(arg: &str) -> Result<Vec<u8>> {
    let raw = read_input(arg)?;
    let text = String::from_utf8(raw).context("Hex input is not UTF-8")?;
    let compact: String = text.split_whitespace().collect();
    hex::decode(&compact).context("Input is not valid hex")
}

/// Runtime for the network commands
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
