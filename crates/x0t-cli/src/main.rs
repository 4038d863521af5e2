//! x0t CLI
//!
//! Command-line front end for the stego codec, the evasion trainer, the
//! censorship probes and the pluggable transports.

mod args;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use args::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = commands::config::load_config(args.config.as_deref())?;

    // Guard flushes the file writer on drop
    let _guard = logging::init(&args, &config.logging)?;
    debug!(profile = ?config.profile, "Configuration loaded");

    let result = run(args, config);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args, config: x0t_core::Config) -> Result<()> {
    match args.command {
        commands::Command::Encode(a) => commands::codec::encode(a, &config),
        commands::Command::Decode(a) => commands::codec::decode(a, &config),
        commands::Command::Inspect(a) => commands::codec::inspect(a),
        commands::Command::Obfuscate(a) => commands::obfuscate::execute(a, &config),
        commands::Command::Train(a) => commands::train::execute(a, &config),
        commands::Command::Probe(a) => commands::probe::execute(a, &config),
        commands::Command::Send(a) => commands::send::execute(a, &config),
        commands::Command::Config(a) => commands::config::execute(a, &config),
        commands::Command::Completions(a) => commands::completions::execute(a),
    }
}
