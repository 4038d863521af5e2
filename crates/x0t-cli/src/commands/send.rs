//! Send command - push data through a pluggable transport

use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use tracing::info;
use x0t_core::config::TransportKind;
use x0t_core::Config;
use x0t_net::{create_transport, PluggableTransport};

use super::{read_input, runtime};

/// Send command arguments
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Transport: obfs4, meek or snowflake (default: transport.kind)
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// Destination host (for meek, the hidden host behind the front)
    #[arg(long)]
    pub target: String,

    /// Destination port
    #[arg(short, long, default_value_t = 443)]
    pub port: u16,

    /// Meek front domain (overrides transport.front_domain)
    #[arg(long)]
    pub front: Option<String>,

    /// Wait for one reply and write it to stdout
    #[arg(short, long)]
    pub receive: bool,

    /// Print transport statistics as JSON when done
    #[arg(long)]
    pub stats: bool,

    /// Data to send, or `-` for stdin
    pub data: String,
}

/// Execute send command
pub fn execute(args: SendArgs, config: &Config) -> Result<()> {
    let mut transport_config = config.transport.clone();
    if let Some(kind) = args.transport {
        transport_config.kind = kind;
    }
    if let Some(ref front) = args.front {
        transport_config.front_domain.clone_from(front);
    }
    let data = read_input(&args.data)?;
    let buffer_size = transport_config.buffer_size;

    let mut transport = create_transport(&transport_config)
        .with_context(|| format!("Failed to set up {} transport", transport_config.kind))?;

    let rt = runtime()?;
    rt.block_on(async {
        transport
            .connect(&args.target, args.port)
            .await
            .with_context(|| format!("Failed to connect to {}:{}", args.target, args.port))?;

        let sent = transport.send(&data).await.context("Send failed")?;
        info!(sent, kind = %transport.kind(), "Data sent");

        if args.receive {
            let reply = transport.receive(buffer_size).await.context("Receive failed")?;
            let mut out = std::io::stdout().lock();
            out.write_all(&reply)?;
            out.flush()?;
        }

        transport.close().await.context("Close failed")?;
        anyhow::Ok(())
    })?;

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&transport.stats())?);
    }
    Ok(())
}
