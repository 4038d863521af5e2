//! Probe command - censorship detection

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::net::IpAddr;
use std::time::Duration;
use x0t_core::Config;
use x0t_net::{CensorshipDetector, DetectionResult, ScanSummary};

use super::runtime;

/// Probe command arguments
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub action: ProbeAction,
}

/// Probe subcommands
#[derive(Subcommand, Debug)]
pub enum ProbeAction {
    /// Compare local DNS answers against control resolvers
    Dns {
        /// Domain to resolve
        domain: String,

        /// Known-good address (repeatable)
        #[arg(long = "expect", value_name = "IP")]
        expected: Vec<IpAddr>,
    },

    /// Repeated TCP connects, looking for resets and timeouts
    Tcp {
        /// Host to connect to
        host: String,

        /// Port
        #[arg(short, long, default_value_t = 443)]
        port: u16,
    },

    /// TLS handshake, looking for substituted certificates
    Tls {
        /// Host to connect to
        host: String,

        /// Port
        #[arg(short, long, default_value_t = 443)]
        port: u16,
    },

    /// HTTP fetch, looking for block statuses and block-page redirects
    Http {
        /// URL to fetch
        url: String,

        /// Text the genuine page contains
        #[arg(long, value_name = "TEXT")]
        expect_content: Option<String>,
    },

    /// Upload for a while and compare early and late throughput
    Throttle {
        /// Host to stream to
        host: String,

        /// Port
        #[arg(short, long, default_value_t = 443)]
        port: u16,

        /// Sampling window (default: probe.throttle_duration_ms)
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,
    },

    /// DNS, TCP, TLS and HTTP probes for every target
    Scan {
        /// Domains to scan
        #[arg(required = true)]
        targets: Vec<String>,

        /// Also run the throttling probe
        #[arg(long)]
        throttling: bool,
    },
}

/// Execute probe command
pub fn execute(args: ProbeArgs, config: &Config) -> Result<()> {
    let detector =
        CensorshipDetector::new(config.probe.clone()).context("Failed to set up probes")?;
    let ProbeArgs { json, action } = args;
    let rt = runtime()?;

    let results = rt.block_on(async {
        match action {
            ProbeAction::Dns { domain, expected } => {
                let expected = (!expected.is_empty()).then_some(expected.as_slice());
                vec![detector.detect_dns_manipulation(&domain, expected).await]
            }
            ProbeAction::Tcp { host, port } => vec![detector.detect_tcp_blocking(&host, port).await],
            ProbeAction::Tls { host, port } => {
                vec![detector.detect_tls_interception(&host, port).await]
            }
            ProbeAction::Http {
                url,
                expect_content,
            } => vec![
                detector
                    .detect_http_blocking(&url, expect_content.as_deref())
                    .await,
            ],
            ProbeAction::Throttle {
                host,
                port,
                duration_ms,
            } => vec![
                detector
                    .detect_throttling(&host, port, duration_ms.map(Duration::from_millis))
                    .await,
            ],
            ProbeAction::Scan {
                targets,
                throttling,
            } => detector.run_full_scan(&targets, throttling).await,
        }
    });

    let summary = (detector.summary().total_tests > 0).then(|| detector.summary());

    if json {
        print_json(&results, summary.as_ref())?;
    } else {
        for result in &results {
            print_result(result);
        }
        if let Some(ref summary) = summary {
            print_summary(summary);
        }
    }
    Ok(())
}

fn print_json(results: &[DetectionResult], summary: Option<&ScanSummary>) -> Result<()> {
    let value = match summary {
        Some(summary) => serde_json::json!({ "results": results, "summary": summary }),
        None => serde_json::to_value(results)?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_result(result: &DetectionResult) {
    let status = if result.error.is_some() && !result.is_blocked {
        "ERROR".yellow().bold()
    } else if result.is_blocked {
        "BLOCKED".red().bold()
    } else {
        "OK".green().bold()
    };
    println!(
        "{status:<8} {:<40} {:<16} confidence {:.2}  {:.0} ms",
        result.target,
        result.blocking_type.as_str(),
        result.confidence,
        result.latency_ms
    );
    if let Some(ref error) = result.error {
        println!("         {}", error.dimmed());
    }
}

fn print_summary(summary: &ScanSummary) {
    println!();
    println!(
        "{} tests, {} blocked ({:.0}%)",
        summary.total_tests,
        summary.blocked_count,
        summary.block_rate * 100.0
    );
    for (kind, count) in &summary.by_type {
        println!("  {kind:<16} {count}");
    }
}
