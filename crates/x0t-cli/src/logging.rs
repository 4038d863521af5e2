//! Logging initialization

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use x0t_core::config::LoggingConfig;

use crate::args::{Args, LogFormat};

fn level(args: &Args, config: &LoggingConfig) -> Level {
    if args.quiet {
        return Level::ERROR;
    }
    match args.verbose {
        0 => config.level.parse().unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn open_log_file(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create log file: {}", path.display()))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Initialize logging from CLI arguments, falling back to the `[logging]` section
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// The returned guard must be held until exit when a log file is in use.
pub fn init(args: &Args, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level(args, config).into())
        .from_env_lossy();

    let format = match args.log_format {
        LogFormat::Text if config.json_format => LogFormat::Json,
        other => other,
    };
    let log_file: Option<PathBuf> = args
        .log_file
        .clone()
        .or_else(|| config.file.as_ref().map(PathBuf::from));

    let (file_writer, guard) = match log_file {
        Some(ref path) => {
            let (writer, guard) = open_log_file(path)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    match format {
        LogFormat::Text => {
            let file_layer = file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(args.verbose >= 2)
                        .with_thread_ids(args.verbose >= 3)
                        .with_file(args.verbose >= 3)
                        .with_line_number(args.verbose >= 3),
                )
                .with(file_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
        }
        LogFormat::Json => {
            let file_layer = file_writer.map(|w| fmt::layer().json().with_writer(w));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
        }
        LogFormat::Compact => {
            let file_layer =
                file_writer.map(|w| fmt::layer().compact().with_ansi(false).with_writer(w));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
                .context("Failed to install log subscriber")?;
        }
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_level_selection() {
        let config = LoggingConfig::default();

        let args = Args::parse_from(["x0t", "-q", "config", "paths"]);
        assert_eq!(level(&args, &config), Level::ERROR);

        let args = Args::parse_from(["x0t", "-vv", "config", "paths"]);
        assert_eq!(level(&args, &config), Level::TRACE);

        let args = Args::parse_from(["x0t", "config", "paths"]);
        assert_eq!(level(&args, &config), Level::INFO);

        let config = LoggingConfig {
            level: "warn".into(),
            ..LoggingConfig::default()
        };
        assert_eq!(level(&args, &config), Level::WARN);
    }
}
