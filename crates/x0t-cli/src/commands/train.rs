//! Train command - evolve an evasion strategy against the DPI model

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use rand::RngCore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use x0t_core::{Config, GenevaGeneticOptimizer, StegoCodec, Trainer, TrainingReport};
use zeroize::Zeroizing;

use super::codec::codec_from_env;

/// Train command arguments
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Generations to run (default: evolution.generations)
    #[arg(short, long)]
    pub generations: Option<u32>,

    /// Population size (default: evolution.population_size)
    #[arg(short, long)]
    pub population: Option<usize>,

    /// PRNG seed for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the best strategy here as JSON (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write the full training report instead of just the strategy
    #[arg(long)]
    pub report: bool,
}

/// Codec keyed from the environment, or a throwaway key when none is set
fn training_codec(config: &Config) -> Result<StegoCodec> {
    if std::env::var_os(&config.codec.master_key_env).is_some() {
        return codec_from_env(config);
    }
    warn!(
        var = %config.codec.master_key_env,
        "No master key set, training with an ephemeral key"
    );
    let mut key = Zeroizing::new([0u8; 32]);
    rand::rngs::OsRng.fill_bytes(key.as_mut_slice());
    Ok(StegoCodec::new(key.as_slice())?)
}

/// Execute the train command
pub fn execute(args: TrainArgs, config: &Config) -> Result<()> {
    let mut evolution = config.evolution.clone();
    if let Some(generations) = args.generations {
        evolution.generations = generations;
    }
    if let Some(population) = args.population {
        evolution.population_size = population;
    }
    if args.seed.is_some() {
        evolution.seed = args.seed;
    }
    anyhow::ensure!(evolution.population_size > 0, "Population size must be at least 1");

    let codec = training_codec(config)?;
    let trainer = Trainer::new(&codec, &evolution);
    let mut optimizer = match evolution.seed {
        Some(seed) => GenevaGeneticOptimizer::with_seed(evolution.population_size, seed),
        None => GenevaGeneticOptimizer::new(evolution.population_size),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, finishing current generation...");
        s.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    info!(
        population = evolution.population_size,
        generations = evolution.generations,
        "Training started"
    );
    let report = trainer.run(&mut optimizer, u64::from(evolution.generations), Some(&*stop));

    write_output(&report, args.output.as_ref(), args.report)?;
    print_summary(&report);
    Ok(())
}

fn write_output(report: &TrainingReport, output: Option<&PathBuf>, full: bool) -> Result<()> {
    let json = if full {
        serde_json::to_string_pretty(report).context("Failed to serialize report")?
    } else {
        report.best.to_json().context("Failed to serialize strategy")?
    };

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write strategy to {}", path.display()))?;
            info!("Wrote strategy to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_summary(report: &TrainingReport) {
    let status = if report.interrupted {
        "interrupted".yellow()
    } else {
        "complete".green()
    };
    eprintln!(
        "Training {status}: {} generations, best fitness {:.4}, {} actions",
        report.generations,
        report.best_fitness,
        report.best.len()
    );
}
