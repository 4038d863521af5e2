//! Training harness: scores strategies against the DPI model
//!
//! For every strategy, each sample payload is encoded under every mimic
//! protocol, mangled by the strategy and inspected fragment by fragment:
//!
//! ```text
//! fitness = bypass_rate - overhead_weight * overhead_ratio
//! ```
//!
//! Strategies of one generation are scored on scoped worker threads into a
//! concurrent map; `evolve` only runs once the map is complete.

use super::{Dna, GenevaGeneticOptimizer};
use crate::config::EvolutionConfig;
use crate::dpi::DpiModel;
use crate::stego::{MimicProtocol, StegoCodec};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, instrument, warn};

/// Per-generation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Generation number (1-based)
    pub generation: u64,
    /// Best fitness in the generation
    pub best_fitness: f64,
    /// Mean fitness in the generation
    pub mean_fitness: f64,
}

/// Result of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Best strategy found
    pub best: Dna,
    /// Its fitness
    pub best_fitness: f64,
    /// Generations actually run
    pub generations: u64,
    /// Run was stopped early
    pub interrupted: bool,
    /// Per-generation history
    pub history: Vec<GenerationStats>,
}

/// Fitness evaluator and training loop
pub struct Trainer<'a> {
    codec: &'a StegoCodec,
    model: DpiModel,
    samples: Vec<Vec<u8>>,
    overhead_weight: f64,
    workers: usize,
}

impl<'a> Trainer<'a> {
    /// Create a trainer using `codec` for encoding
    pub fn new(codec: &'a StegoCodec, config: &EvolutionConfig) -> Self {
        let workers = if config.workers == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            config.workers
        };
        Self {
            codec,
            model: DpiModel::new(),
            samples: config
                .sample_payloads
                .iter()
                .map(|s| s.as_bytes().to_vec())
                .collect(),
            overhead_weight: config.overhead_weight,
            workers,
        }
    }

    /// Replace the sample payloads
    pub fn with_samples(mut self, samples: Vec<Vec<u8>>) -> Self {
        self.samples = samples;
        self
    }

    /// Score one strategy
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, dna: &Dna) -> f64 {
        let mut total = 0usize;
        let mut undetected = 0usize;
        let mut plain_bytes = 0usize;
        let mut mangled_bytes = 0usize;

        for sample in &self.samples {
            for mimic in MimicProtocol::ALL {
                let plain = self.codec.encode(sample, mimic, None);
                plain_bytes += plain.iter().map(|p| p.len()).sum::<usize>();

                let mangled = dna.apply(plain);
                mangled_bytes += mangled.iter().map(|p| p.len()).sum::<usize>();
                total += mangled.len();
                undetected += mangled
                    .iter()
                    .filter(|p| !self.model.inspect(p).detected)
                    .count();
            }
        }

        let bypass_rate = if total == 0 {
            0.0
        } else {
            undetected as f64 / total as f64
        };
        let overhead_ratio = if plain_bytes == 0 {
            0.0
        } else {
            mangled_bytes.saturating_sub(plain_bytes) as f64 / plain_bytes as f64
        };

        bypass_rate - self.overhead_weight * overhead_ratio
    }

    /// Score a whole population in parallel
    pub fn evaluate_population(&self, population: &[Dna]) -> HashMap<usize, f64> {
        let scores: DashMap<usize, f64> = DashMap::with_capacity(population.len());
        let chunk = population.len().div_ceil(self.workers.max(1)).max(1);

        thread::scope(|s| {
            for (c, strands) in population.chunks(chunk).enumerate() {
                let scores = &scores;
                s.spawn(move || {
                    for (i, dna) in strands.iter().enumerate() {
                        scores.insert(c * chunk + i, self.evaluate(dna));
                    }
                });
            }
        });

        scores.into_iter().collect()
    }

    /// Run up to `generations` generations. `stop` is checked between generations.
    #[instrument(skip(self, optimizer, stop))]
    pub fn run(
        &self,
        optimizer: &mut GenevaGeneticOptimizer,
        generations: u64,
        stop: Option<&AtomicBool>,
    ) -> TrainingReport {
        let mut history = Vec::new();
        let mut interrupted = false;

        for _ in 0..generations {
            if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                warn!("Training interrupted");
                interrupted = true;
                break;
            }

            let scores = self.evaluate_population(optimizer.population());
            optimizer.evolve(&scores);

            let best_fitness = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
            #[allow(clippy::cast_precision_loss)]
            let mean_fitness = scores.values().sum::<f64>() / scores.len().max(1) as f64;
            let stats = GenerationStats {
                generation: optimizer.generation(),
                best_fitness,
                mean_fitness,
            };
            info!(
                generation = stats.generation,
                best = stats.best_fitness,
                mean = stats.mean_fitness,
                "Generation complete"
            );
            history.push(stats);
        }

        let best = optimizer.get_best_strategy().cloned().unwrap_or_default();
        TrainingReport {
            best_fitness: best.fitness,
            best,
            generations: history.len() as u64,
            interrupted,
            history,
        }
    }
}
