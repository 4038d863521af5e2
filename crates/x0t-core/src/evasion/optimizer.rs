//! Genetic optimizer over evasion strategies

use super::Dna;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Truncation-selection genetic optimizer
///
/// Each generation keeps the best quarter of the population (at least one
/// strand) and refills it with mutated clones of random survivors. The
/// population size never changes.
#[derive(Debug)]
pub struct GenevaGeneticOptimizer {
    population: Vec<Dna>,
    population_size: usize,
    generation: u64,
    rng: SmallRng,
}

impl GenevaGeneticOptimizer {
    /// Population of `pop_size` strands (at least 1), each seeded with one random action
    pub fn new(pop_size: usize) -> Self {
        Self::from_rng(pop_size, SmallRng::from_entropy())
    }

    /// Deterministic optimizer for reproducible runs
    pub fn with_seed(pop_size: usize, seed: u64) -> Self {
        Self::from_rng(pop_size, SmallRng::seed_from_u64(seed))
    }

    fn from_rng(pop_size: usize, mut rng: SmallRng) -> Self {
        let population_size = pop_size.max(1);
        let population = (0..population_size)
            .map(|_| {
                let mut dna = Dna::new();
                dna.mutate(&mut rng);
                dna
            })
            .collect();
        Self {
            population,
            population_size,
            generation: 0,
            rng,
        }
    }

    /// Current population, best first after an `evolve`
    pub fn population(&self) -> &[Dna] {
        &self.population
    }

    /// Completed generations
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance one generation. Members missing from `fitness_by_index` score 0;
    /// NaN scores rank last.
    ///
    /// Survivors keep their fitness; offspring start at 0 until measured.
    #[instrument(skip(self, fitness_by_index), fields(generation = self.generation))]
    pub fn evolve(&mut self, fitness_by_index: &HashMap<usize, f64>) {
        for (i, dna) in self.population.iter_mut().enumerate() {
            let fitness = fitness_by_index.get(&i).copied().unwrap_or(0.0);
            dna.fitness = if fitness.is_nan() { f64::NEG_INFINITY } else { fitness };
        }

        self.population
            .sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        let survivors = (self.population.len() / 4).max(1);
        self.population.truncate(survivors);

        while self.population.len() < self.population_size {
            let Some(parent) = self.population[..survivors].choose(&mut self.rng) else {
                break;
            };
            let mut child = parent.clone();
            child.mutate(&mut self.rng);
            child.fitness = 0.0;
            self.population.push(child);
        }

        self.generation += 1;
        debug!(
            best = self.population.first().map_or(0.0, |d| d.fitness),
            survivors,
            "Generation evolved"
        );
    }

    /// Highest-fitness strategy after the last `evolve`
    pub fn get_best_strategy(&self) -> Option<&Dna> {
        self.population.first()
    }
}
