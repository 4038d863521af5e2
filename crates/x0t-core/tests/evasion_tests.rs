//! Integration tests for the evasion optimizer and training harness

use std::collections::HashMap;
use x0t_core::config::EvolutionConfig;
use x0t_core::evasion::{Dna, GenevaGeneticOptimizer, Trainer};
use x0t_core::stego::StegoCodec;

#[test]
fn test_optimizer_evolve_property() {
    let mut opt = GenevaGeneticOptimizer::new(4);
    let fitness = HashMap::from([(0, 0.9), (1, 0.1), (2, 0.5), (3, 0.2)]);
    opt.evolve(&fitness);
    assert_eq!(opt.population().len(), 4);
    assert_eq!(opt.population()[0].fitness, 0.9);
}

#[test]
fn test_population_size_invariant_over_generations() {
    let mut opt = GenevaGeneticOptimizer::with_seed(13, 99);
    for round in 0..20u32 {
        let fitness: HashMap<usize, f64> = (0..13).map(|i| (i, f64::from(i as u32 * round))).collect();
        opt.evolve(&fitness);
        assert_eq!(opt.population().len(), 13);
        let sorted = opt.population()[..3]
            .windows(2)
            .all(|w| w[0].fitness >= w[1].fitness);
        assert!(sorted);
    }
}

#[test]
fn test_seeded_optimizers_agree() {
    let a = GenevaGeneticOptimizer::with_seed(6, 1234);
    let b = GenevaGeneticOptimizer::with_seed(6, 1234);
    assert_eq!(a.population(), b.population());
}

#[test]
fn test_training_loop_persists_best() {
    let codec = StegoCodec::new(&[0x77; 48]).unwrap();
    let config = EvolutionConfig {
        population_size: 6,
        workers: 3,
        seed: Some(5),
        ..EvolutionConfig::default()
    };
    let trainer = Trainer::new(&codec, &config);
    let mut opt = GenevaGeneticOptimizer::with_seed(config.population_size, 5);

    let report = trainer.run(&mut opt, 4, None);
    assert_eq!(report.generations, 4);
    assert!(report.best_fitness <= 1.0);

    let json = report.best.to_json().unwrap();
    let restored = Dna::from_json(&json).unwrap();
    assert_eq!(restored.actions, report.best.actions);
}
