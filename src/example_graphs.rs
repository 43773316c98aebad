//! Example Graphs
//!
//! Small decoding-graph constructions used by the test suite and by examples:
//! repetition-code lines, rings and random graphs with a deterministic RNG.
//!

use super::util::*;
use crate::rand::Rng;
use crate::rand_xoshiro::rand_core::SeedableRng;

/// the syndrome graph of a distance-`d` repetition code: `d - 1` detectors in
/// a line, boundary edges on both ends; edge `i` flips observable `i`
pub fn repetition_code_graph(d: usize, half_weight: Weight) -> SolverInitializer {
    assert!(d >= 2, "a repetition code requires distance of at least 2");
    let num_detectors = d - 1;
    let weight = 2 * half_weight;
    let mut weighted_edges = vec![WeightedEdge {
        detector_1: 0,
        detector_2: None,
        weight,
        observables: vec![0],
    }];
    for i in 0..num_detectors - 1 {
        weighted_edges.push(WeightedEdge {
            detector_1: i,
            detector_2: Some(i + 1),
            weight,
            observables: vec![i + 1],
        });
    }
    weighted_edges.push(WeightedEdge {
        detector_1: num_detectors - 1,
        detector_2: None,
        weight,
        observables: vec![num_detectors],
    });
    SolverInitializer::new(num_detectors, d, weighted_edges)
}

/// a ring of detectors without boundary; edge `i` connects detector `i` with
/// detector `i + 1` and flips observable `i`: with more than 64 detectors the
/// observables no longer fit a machine word
pub fn ring_graph(num_detectors: usize, half_weight: Weight) -> SolverInitializer {
    assert!(num_detectors >= 3, "a ring requires at least 3 detectors");
    let weighted_edges = (0..num_detectors)
        .map(|i| WeightedEdge {
            detector_1: i,
            detector_2: Some((i + 1) % num_detectors),
            weight: 2 * half_weight,
            observables: vec![i],
        })
        .collect();
    SolverInitializer::new(num_detectors, num_detectors, weighted_edges)
}

/// a connected random graph with random even weights, a boundary edge on a
/// random subset of detectors and one random observable per edge
pub fn random_graph(
    num_detectors: usize,
    edge_probability: f64,
    max_half_weight: Weight,
    rng: &mut DeterministicRng,
) -> SolverInitializer {
    assert!(num_detectors >= 2);
    let num_observables = 8;
    let mut weighted_edges = vec![];
    let random_edge = |detector_1: DetectorIndex, detector_2: Option<DetectorIndex>, rng: &mut DeterministicRng| WeightedEdge {
        detector_1,
        detector_2,
        weight: 2 * rng.gen_range(1..=max_half_weight),
        observables: vec![rng.gen_range(0..num_observables)],
    };
    for i in 1..num_detectors {
        // a random spanning tree keeps the graph connected
        let anchor = rng.gen_range(0..i);
        weighted_edges.push(random_edge(anchor, Some(i), rng));
    }
    for i in 0..num_detectors {
        for j in (i + 1)..num_detectors {
            let exists = weighted_edges
                .iter()
                .any(|edge| edge.detector_1 == i && edge.detector_2 == Some(j) || edge.detector_1 == j && edge.detector_2 == Some(i));
            if !exists && rng.gen_bool(edge_probability) {
                weighted_edges.push(random_edge(i, Some(j), rng));
            }
        }
        if rng.gen_bool(0.3) {
            weighted_edges.push(random_edge(i, None, rng));
        }
    }
    SolverInitializer::new(num_detectors, num_observables, weighted_edges)
}

/// sample a random syndrome where every detector fires independently
pub fn random_syndrome(num_detectors: usize, probability: f64, rng: &mut DeterministicRng) -> SyndromePattern {
    SyndromePattern::new((0..num_detectors).filter(|_| rng.gen_bool(probability)).collect())
}

pub fn seeded_rng(seed: u64) -> DeterministicRng {
    DeterministicRng::seed_from_u64(seed)
}
