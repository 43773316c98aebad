extern crate cfg_if;
extern crate derivative;
extern crate parking_lot;
extern crate priority_queue;
extern crate rand;
extern crate rand_xoshiro;
extern crate serde;
extern crate serde_json;
extern crate thiserror;
extern crate tracing;
#[cfg(test)]
extern crate petgraph;

pub mod alternating_tree;
pub mod complete_graph;
pub mod decoding_graph;
pub mod error;
pub mod events;
pub mod example_graphs;
pub mod flooder;
pub mod matching_graph;
pub mod mwpm;
pub mod mwpm_solver;
pub mod pointers;
pub mod region;
pub mod search_flooder;
pub mod util;

use error::*;
use mwpm_solver::*;
use util::*;

/// solve a single decoding problem (to optimize speed, consider reusing a
/// [`mwpm_solver::Solver`] object across shots)
pub fn mwpm_decode(initializer: &SolverInitializer, syndrome: &SyndromePattern) -> MwpmResult<DecodingOutcome> {
    // sanity check
    assert!(initializer.num_detectors >= 1, "at least one detector required");
    let max_safe_weight = Weight::MAX / (initializer.num_detectors as Weight);
    for edge in initializer.weighted_edges.iter() {
        if edge.weight.abs() > max_safe_weight {
            panic!(
                "edge {}-{:?} has weight {} > max safe weight {}, it may cause the decoder to overflow",
                edge.detector_1, edge.detector_2, edge.weight, max_safe_weight
            );
        }
    }
    let mut solver = Solver::new(initializer)?;
    solver.decode(syndrome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lib_mwpm_decode() {
        // cargo test lib_mwpm_decode -- --nocapture
        let initializer = SolverInitializer::new(
            2,
            1,
            vec![WeightedEdge {
                detector_1: 0,
                detector_2: Some(1),
                weight: 2,
                observables: vec![0],
            }],
        );
        let outcome = mwpm_decode(&initializer, &SyndromePattern::new(vec![0, 1])).unwrap();
        assert_eq!(outcome.observables, vec![1]);
        assert_eq!(outcome.weight, 2);
    }
}
