//! Decoding Graph
//!
//! The floating-point weighted graph built by the caller from an external
//! error model, before discretization. Each error mechanism with probability
//! `p` contributes an edge of weight `ln((1-p)/p)`; parallel contributions to
//! the same edge are merged with a numerically stable log-sum-exp identity.
//! Discretization maps the weights onto even non-negative-magnitude integers
//! and produces the normalising constant used to convert matching weights
//! back into the caller's unit.
//!

use super::error::*;
use super::util::*;
use serde::{Deserialize, Serialize};

/// merge the log-likelihood weights of two independent error mechanisms
/// acting on the same edge
pub fn merge_weights(a: f64, b: f64) -> f64 {
    let sgn = a.signum() * b.signum();
    let signed_min = sgn * a.abs().min(b.abs());
    signed_min + (1. + (-(a + b).abs()).exp()).ln() - (1. + (-(a - b).abs()).exp()).ln()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedNeighbor {
    /// `None` denotes the virtual boundary
    pub node: Option<DetectorIndex>,
    pub weight: f64,
    pub observables: Vec<ObservableIndex>,
}

/// a weighted graph under construction; every edge is stored on both of its
/// endpoints and merged in place when added twice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedGraph {
    pub num_detectors: usize,
    pub num_observables: usize,
    pub adjacency: Vec<Vec<WeightedNeighbor>>,
}

impl WeightedGraph {
    pub fn new(num_detectors: usize, num_observables: usize) -> Self {
        Self {
            num_detectors,
            num_observables,
            adjacency: (0..num_detectors).map(|_| vec![]).collect(),
        }
    }

    fn check_observables(&self, observables: &[ObservableIndex]) -> MwpmResult<()> {
        for &observable in observables.iter() {
            MwpmError::check_observable(observable, self.num_observables)?;
        }
        Ok(())
    }

    /// insert an edge, or merge the weight into the existing edge; the
    /// observables of the first insertion are kept
    pub fn add_or_merge_edge(
        &mut self,
        detector_1: DetectorIndex,
        detector_2: DetectorIndex,
        weight: f64,
        observables: &[ObservableIndex],
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector_1, self.num_detectors)?;
        MwpmError::check_detector(detector_2, self.num_detectors)?;
        if detector_1 == detector_2 {
            return Err(MwpmError::SelfLoop { detector: detector_1 });
        }
        self.check_observables(observables)?;
        let existing = self.adjacency[detector_1]
            .iter()
            .position(|neighbor| neighbor.node == Some(detector_2));
        match existing {
            Some(index) => {
                let merged = merge_weights(self.adjacency[detector_1][index].weight, weight);
                self.adjacency[detector_1][index].weight = merged;
                let reverse = self.adjacency[detector_2]
                    .iter()
                    .position(|neighbor| neighbor.node == Some(detector_1))
                    .expect("edges are stored on both endpoints");
                self.adjacency[detector_2][reverse].weight = merged;
            }
            None => {
                self.adjacency[detector_1].push(WeightedNeighbor {
                    node: Some(detector_2),
                    weight,
                    observables: observables.to_vec(),
                });
                self.adjacency[detector_2].push(WeightedNeighbor {
                    node: Some(detector_1),
                    weight,
                    observables: observables.to_vec(),
                });
            }
        }
        Ok(())
    }

    pub fn add_or_merge_boundary_edge(
        &mut self,
        detector: DetectorIndex,
        weight: f64,
        observables: &[ObservableIndex],
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector, self.num_detectors)?;
        self.check_observables(observables)?;
        let existing = self.adjacency[detector].iter().position(|neighbor| neighbor.node.is_none());
        match existing {
            Some(index) => {
                let merged = merge_weights(self.adjacency[detector][index].weight, weight);
                self.adjacency[detector][index].weight = merged;
            }
            None => self.adjacency[detector].push(WeightedNeighbor {
                node: None,
                weight,
                observables: observables.to_vec(),
            }),
        }
        Ok(())
    }

    /// ingest one error mechanism of an external error model: probability `p`,
    /// triggered detectors and flipped observables
    pub fn handle_error_mechanism(
        &mut self,
        probability: f64,
        detectors: &[DetectorIndex],
        observables: &[ObservableIndex],
    ) -> MwpmResult<()> {
        if !(probability > 0. && probability < 1.) {
            return Err(MwpmError::InvalidErrorProbability { probability });
        }
        let weight = ((1. - probability) / probability).ln();
        match detectors.len() {
            2 => self.add_or_merge_edge(detectors[0], detectors[1], weight, observables),
            1 => self.add_or_merge_boundary_edge(detectors[0], weight, observables),
            num_detectors => Err(MwpmError::InvalidErrorMechanism { num_detectors }),
        }
    }

    pub fn max_abs_weight(&self) -> f64 {
        let mut max_abs_weight: f64 = 0.;
        for neighbors in self.adjacency.iter() {
            for neighbor in neighbors.iter() {
                if neighbor.weight.abs() > max_abs_weight {
                    max_abs_weight = neighbor.weight.abs();
                }
            }
        }
        max_abs_weight
    }

    /// discretize the weights into even integers across `num_distinct_weights`
    /// half-weight levels; returns the integer initializer together with the
    /// normalising constant such that `integer_weight / normalising_constant`
    /// recovers the caller's unit
    pub fn discretize(&self, num_distinct_weights: usize) -> MwpmResult<(SolverInitializer, f64)> {
        if num_distinct_weights == 0 {
            return Err(MwpmError::NoWeightLevels);
        }
        // no edge may exceed Weight::MAX / num_detectors, otherwise summing
        // along a path may overflow
        let max_weight = 2 * num_distinct_weights as Weight;
        let max_safe_weight = Weight::MAX / (self.num_detectors.max(1) as Weight);
        if max_weight > max_safe_weight {
            return Err(MwpmError::WeightOverflow {
                weight: max_weight,
                max_safe_weight,
            });
        }
        let max_abs_weight = self.max_abs_weight();
        let scale = if max_abs_weight > 0. {
            num_distinct_weights as f64 / max_abs_weight
        } else {
            1.
        };
        let normalising_constant = 2. * scale;
        let mut weighted_edges = vec![];
        for (detector_1, neighbors) in self.adjacency.iter().enumerate() {
            for neighbor in neighbors.iter() {
                if let Some(detector_2) = neighbor.node {
                    if detector_2 < detector_1 {
                        continue; // each edge is discretized once
                    }
                }
                let half_weight = (neighbor.weight.abs() * scale).round() as Weight;
                let weight = 2 * half_weight * if neighbor.weight < 0. { -1 } else { 1 };
                weighted_edges.push(WeightedEdge {
                    detector_1,
                    detector_2: neighbor.node,
                    weight,
                    observables: neighbor.observables.clone(),
                });
            }
        }
        Ok((
            SolverInitializer::new(self.num_detectors, self.num_observables, weighted_edges),
            normalising_constant,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probability_to_weight(probability: f64) -> f64 {
        ((1. - probability) / probability).ln()
    }

    fn assert_approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn decoding_graph_merge_weights_identity() {
        // cargo test decoding_graph_merge_weights_identity -- --nocapture
        for (p_1, p_2) in [(0.01, 0.2), (0.3, 0.3), (0.45, 0.001), (0.7, 0.2)] {
            let merged = merge_weights(probability_to_weight(p_1), probability_to_weight(p_2));
            // either error firing alone triggers the edge
            let p_either = p_1 * (1. - p_2) + p_2 * (1. - p_1);
            assert_approx(merged, probability_to_weight(p_either));
            // commutative
            assert_approx(
                merged,
                merge_weights(probability_to_weight(p_2), probability_to_weight(p_1)),
            );
        }
        // associative
        let (a, b, c) = (
            probability_to_weight(0.01),
            probability_to_weight(0.2),
            probability_to_weight(0.4),
        );
        assert_approx(merge_weights(merge_weights(a, b), c), merge_weights(a, merge_weights(b, c)));
    }

    #[test]
    fn decoding_graph_merge_on_insert() {
        // cargo test decoding_graph_merge_on_insert -- --nocapture
        let mut graph = WeightedGraph::new(2, 1);
        graph.handle_error_mechanism(0.1, &[0, 1], &[0]).unwrap();
        graph.handle_error_mechanism(0.2, &[0, 1], &[0]).unwrap();
        assert_eq!(graph.adjacency[0].len(), 1, "the second mechanism merges into the first");
        let expected = merge_weights(probability_to_weight(0.1), probability_to_weight(0.2));
        assert_approx(graph.adjacency[0][0].weight, expected);
        assert_approx(graph.adjacency[1][0].weight, expected);
        graph.handle_error_mechanism(0.3, &[1], &[]).unwrap();
        graph.handle_error_mechanism(0.3, &[1], &[]).unwrap();
        assert_eq!(graph.adjacency[1].len(), 2);
        assert_approx(
            graph.adjacency[1][1].weight,
            merge_weights(probability_to_weight(0.3), probability_to_weight(0.3)),
        );
        assert_eq!(
            graph.handle_error_mechanism(0.1, &[0, 1, 0], &[]),
            Err(MwpmError::InvalidErrorMechanism { num_detectors: 3 })
        );
        assert_eq!(
            graph.handle_error_mechanism(1.5, &[0], &[]),
            Err(MwpmError::InvalidErrorProbability { probability: 1.5 })
        );
    }

    #[test]
    fn decoding_graph_discretize() {
        // cargo test decoding_graph_discretize -- --nocapture
        let mut graph = WeightedGraph::new(3, 2);
        graph.add_or_merge_edge(0, 1, 2.0, &[0]).unwrap();
        graph.add_or_merge_edge(1, 2, 1.0, &[1]).unwrap();
        graph.add_or_merge_boundary_edge(2, -0.5, &[]).unwrap();
        let (initializer, normalising_constant) = graph.discretize(100).unwrap();
        assert_eq!(initializer.num_detectors, 3);
        assert_eq!(initializer.weighted_edges.len(), 3);
        for edge in initializer.weighted_edges.iter() {
            assert_eq!(edge.weight % 2, 0, "discretized weights are even");
            // the discretization error is at most one half-weight level
            let original = match (edge.detector_1, edge.detector_2) {
                (0, Some(1)) => 2.0,
                (1, Some(2)) => 1.0,
                (2, None) => -0.5,
                other => panic!("unexpected edge {other:?}"),
            };
            assert!((edge.weight as f64 / normalising_constant - original).abs() <= 1. / normalising_constant);
        }
        // the heaviest edge sits exactly at the top level
        assert_eq!(initializer.weighted_edges[0].weight, 200);
    }

    #[test]
    fn decoding_graph_discretize_overflow() {
        // cargo test decoding_graph_discretize_overflow -- --nocapture
        let graph = WeightedGraph::new(1000, 0);
        assert!(matches!(
            graph.discretize(Weight::MAX as usize / 1000),
            Err(MwpmError::WeightOverflow { .. })
        ));
        assert_eq!(graph.discretize(0), Err(MwpmError::NoWeightLevels));
    }
}
