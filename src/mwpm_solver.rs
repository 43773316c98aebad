//! Minimum-Weight Perfect Matching Solver
//!
//! The library facade tying everything together: it builds the matching graph
//! (and, for wide observables, the search graph) from an initializer, runs
//! negative-weight canonicalisation, and decodes syndromes into observable
//! flip patterns. A solver is reused across shots: decoding state is cleared
//! between calls while the graphs are kept.
//!

use super::error::*;
use super::flooder::*;
use super::matching_graph::*;
use super::mwpm::*;
use super::pointers::RwLockPtr;
use super::search_flooder::*;
use super::util::*;
use std::collections::BTreeSet;
use tracing::debug;

/// the decoded result of one syndrome
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecodingOutcome {
    /// one byte per observable, 1 when the observable is flipped
    pub observables: Vec<u8>,
    /// total weight of the minimum-weight matching, in discretized units
    pub weight: Weight,
}

pub struct Solver {
    initializer: SolverInitializer,
    mwpm: Mwpm,
    /// only constructed when the observables overflow the machine word
    search_flooder: Option<SearchFlooder>,
    /// observables toggled by negative-weight canonicalisation, as indices
    /// (the mask variant lives on the matching graph)
    negative_observable_indices: Vec<ObservableIndex>,
    normalising_constant: f64,
}

impl Solver {
    pub fn new(initializer: &SolverInitializer) -> MwpmResult<Self> {
        Self::with_normalising_constant(initializer, 1.)
    }

    /// build a solver from a floating-point weighted graph, going through
    /// discretization
    pub fn from_weighted_graph(
        graph: &crate::decoding_graph::WeightedGraph,
        num_distinct_weights: usize,
    ) -> MwpmResult<Self> {
        let (initializer, normalising_constant) = graph.discretize(num_distinct_weights)?;
        Self::with_normalising_constant(&initializer, normalising_constant)
    }

    pub fn with_normalising_constant(initializer: &SolverInitializer, normalising_constant: f64) -> MwpmResult<Self> {
        let max_safe_weight = Weight::MAX / (initializer.num_detectors.max(1) as Weight);
        for edge in initializer.weighted_edges.iter() {
            if edge.weight.abs() > max_safe_weight {
                return Err(MwpmError::WeightOverflow {
                    weight: edge.weight,
                    max_safe_weight,
                });
            }
            // only boundary edges may carry odd weights: a single growing
            // radius always reaches them at an integer time
            if let Some(detector_2) = edge.detector_2 {
                if edge.weight % 2 != 0 {
                    return Err(MwpmError::OddEdgeWeight {
                        detector_1: edge.detector_1,
                        detector_2,
                        weight: edge.weight,
                    });
                }
            }
        }
        let wide = initializer.num_observables > OBS_MASK_BITS;
        let mut graph = MatchingGraph::new(initializer.num_detectors, initializer.num_observables);
        for edge in initializer.weighted_edges.iter() {
            for &observable in edge.observables.iter() {
                MwpmError::check_observable(observable, initializer.num_observables)?;
            }
            let mask = if wide { 0 } else { pack_observables(&edge.observables) };
            match edge.detector_2 {
                Some(detector_2) => graph.add_edge(edge.detector_1, detector_2, edge.weight, mask)?,
                None => graph.add_boundary_edge(edge.detector_1, edge.weight, mask)?,
            }
        }
        let mut flooder = GraphFlooder::new(graph);
        flooder.sync_negative_weight_observables_and_detection_events();
        let (search_flooder, negative_observable_indices) = if wide {
            let mut search_graph = SearchGraph::new(initializer.num_detectors, initializer.num_observables);
            let mut negative_observables = BTreeSet::new();
            for edge in initializer.weighted_edges.iter() {
                if edge.weight < 0 {
                    for &observable in edge.observables.iter() {
                        if !negative_observables.remove(&observable) {
                            negative_observables.insert(observable);
                        }
                    }
                }
                match edge.detector_2 {
                    Some(detector_2) => {
                        search_graph.add_edge(edge.detector_1, detector_2, edge.weight.abs(), edge.observables.clone())?
                    }
                    None => search_graph.add_boundary_edge(edge.detector_1, edge.weight.abs(), edge.observables.clone())?,
                }
            }
            (
                Some(SearchFlooder::new(search_graph)),
                negative_observables.into_iter().collect(),
            )
        } else {
            (None, vec![])
        };
        Ok(Self {
            initializer: initializer.clone(),
            mwpm: Mwpm::new(flooder),
            search_flooder,
            negative_observable_indices,
            normalising_constant,
        })
    }

    pub fn initializer(&self) -> &SolverInitializer {
        &self.initializer
    }

    /// convert a discretized matching weight back into the caller's unit
    pub fn rescale_weight(&self, weight: Weight) -> f64 {
        weight as f64 / self.normalising_constant
    }

    /// decode one syndrome into the pattern of flipped observables and the
    /// matching weight
    pub fn decode(&mut self, syndrome: &SyndromePattern) -> MwpmResult<DecodingOutcome> {
        self.mwpm.clear();
        let num_detectors = self.initializer.num_detectors;
        let num_observables = self.initializer.num_observables;
        let mut detection_events = BTreeSet::new();
        for &detector in syndrome.detection_events.iter() {
            MwpmError::check_detector(detector, num_detectors)?;
            if !detection_events.insert(detector) {
                return Err(MwpmError::DuplicateDetectionEvent { detector });
            }
        }
        // negative-weight canonicalisation flips the initial excitation of the
        // edges' detectors
        for &detector in self.mwpm.flooder.graph.negative_weight_detection_events.clone().iter() {
            if !detection_events.remove(&detector) {
                detection_events.insert(detector);
            }
        }
        debug!("decoding {} detection events", detection_events.len());
        for &detector in detection_events.iter() {
            let node = self.mwpm.flooder.graph.nodes[detector].clone();
            self.mwpm.create_detection_event(&node);
        }
        self.mwpm.run();
        let result = self.mwpm.extract_matching()?;
        let mut observables = vec![0u8; num_observables];
        match self.search_flooder.as_mut() {
            Some(search_flooder) => {
                // explicit path reconstruction: the matching graph could not
                // carry the wide observable masks
                for edge in result.match_edges.iter() {
                    search_flooder.iter_edges_on_shortest_path(edge.loc_from, edge.loc_to, &mut |node, local_index| {
                        for &observable in node.read_recursive().neighbors[local_index].observable_indices.iter() {
                            observables[observable] ^= 1;
                        }
                    });
                }
                for &observable in self.negative_observable_indices.iter() {
                    observables[observable] ^= 1;
                }
            }
            None => {
                let mask = result.observable_mask() ^ self.mwpm.flooder.graph.negative_weight_observables;
                for (observable, flipped) in observables.iter_mut().enumerate() {
                    *flipped = (mask >> observable & 1) as u8;
                }
            }
        }
        let weight = result.weight + self.mwpm.flooder.graph.negative_weight_sum;
        Ok(DecodingOutcome { observables, weight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complete_graph::minimum_weight_matching_brute_force;
    use crate::example_graphs::*;

    fn edge(detector_1: DetectorIndex, detector_2: Option<DetectorIndex>, weight: Weight, observables: &[ObservableIndex]) -> WeightedEdge {
        WeightedEdge {
            detector_1,
            detector_2,
            weight,
            observables: observables.to_vec(),
        }
    }

    fn observables_from(flipped: &[ObservableIndex], num_observables: usize) -> Vec<u8> {
        let mut observables = vec![0u8; num_observables];
        for &observable in flipped {
            observables[observable] = 1;
        }
        observables
    }

    /// a single edge with both detectors excited
    #[test]
    fn solver_single_edge() {
        // cargo test solver_single_edge -- --nocapture
        let initializer = SolverInitializer::new(2, 1, vec![edge(0, Some(1), 2, &[0])]);
        let mut solver = Solver::new(&initializer).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![0, 1])).unwrap();
        assert_eq!(outcome, DecodingOutcome { observables: vec![1], weight: 2 });
        // nothing excited: nothing flipped
        let outcome = solver.decode(&SyndromePattern::new(vec![])).unwrap();
        assert_eq!(outcome, DecodingOutcome { observables: vec![0], weight: 0 });
    }

    /// a single excited detector matched into the boundary; the decoded mask
    /// round-trips the boundary edge's observables
    #[test]
    fn solver_boundary_pickup() {
        // cargo test solver_boundary_pickup -- --nocapture
        let initializer = SolverInitializer::new(1, 2, vec![edge(0, None, 3, &[1])]);
        let mut solver = Solver::new(&initializer).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![0])).unwrap();
        assert_eq!(outcome, DecodingOutcome { observables: vec![0, 1], weight: 3 });
    }

    /// the blossom scenario: a triangle of excited detectors with a distant
    /// boundary
    #[test]
    fn solver_blossom() {
        // cargo test solver_blossom -- --nocapture
        let initializer = SolverInitializer::new(
            3,
            4,
            vec![
                edge(0, Some(1), 2, &[0]),
                edge(0, Some(2), 2, &[1]),
                edge(1, Some(2), 2, &[2]),
                edge(0, None, 10, &[3]),
            ],
        );
        let mut solver = Solver::new(&initializer).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![0, 1, 2])).unwrap();
        assert_eq!(outcome.observables, observables_from(&[2, 3], 4));
        assert_eq!(outcome.weight, 12);
    }

    /// the augmenting path scenario over a path graph
    #[test]
    fn solver_augmenting_path() {
        // cargo test solver_augmenting_path -- --nocapture
        let initializer = SolverInitializer::new(
            4,
            3,
            vec![edge(0, Some(1), 2, &[0]), edge(1, Some(2), 2, &[1]), edge(2, Some(3), 2, &[2])],
        );
        let mut solver = Solver::new(&initializer).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![0, 3])).unwrap();
        assert_eq!(outcome.observables, vec![1, 1, 1], "XOR of all three edge masks");
        assert_eq!(outcome.weight, 6);
    }

    /// simultaneous collisions on a square resolve deterministically
    #[test]
    fn solver_invalidated_event_deterministic() {
        // cargo test solver_invalidated_event_deterministic -- --nocapture
        let initializer = SolverInitializer::new(
            4,
            4,
            vec![
                edge(0, Some(1), 2, &[0]),
                edge(1, Some(2), 2, &[1]),
                edge(2, Some(3), 2, &[2]),
                edge(3, Some(0), 2, &[3]),
            ],
        );
        let mut solver = Solver::new(&initializer).unwrap();
        for _ in 0..10 {
            let outcome = solver.decode(&SyndromePattern::new(vec![0, 2])).unwrap();
            assert_eq!(outcome.observables, observables_from(&[0, 1], 4));
            assert_eq!(outcome.weight, 4);
        }
    }

    /// canonicalising a negative edge: a matching of the negative graph is a
    /// matching of the all-positive graph with the edge's endpoints toggled,
    /// the edge's observables pre-flipped and the edge's weight added back
    #[test]
    fn solver_negative_weight_canonicalisation() {
        // cargo test solver_negative_weight_canonicalisation -- --nocapture
        let positive = SolverInitializer::new(
            3,
            4,
            vec![
                edge(0, None, 4, &[0]),
                edge(0, Some(1), 6, &[1]),
                edge(1, Some(2), 4, &[2]),
                edge(2, None, 4, &[3]),
            ],
        );
        let negative = SolverInitializer::new(
            3,
            4,
            vec![
                edge(0, None, 4, &[0]),
                edge(0, Some(1), -6, &[1]),
                edge(1, Some(2), 4, &[2]),
                edge(2, None, 4, &[3]),
            ],
        );
        let mut solver_negative = Solver::new(&negative).unwrap();
        // hand-computed optima of the negative-weight graph: taking the -6
        // edge pays off whenever its endpoints can be annihilated cheaply
        for (detection_events, expected_weight, expected_flips) in [
            (vec![], 0, vec![]),
            (vec![0], 2, vec![1, 2, 3]),
            (vec![1], -2, vec![0, 1]),
            (vec![0, 1], -6, vec![1]),
            (vec![2], 2, vec![0, 1, 2]),
        ] {
            let outcome = solver_negative.decode(&SyndromePattern::new(detection_events)).unwrap();
            assert_eq!(outcome.weight, expected_weight);
            assert_eq!(outcome.observables, observables_from(&expected_flips, 4));
        }
        // the general identity against the all-positive graph: toggle the
        // endpoints {0, 1}, XOR the edge's observable 1, shift the weight by 6
        let mut solver_positive = Solver::new(&positive).unwrap();
        for detection_events in [vec![], vec![0], vec![1], vec![2], vec![0, 1], vec![0, 2], vec![1, 2], vec![0, 1, 2]] {
            let mut toggled: Vec<DetectorIndex> = detection_events.clone();
            for detector in [0, 1] {
                match toggled.iter().position(|&other| other == detector) {
                    Some(position) => {
                        toggled.remove(position);
                    }
                    None => toggled.push(detector),
                }
            }
            toggled.sort();
            let outcome_negative = solver_negative.decode(&SyndromePattern::new(detection_events)).unwrap();
            let mut outcome_positive = solver_positive.decode(&SyndromePattern::new(toggled)).unwrap();
            outcome_positive.observables[1] ^= 1;
            assert_eq!(outcome_negative.observables, outcome_positive.observables);
            assert_eq!(outcome_negative.weight, outcome_positive.weight - 6);
        }
    }

    /// wide observables exercise the search flooder: a ring of 80 detectors
    /// cannot pack its 80 observables into a machine word
    #[test]
    fn solver_wide_observables_search_flooder() {
        // cargo test solver_wide_observables_search_flooder -- --nocapture
        let initializer = ring_graph(80, 1);
        assert!(initializer.num_observables > OBS_MASK_BITS);
        let mut solver = Solver::new(&initializer).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![10, 13])).unwrap();
        assert_eq!(outcome.observables, observables_from(&[10, 11, 12], 80));
        assert_eq!(outcome.weight, 3 * 2);
        // the same decoding on a narrow ring agrees
        let narrow = ring_graph(60, 1);
        let mut narrow_solver = Solver::new(&narrow).unwrap();
        let outcome = narrow_solver.decode(&SyndromePattern::new(vec![10, 13])).unwrap();
        assert_eq!(outcome.observables, observables_from(&[10, 11, 12], 60));
    }

    /// repetition code shots decoded through the floating-point pipeline
    #[test]
    fn solver_from_weighted_graph() {
        // cargo test solver_from_weighted_graph -- --nocapture
        let mut graph = crate::decoding_graph::WeightedGraph::new(4, 5);
        // distance-5 repetition code with uniform physical error rate
        graph.handle_error_mechanism(0.1, &[0], &[0]).unwrap();
        for i in 0..3 {
            graph.handle_error_mechanism(0.1, &[i, i + 1], &[i + 1]).unwrap();
        }
        graph.handle_error_mechanism(0.1, &[3], &[4]).unwrap();
        let mut solver = Solver::from_weighted_graph(&graph, 1000).unwrap();
        let outcome = solver.decode(&SyndromePattern::new(vec![0])).unwrap();
        assert_eq!(outcome.observables, observables_from(&[0], 5), "the left boundary is closest");
        let expected = ((1.0f64 - 0.1) / 0.1).ln();
        assert!((solver.rescale_weight(outcome.weight) - expected).abs() < 0.01);
        let outcome = solver.decode(&SyndromePattern::new(vec![1, 2])).unwrap();
        assert_eq!(outcome.observables, observables_from(&[2], 5));
    }

    /// totality and optimality on random graphs: the decoder always terminates
    /// and its weight equals the brute-force minimum
    #[test]
    fn solver_optimal_on_random_graphs() {
        // cargo test solver_optimal_on_random_graphs -- --nocapture
        let mut rng = seeded_rng(123);
        let mut decoded_shots = 0;
        for _ in 0..20 {
            let initializer = random_graph(10, 0.3, 5, &mut rng);
            let mut solver = Solver::new(&initializer).unwrap();
            for _ in 0..10 {
                let syndrome = random_syndrome(10, 0.3, &mut rng);
                let expected = minimum_weight_matching_brute_force(&initializer, &syndrome.detection_events);
                match solver.decode(&syndrome) {
                    Ok(outcome) => {
                        assert_eq!(
                            Some(outcome.weight),
                            expected,
                            "suboptimal matching on syndrome {:?} of {:?}",
                            syndrome,
                            initializer
                        );
                        decoded_shots += 1;
                    }
                    Err(MwpmError::UnmatchableSyndrome { .. }) => {
                        assert_eq!(expected, None, "the decoder gave up on a matchable syndrome");
                    }
                    Err(other) => panic!("unexpected error {other:?}"),
                }
            }
        }
        assert!(decoded_shots > 100, "the random instances must mostly be matchable");
    }

    /// larger repetition-code shots stay optimal as well
    #[test]
    fn solver_optimal_on_repetition_code() {
        // cargo test solver_optimal_on_repetition_code -- --nocapture
        let mut rng = seeded_rng(321);
        let initializer = repetition_code_graph(13, 2);
        let mut solver = Solver::new(&initializer).unwrap();
        for _ in 0..30 {
            let syndrome = random_syndrome(initializer.num_detectors, 0.25, &mut rng);
            let expected = minimum_weight_matching_brute_force(&initializer, &syndrome.detection_events);
            let outcome = solver.decode(&syndrome).unwrap();
            assert_eq!(Some(outcome.weight), expected);
            // the correction must annihilate the syndrome: every observable
            // maps to a unique edge here, so toggling the endpoints of the
            // flipped edges must recover exactly the detection events
            let num_detectors = initializer.num_detectors;
            let mut toggled = vec![false; num_detectors];
            for (observable, &flipped) in outcome.observables.iter().enumerate() {
                if flipped == 1 {
                    if observable > 0 {
                        toggled[observable - 1] ^= true;
                    }
                    if observable < num_detectors {
                        toggled[observable] ^= true;
                    }
                }
            }
            let recovered: Vec<DetectorIndex> =
                (0..num_detectors).filter(|&detector| toggled[detector]).collect();
            let mut detection_events = syndrome.detection_events.clone();
            detection_events.sort_unstable();
            assert_eq!(recovered, detection_events);
        }
    }

    #[test]
    fn solver_input_validation() {
        // cargo test solver_input_validation -- --nocapture
        let initializer = SolverInitializer::new(2, 1, vec![edge(0, Some(1), 2, &[0])]);
        let mut solver = Solver::new(&initializer).unwrap();
        assert_eq!(
            solver.decode(&SyndromePattern::new(vec![5])),
            Err(MwpmError::DetectorIndexOutOfRange {
                index: 5,
                num_detectors: 2
            })
        );
        assert_eq!(
            solver.decode(&SyndromePattern::new(vec![1, 1])),
            Err(MwpmError::DuplicateDetectionEvent { detector: 1 })
        );
        let bad_observable = SolverInitializer::new(2, 1, vec![edge(0, Some(1), 2, &[3])]);
        assert_eq!(
            Solver::new(&bad_observable).err(),
            Some(MwpmError::ObservableIndexOutOfRange {
                index: 3,
                num_observables: 1
            })
        );
        // odd weights are only supported on boundary edges
        let odd_weight = SolverInitializer::new(2, 1, vec![edge(0, Some(1), 3, &[0])]);
        assert_eq!(
            Solver::new(&odd_weight).err(),
            Some(MwpmError::OddEdgeWeight {
                detector_1: 0,
                detector_2: 1,
                weight: 3
            })
        );
        let odd_boundary = SolverInitializer::new(2, 1, vec![edge(0, Some(1), 2, &[0]), edge(1, None, 3, &[0])]);
        assert!(Solver::new(&odd_boundary).is_ok());
    }

    #[test]
    fn solver_outcome_serde() {
        // cargo test solver_outcome_serde -- --nocapture
        let outcome = DecodingOutcome {
            observables: vec![0, 1, 0],
            weight: 42,
        };
        let text = serde_json::to_string(&outcome).unwrap();
        assert_eq!(outcome, serde_json::from_str(&text).unwrap());
    }
}
