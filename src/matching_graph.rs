//! Matching Graph
//!
//! The integer-weighted syndrome graph the flooder runs on. The graph shape is
//! immutable after construction; each detector node additionally carries the
//! mutable covering state maintained by the flooder (the region owning it, the
//! source detector it was reached from, the observables crossed on the way and
//! the arrival radius), plus one schedule token per incident edge used to
//! invalidate stale tentative events.
//!

use super::error::*;
use super::pointers::*;
use super::region::*;
use super::util::*;
use crate::derivative::Derivative;
use std::collections::BTreeSet;

/// one entry of a detector node's adjacency; `node == None` denotes the
/// virtual boundary
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Neighbor {
    #[derivative(Debug = "ignore")]
    pub node: Option<DetectorNodeWeak>,
    pub weight: Weight,
    pub observables: ObsMask,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct DetectorNode {
    /// the index of this detector in the decoding graph
    pub index: DetectorIndex,
    /// all incident edges, fixed after construction
    #[derivative(Debug = "ignore")]
    pub neighbors: Vec<Neighbor>,
    /// one validity token per incident edge, advanced whenever the edge is rescheduled
    pub schedule_tokens: Vec<ScheduleToken>,
    /// the region of deepest ownership currently covering this node
    #[derivative(Debug = "ignore")]
    pub region: Option<RegionWeak>,
    /// the excited detector whose region growth first reached this node
    pub source: Option<DetectorIndex>,
    /// XOR of the observable masks along the growth path from the source
    pub observables_crossed: ObsMask,
    /// the owner chain's total radius at the moment this node was reached
    pub arrival_radius: Weight,
}

pub type DetectorNodePtr = ArcRwLock<DetectorNode>;
pub type DetectorNodeWeak = WeakRwLock<DetectorNode>;

impl std::fmt::Debug for DetectorNodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let node = self.read_recursive();
        write!(f, "{}", node.index)
    }
}

impl std::fmt::Debug for DetectorNodeWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upgrade_force().fmt(f)
    }
}

impl DetectorNode {
    pub fn is_covered(&self) -> bool {
        self.region.is_some()
    }

    /// find the local index of the edge towards `other`; `None` asks for the
    /// boundary edge
    pub fn index_of_neighbor(&self, other: Option<&DetectorNodePtr>) -> Option<usize> {
        self.neighbors.iter().position(|neighbor| match (&neighbor.node, other) {
            (None, None) => true,
            (Some(node), Some(other)) => node == &other.downgrade(),
            _ => false,
        })
    }

    pub fn bump_schedule_token(&mut self, local_index: usize) -> ScheduleToken {
        self.schedule_tokens[local_index] += 1;
        self.schedule_tokens[local_index]
    }

    /// release this node from its covering region; the schedule tokens are
    /// kept, resetting them mid-decoding could resurrect stale events
    pub fn uncover(&mut self) {
        self.region = None;
        self.source = None;
        self.observables_crossed = 0;
        self.arrival_radius = 0;
    }

    /// full reset between decodings, only sound together with clearing the
    /// event queue
    pub fn clear_covering_state(&mut self) {
        self.uncover();
        for token in self.schedule_tokens.iter_mut() {
            *token = 0;
        }
    }
}

impl DetectorNodePtr {
    /// how far the covering region extends beyond this node, `None` when uncovered
    pub fn covered_radius(&self, time: Timestamp) -> Option<Weight> {
        let node = self.read_recursive();
        node.region.as_ref().map(|region| {
            let radius = region.upgrade_force().chain_total_radius(time) - node.arrival_radius;
            debug_assert!(radius >= 0, "covered radius must never be negative");
            radius
        })
    }
}

pub struct MatchingGraph {
    /// all detector nodes
    pub nodes: Vec<DetectorNodePtr>,
    pub num_observables: usize,
    /// detectors whose initial excitation is flipped by negative-weight canonicalisation
    pub negative_weight_detection_events: BTreeSet<DetectorIndex>,
    /// observables to XOR into every decoding outcome, accumulated from negative edges
    pub negative_weight_observables: ObsMask,
    /// sum of the original negative weights, added back to the matching weight
    pub negative_weight_sum: Weight,
}

impl MatchingGraph {
    pub fn new(num_detectors: usize, num_observables: usize) -> Self {
        let nodes = (0..num_detectors)
            .map(|index| {
                DetectorNodePtr::new_value(DetectorNode {
                    index,
                    neighbors: vec![],
                    schedule_tokens: vec![],
                    region: None,
                    source: None,
                    observables_crossed: 0,
                    arrival_radius: 0,
                })
            })
            .collect();
        Self {
            nodes,
            num_observables,
            negative_weight_detection_events: BTreeSet::new(),
            negative_weight_observables: 0,
            negative_weight_sum: 0,
        }
    }

    pub fn num_detectors(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_edge(
        &mut self,
        detector_1: DetectorIndex,
        detector_2: DetectorIndex,
        weight: Weight,
        observables: ObsMask,
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector_1, self.nodes.len())?;
        MwpmError::check_detector(detector_2, self.nodes.len())?;
        if detector_1 == detector_2 {
            return Err(MwpmError::SelfLoop { detector: detector_1 });
        }
        let node_1 = &self.nodes[detector_1];
        let node_2 = &self.nodes[detector_2];
        if node_1.read_recursive().index_of_neighbor(Some(node_2)).is_some() {
            return Err(MwpmError::DuplicateEdge {
                detector_1,
                detector_2,
            });
        }
        for (a, b) in [(node_1, node_2), (node_2, node_1)] {
            let mut node = a.write();
            node.neighbors.push(Neighbor {
                node: Some(b.downgrade()),
                weight,
                observables,
            });
            node.schedule_tokens.push(0);
        }
        Ok(())
    }

    pub fn add_boundary_edge(
        &mut self,
        detector: DetectorIndex,
        weight: Weight,
        observables: ObsMask,
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector, self.nodes.len())?;
        let mut node = self.nodes[detector].write();
        if node.index_of_neighbor(None).is_some() {
            return Err(MwpmError::DuplicateBoundaryEdge { detector });
        }
        node.neighbors.push(Neighbor {
            node: None,
            weight,
            observables,
        });
        node.schedule_tokens.push(0);
        Ok(())
    }

    /// canonicalise negative-weight edges: flip the sign of the weight, toggle
    /// the "initial excitation" of the edge's detectors and accumulate the
    /// edge's observables into the boundary mask; this preserves the
    /// minimum-weight matching and guarantees the flooder only ever sees
    /// non-negative weights
    pub fn sync_negative_weight_observables_and_detection_events(&mut self) {
        for detector in 0..self.nodes.len() {
            let neighbors = self.nodes[detector].read_recursive().neighbors.clone();
            for (local_index, neighbor) in neighbors.iter().enumerate() {
                if neighbor.weight >= 0 {
                    continue;
                }
                match &neighbor.node {
                    Some(peer_weak) => {
                        let peer_ptr = peer_weak.upgrade_force();
                        let peer = peer_ptr.read_recursive().index;
                        if peer < detector {
                            continue; // each edge is canonicalised once
                        }
                        self.toggle_negative_detection_event(detector);
                        self.toggle_negative_detection_event(peer);
                        self.nodes[detector].write().neighbors[local_index].weight = -neighbor.weight;
                        let peer_local_index = peer_ptr
                            .read_recursive()
                            .index_of_neighbor(Some(&self.nodes[detector]))
                            .expect("edges are stored on both endpoints");
                        peer_ptr.write().neighbors[peer_local_index].weight = -neighbor.weight;
                    }
                    None => {
                        self.toggle_negative_detection_event(detector);
                        self.nodes[detector].write().neighbors[local_index].weight = -neighbor.weight;
                    }
                }
                self.negative_weight_observables ^= neighbor.observables;
                self.negative_weight_sum += neighbor.weight;
            }
        }
    }

    fn toggle_negative_detection_event(&mut self, detector: DetectorIndex) {
        if !self.negative_weight_detection_events.remove(&detector) {
            self.negative_weight_detection_events.insert(detector);
        }
    }

    /// reset the covering state of every detector node, preparing for the next
    /// decoding
    pub fn clear_covering_state(&mut self) {
        for node in self.nodes.iter() {
            node.write().clear_covering_state();
        }
    }
}
