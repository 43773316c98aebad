//! Search Flooder
//!
//! A structural replica of the matching flooder, specialised to path
//! reconstruction: instead of accumulating observable masks in region
//! metadata, it records a predecessor edge on every reached node. Two search
//! regions grow at unit speed from the endpoints of a matched pair (one region
//! for a boundary match); the first collision between them happens on a
//! minimum-weight path, which is then read off the predecessor chain. It is
//! only used when the number of observables exceeds the machine word, where
//! the matching graph cannot carry masks.
//!

use super::error::*;
use super::pointers::*;
use super::util::*;
use crate::derivative::Derivative;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct SearchNeighbor {
    #[derivative(Debug = "ignore")]
    pub node: Option<SearchNodeWeak>,
    pub weight: Weight,
    /// observable indices, not packed: the search graph supports arbitrary widths
    pub observable_indices: Vec<ObservableIndex>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct SearchNode {
    pub index: DetectorIndex,
    #[derivative(Debug = "ignore")]
    pub neighbors: Vec<SearchNeighbor>,
    /// which of the two search regions reached this node
    pub reached_from: Option<u8>,
    /// distance from the reaching region's source
    pub distance: Weight,
    /// the node the search came from and the local edge index on that node
    #[derivative(Debug = "ignore")]
    pub predecessor: Option<(SearchNodeWeak, usize)>,
}

pub type SearchNodePtr = ArcRwLock<SearchNode>;
pub type SearchNodeWeak = WeakRwLock<SearchNode>;

impl std::fmt::Debug for SearchNodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let node = self.read_recursive();
        write!(f, "{}", node.index)
    }
}

impl std::fmt::Debug for SearchNodeWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upgrade_force().fmt(f)
    }
}

pub struct SearchGraph {
    pub nodes: Vec<SearchNodePtr>,
    pub num_observables: usize,
}

impl SearchGraph {
    pub fn new(num_detectors: usize, num_observables: usize) -> Self {
        let nodes = (0..num_detectors)
            .map(|index| {
                SearchNodePtr::new_value(SearchNode {
                    index,
                    neighbors: vec![],
                    reached_from: None,
                    distance: 0,
                    predecessor: None,
                })
            })
            .collect();
        Self { nodes, num_observables }
    }

    pub fn add_edge(
        &mut self,
        detector_1: DetectorIndex,
        detector_2: DetectorIndex,
        weight: Weight,
        observable_indices: Vec<ObservableIndex>,
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector_1, self.nodes.len())?;
        MwpmError::check_detector(detector_2, self.nodes.len())?;
        if detector_1 == detector_2 {
            return Err(MwpmError::SelfLoop { detector: detector_1 });
        }
        assert!(weight >= 0, "the search graph only carries canonicalised weights");
        let node_1 = &self.nodes[detector_1];
        let node_2 = &self.nodes[detector_2];
        for (a, b) in [(node_1, node_2), (node_2, node_1)] {
            a.write().neighbors.push(SearchNeighbor {
                node: Some(b.downgrade()),
                weight,
                observable_indices: observable_indices.clone(),
            });
        }
        Ok(())
    }

    pub fn add_boundary_edge(
        &mut self,
        detector: DetectorIndex,
        weight: Weight,
        observable_indices: Vec<ObservableIndex>,
    ) -> MwpmResult<()> {
        MwpmError::check_detector(detector, self.nodes.len())?;
        assert!(weight >= 0, "the search graph only carries canonicalised weights");
        self.nodes[detector].write().neighbors.push(SearchNeighbor {
            node: None,
            weight,
            observable_indices,
        });
        Ok(())
    }
}

#[derive(Debug)]
enum SearchEventData {
    /// a search region reaches an uncovered node
    Arrival {
        node: SearchNodeWeak,
        predecessor: Option<(SearchNodeWeak, usize)>,
        side: u8,
        distance: Weight,
    },
    /// the two search regions meet along an edge, or a region reaches the boundary
    Collision { node: SearchNodeWeak, local_index: usize },
}

#[derive(Debug)]
struct SearchEvent {
    /// doubled logical time, so that collisions in the middle of odd-weight
    /// edges stay on the integer grid
    time2: Weight,
    seq: u64,
    data: SearchEventData,
}

impl PartialEq for SearchEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time2 == other.time2 && self.seq == other.seq
    }
}

impl Eq for SearchEvent {}

impl PartialOrd for SearchEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time2.cmp(&other.time2).then(self.seq.cmp(&other.seq))
    }
}

pub struct SearchFlooder {
    pub graph: SearchGraph,
    queue: BinaryHeap<Reverse<SearchEvent>>,
    next_seq: u64,
    /// nodes whose search state must be reset before the next query
    touched: Vec<SearchNodePtr>,
}

impl SearchFlooder {
    pub fn new(graph: SearchGraph) -> Self {
        Self {
            graph,
            queue: BinaryHeap::new(),
            next_seq: 0,
            touched: vec![],
        }
    }

    fn push(&mut self, time2: Weight, data: SearchEventData) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(SearchEvent { time2, seq, data }));
    }

    fn clear_state(&mut self) {
        for node in self.touched.drain(..) {
            let mut node = node.write();
            node.reached_from = None;
            node.distance = 0;
            node.predecessor = None;
        }
        self.queue.clear();
        self.next_seq = 0;
    }

    /// visit every edge on a minimum-weight path from `from` to `to` (or to the
    /// boundary when `to` is `None`); edges are reported as a node and the
    /// local index of the edge on that node, in no particular order
    pub fn iter_edges_on_shortest_path(
        &mut self,
        from: DetectorIndex,
        to: Option<DetectorIndex>,
        visitor: &mut impl FnMut(&SearchNodePtr, usize),
    ) {
        self.clear_state();
        let source = self.graph.nodes[from].clone();
        self.push(
            0,
            SearchEventData::Arrival {
                node: source.downgrade(),
                predecessor: None,
                side: 0,
                distance: 0,
            },
        );
        if let Some(to) = to {
            assert_ne!(from, to, "a matched pair consists of two distinct detectors");
            let target = self.graph.nodes[to].clone();
            self.push(
                0,
                SearchEventData::Arrival {
                    node: target.downgrade(),
                    predecessor: None,
                    side: 1,
                    distance: 0,
                },
            );
        }
        while let Some(Reverse(event)) = self.queue.pop() {
            match event.data {
                SearchEventData::Arrival {
                    node,
                    predecessor,
                    side,
                    distance,
                } => {
                    let node_ptr = node.upgrade_force();
                    if node_ptr.read_recursive().reached_from.is_some() {
                        continue; // already claimed by an earlier arrival
                    }
                    {
                        let mut node = node_ptr.write();
                        node.reached_from = Some(side);
                        node.distance = distance;
                        node.predecessor = predecessor;
                    }
                    self.touched.push(node_ptr.clone());
                    let neighbors = node_ptr.read_recursive().neighbors.clone();
                    for (local_index, neighbor) in neighbors.iter().enumerate() {
                        match &neighbor.node {
                            None => {
                                // only a boundary search can end at the boundary
                                if to.is_none() {
                                    self.push(
                                        2 * (distance + neighbor.weight),
                                        SearchEventData::Collision {
                                            node: node_ptr.downgrade(),
                                            local_index,
                                        },
                                    );
                                }
                            }
                            Some(peer) => {
                                let peer_ptr = peer.upgrade_force();
                                let peer_reached = peer_ptr.read_recursive().reached_from;
                                match peer_reached {
                                    None => self.push(
                                        2 * (distance + neighbor.weight),
                                        SearchEventData::Arrival {
                                            node: peer.clone(),
                                            predecessor: Some((node_ptr.downgrade(), local_index)),
                                            side,
                                            distance: distance + neighbor.weight,
                                        },
                                    ),
                                    Some(peer_side) if peer_side != side => {
                                        let peer_distance = peer_ptr.read_recursive().distance;
                                        self.push(
                                            distance + peer_distance + neighbor.weight,
                                            SearchEventData::Collision {
                                                node: node_ptr.downgrade(),
                                                local_index,
                                            },
                                        );
                                    }
                                    Some(_) => {}
                                }
                            }
                        }
                    }
                }
                SearchEventData::Collision { node, local_index } => {
                    let node_ptr = node.upgrade_force();
                    visitor(&node_ptr, local_index);
                    let peer = node_ptr.read_recursive().neighbors[local_index]
                        .node
                        .as_ref()
                        .map(|weak| weak.upgrade_force());
                    self.walk_predecessors(&node_ptr, visitor);
                    if let Some(peer) = peer {
                        self.walk_predecessors(&peer, visitor);
                    }
                    return;
                }
            }
        }
        unreachable!("no path between the matched endpoints, the matching graph is inconsistent");
    }

    fn walk_predecessors(&self, node: &SearchNodePtr, visitor: &mut impl FnMut(&SearchNodePtr, usize)) {
        let mut current = node.clone();
        loop {
            let predecessor = match &current.read_recursive().predecessor {
                Some((previous, local_index)) => (previous.upgrade_force(), *local_index),
                None => break,
            };
            visitor(&predecessor.0, predecessor.1);
            current = predecessor.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ring(num_detectors: usize, weight: Weight) -> SearchGraph {
        let mut graph = SearchGraph::new(num_detectors, num_detectors);
        for i in 0..num_detectors {
            graph.add_edge(i, (i + 1) % num_detectors, weight, vec![i]).unwrap();
        }
        graph
    }

    fn collect_observables(flooder: &mut SearchFlooder, from: DetectorIndex, to: Option<DetectorIndex>) -> BTreeSet<ObservableIndex> {
        let mut observables = BTreeSet::new();
        let mut edges = vec![];
        flooder.iter_edges_on_shortest_path(from, to, &mut |node, local_index| {
            edges.push((node.clone(), local_index));
        });
        for (node, local_index) in edges {
            for &observable in node.read_recursive().neighbors[local_index].observable_indices.iter() {
                assert!(observables.insert(observable), "an edge appears twice on the path");
            }
        }
        observables
    }

    #[test]
    fn search_flooder_shorter_arc_of_ring() {
        // cargo test search_flooder_shorter_arc_of_ring -- --nocapture
        let mut flooder = SearchFlooder::new(ring(10, 2));
        assert_eq!(collect_observables(&mut flooder, 2, Some(5)), BTreeSet::from([2, 3, 4]));
        // queries are independent: state resets in between
        assert_eq!(collect_observables(&mut flooder, 9, Some(1)), BTreeSet::from([9, 0]));
    }

    #[test]
    fn search_flooder_odd_weights() {
        // cargo test search_flooder_odd_weights -- --nocapture
        // the doubled clock keeps collisions in the middle of odd edges exact
        let mut graph = SearchGraph::new(3, 3);
        graph.add_edge(0, 1, 3, vec![0]).unwrap();
        graph.add_edge(1, 2, 3, vec![1]).unwrap();
        graph.add_edge(0, 2, 7, vec![2]).unwrap();
        let mut flooder = SearchFlooder::new(graph);
        assert_eq!(collect_observables(&mut flooder, 0, Some(2)), BTreeSet::from([0, 1]));
    }

    #[test]
    fn search_flooder_boundary_path() {
        // cargo test search_flooder_boundary_path -- --nocapture
        let mut graph = SearchGraph::new(3, 4);
        graph.add_edge(0, 1, 2, vec![0]).unwrap();
        graph.add_edge(1, 2, 2, vec![1]).unwrap();
        graph.add_boundary_edge(2, 2, vec![2]).unwrap();
        graph.add_boundary_edge(0, 10, vec![3]).unwrap();
        let mut flooder = SearchFlooder::new(graph);
        // the cheap way out is through detectors 1 and 2
        assert_eq!(collect_observables(&mut flooder, 0, None), BTreeSet::from([0, 1, 2]));
    }
}
