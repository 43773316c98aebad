//! Complete Graph
//!
//! Builds complete-graph edges among detectors of the decoding graph using
//! Dijkstra's algorithm, together with the minimum-weight path behind each
//! edge. This is the ground truth the test suite checks the flooder against:
//! a brute-force minimum-weight perfect matching over these distances must
//! agree with the decoder's weight on small instances.
//!

use super::error::*;
use super::util::*;
use crate::priority_queue::PriorityQueue;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CompleteGraph {
    /// number of detectors
    pub num_detectors: usize,
    /// the detectors to run Dijkstra's algorithm on
    pub vertices: Vec<CompleteGraphVertex>,
    /// the direct boundary edge weight of each detector, if any
    pub boundary_weights: Vec<Option<Weight>>,
    /// timestamp to invalidate all vertices without iterating over them
    active_timestamp: usize,
}

#[derive(Debug, Clone)]
pub struct CompleteGraphVertex {
    /// all decoding graph edges connected to this vertex
    pub edges: BTreeMap<DetectorIndex, Weight>,
    /// timestamp for Dijkstra's algorithm
    timestamp: usize,
}

impl CompleteGraph {
    pub fn new(initializer: &SolverInitializer) -> MwpmResult<Self> {
        let num_detectors = initializer.num_detectors;
        let mut vertices: Vec<CompleteGraphVertex> = (0..num_detectors)
            .map(|_| CompleteGraphVertex {
                edges: BTreeMap::new(),
                timestamp: 0,
            })
            .collect();
        let mut boundary_weights: Vec<Option<Weight>> = vec![None; num_detectors];
        for edge in initializer.weighted_edges.iter() {
            MwpmError::check_detector(edge.detector_1, num_detectors)?;
            let weight = edge.weight.abs();
            match edge.detector_2 {
                Some(detector_2) => {
                    MwpmError::check_detector(detector_2, num_detectors)?;
                    vertices[edge.detector_1].edges.insert(detector_2, weight);
                    vertices[detector_2].edges.insert(edge.detector_1, weight);
                }
                None => boundary_weights[edge.detector_1] = Some(weight),
            }
        }
        Ok(Self {
            num_detectors,
            vertices,
            boundary_weights,
            active_timestamp: 0,
        })
    }

    /// invalidate Dijkstra's algorithm state from the previous call
    fn invalidate_previous_dijkstra(&mut self) -> usize {
        if self.active_timestamp == usize::MAX {
            // rarely happens
            self.active_timestamp = 0;
            for vertex in self.vertices.iter_mut() {
                vertex.timestamp = 0; // refresh all timestamps to avoid conflicts
            }
        }
        self.active_timestamp += 1; // implicitly invalidate all vertices
        self.active_timestamp
    }

    /// get all complete graph edges from the specific vertex, but will
    /// terminate early if the `terminate` vertex is found
    pub fn all_edges_with_terminate(
        &mut self,
        vertex: DetectorIndex,
        terminate: DetectorIndex,
    ) -> BTreeMap<DetectorIndex, (DetectorIndex, Weight)> {
        let active_timestamp = self.invalidate_previous_dijkstra();
        let mut pq = PriorityQueue::<DetectorIndex, PriorityElement>::new();
        pq.push(vertex, PriorityElement::new(0, vertex));
        let mut computed_edges = BTreeMap::<DetectorIndex, (DetectorIndex, Weight)>::new(); // { peer: (previous, weight) }
        while let Some((target, PriorityElement { weight, previous })) = pq.pop() {
            debug_assert!(!computed_edges.contains_key(&target), "each vertex is settled once");
            self.vertices[target].timestamp = active_timestamp; // mark as visited
            if target != vertex {
                computed_edges.insert(target, (previous, weight));
                if target == terminate {
                    break; // early terminate
                }
            }
            // add its neighbors to the priority queue
            for (&neighbor, &neighbor_weight) in self.vertices[target].edges.iter() {
                let edge_weight = weight + neighbor_weight;
                if let Some(PriorityElement {
                    weight: existing_weight,
                    previous: existing_previous,
                }) = pq.get_priority(&neighbor)
                {
                    // update the priority if weight is smaller, or on equal
                    // weight if the tie-break prefers this predecessor; the
                    // tie-break prevents deadlocks on zero-weight cycles
                    let mut update = &edge_weight < existing_weight;
                    if &edge_weight == existing_weight && &target < existing_previous {
                        update = true;
                    }
                    if update {
                        pq.change_priority(&neighbor, PriorityElement::new(edge_weight, target));
                    }
                } else if self.vertices[neighbor].timestamp != active_timestamp {
                    // insert new entry only if neighbor has not been visited
                    pq.push(neighbor, PriorityElement::new(edge_weight, target));
                }
            }
        }
        computed_edges
    }

    /// get all complete graph edges from the specific vertex
    pub fn all_edges(&mut self, vertex: DetectorIndex) -> BTreeMap<DetectorIndex, (DetectorIndex, Weight)> {
        self.all_edges_with_terminate(vertex, DetectorIndex::MAX)
    }

    /// get a minimum-weight path between `a` and `b`, in the order
    /// `a -> path[0].0 -> ... -> path[-1].0` with `path[-1].0 == b`; each
    /// entry carries the weight of the step into it
    pub fn get_path(&mut self, a: DetectorIndex, b: DetectorIndex) -> (Vec<(DetectorIndex, Weight)>, Weight) {
        assert_ne!(a, b, "cannot get path between the same vertex");
        let edges = self.all_edges_with_terminate(a, b);
        let mut vertex = b;
        let mut path = Vec::new();
        while vertex != a {
            let &(previous, weight) = &edges[&vertex];
            path.push((vertex, weight));
            if path.len() > 1 {
                let previous_index = path.len() - 2;
                path[previous_index].1 -= weight;
            }
            vertex = previous;
        }
        path.reverse();
        (path, edges[&b].1)
    }

    /// the minimum weight of matching `vertex` into the boundary, through any
    /// detector carrying a boundary edge
    pub fn boundary_distance(&mut self, vertex: DetectorIndex) -> Option<Weight> {
        let mut best = self.boundary_weights[vertex];
        let edges = self.all_edges(vertex);
        for (&peer, &(_, weight)) in edges.iter() {
            if let Some(boundary_weight) = self.boundary_weights[peer] {
                let through = weight + boundary_weight;
                if best.map_or(true, |current| through < current) {
                    best = Some(through);
                }
            }
        }
        best
    }
}

#[derive(Eq, Debug)]
pub struct PriorityElement {
    pub weight: Weight,
    pub previous: DetectorIndex,
}

impl std::cmp::PartialEq for PriorityElement {
    #[inline]
    fn eq(&self, other: &PriorityElement) -> bool {
        self.weight == other.weight
    }
}

impl std::cmp::PartialOrd for PriorityElement {
    #[inline]
    fn partial_cmp(&self, other: &PriorityElement) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for PriorityElement {
    #[inline]
    fn cmp(&self, other: &PriorityElement) -> std::cmp::Ordering {
        other.weight.cmp(&self.weight) // reverse `self` and `other` to prioritize smaller weight
    }
}

impl PriorityElement {
    pub fn new(weight: Weight, previous: DetectorIndex) -> Self {
        Self { weight, previous }
    }
}

/// exhaustively find the weight of a minimum-weight matching of the given
/// detections over the complete graph, each detection pairing with another
/// detection or with the boundary; `None` when no perfect matching exists.
/// Only usable for small instances, this is the test oracle for optimality.
pub fn minimum_weight_matching_brute_force(
    initializer: &SolverInitializer,
    detections: &[DetectorIndex],
) -> Option<Weight> {
    let mut complete_graph = CompleteGraph::new(initializer).expect("oracle requires a valid initializer");
    let count = detections.len();
    assert!(count <= 16, "brute force beyond 16 detections is too slow");
    let mut distances = vec![vec![None; count]; count];
    let mut boundary_distances = vec![None; count];
    for i in 0..count {
        let edges = complete_graph.all_edges(detections[i]);
        for j in 0..count {
            if i != j {
                distances[i][j] = edges.get(&detections[j]).map(|&(_, weight)| weight);
            }
        }
        boundary_distances[i] = complete_graph.boundary_distance(detections[i]);
    }
    let mut used = vec![false; count];
    fn solve(
        used: &mut Vec<bool>,
        distances: &Vec<Vec<Option<Weight>>>,
        boundary_distances: &Vec<Option<Weight>>,
    ) -> Option<Weight> {
        let i = match used.iter().position(|used| !used) {
            Some(i) => i,
            None => return Some(0),
        };
        used[i] = true;
        let mut best: Option<Weight> = None;
        if let Some(boundary_weight) = boundary_distances[i] {
            if let Some(rest) = solve(used, distances, boundary_distances) {
                let total = boundary_weight + rest;
                if best.map_or(true, |current| total < current) {
                    best = Some(total);
                }
            }
        }
        for j in (i + 1)..used.len() {
            if used[j] {
                continue;
            }
            if let Some(weight) = distances[i][j] {
                used[j] = true;
                if let Some(rest) = solve(used, distances, boundary_distances) {
                    let total = weight + rest;
                    if best.map_or(true, |current| total < current) {
                        best = Some(total);
                    }
                }
                used[j] = false;
            }
        }
        used[i] = false;
        best
    }
    solve(&mut used, &distances, &boundary_distances)
}
