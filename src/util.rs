//! Utilities
//!
//! Shared type definitions and small helpers used across the crate.
//!

use crate::rand_xoshiro::rand_core::RngCore;
use serde::{Deserialize, Serialize};

cfg_if::cfg_if! {
    if #[cfg(feature="i32_weight")] {
        /// use i32 to store weight, for less memory usage on small graphs
        pub type Weight = i32;
    } else {
        pub type Weight = i64;
    }
}

/// logical time of the flooder, in the same (integer) unit as edge weights
pub type Timestamp = Weight;

/// the index of a detector node in the decoding graph
pub type DetectorIndex = usize;

/// the index of a logical observable
pub type ObservableIndex = usize;

/// observables packed into a machine word, used by the matching graph;
/// graphs with more observables than the word width use the search graph instead
pub type ObsMask = u64;

/// monotonic version stamp held on each node-edge slot, used to invalidate
/// scheduled events without touching the priority queue
pub type ScheduleToken = u64;

/// number of observables that fit in [`ObsMask`]
pub const OBS_MASK_BITS: usize = ObsMask::BITS as usize;

/// a weighted edge of the decoding graph; `detector_2 == None` denotes the
/// virtual boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedEdge {
    pub detector_1: DetectorIndex,
    pub detector_2: Option<DetectorIndex>,
    pub weight: Weight,
    pub observables: Vec<ObservableIndex>,
}

/// everything needed to construct a solver: the integer-weighted decoding
/// graph after discretization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverInitializer {
    /// the number of detector nodes
    pub num_detectors: usize,
    /// the number of logical observables
    pub num_observables: usize,
    /// weighted edges, where detector indices are within the range [0, num_detectors)
    pub weighted_edges: Vec<WeightedEdge>,
}

impl SolverInitializer {
    pub fn new(num_detectors: usize, num_observables: usize, weighted_edges: Vec<WeightedEdge>) -> Self {
        Self {
            num_detectors,
            num_observables,
            weighted_edges,
        }
    }
}

/// the detection events of a single decoding shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyndromePattern {
    /// the detectors that fired, each must appear at most once
    pub detection_events: Vec<DetectorIndex>,
}

impl SyndromePattern {
    pub fn new(detection_events: Vec<DetectorIndex>) -> Self {
        Self { detection_events }
    }
}

/// pack a list of observable indices into a machine word; only valid when
/// every index fits in the mask
pub fn pack_observables(observables: &[ObservableIndex]) -> ObsMask {
    let mut mask = 0;
    for &observable in observables.iter() {
        assert!(
            observable < OBS_MASK_BITS,
            "observable {} does not fit in the mask, use the search graph instead",
            observable
        );
        mask ^= 1 << observable;
    }
    mask
}

/// use Xoshiro256StarStar for deterministic random number generator
pub type DeterministicRng = rand_xoshiro::Xoshiro256StarStar;

pub trait F64Rng {
    fn next_f64(&mut self) -> f64;
}

impl F64Rng for DeterministicRng {
    fn next_f64(&mut self) -> f64 {
        f64::from_bits(0x3FF << 52 | self.next_u64() >> 12) - 1.
    }
}
