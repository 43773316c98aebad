//! Tentative Events
//!
//! Prospective future actions of the flooder, ordered by the logical time at
//! which they would fire. The queue never updates entries in place: whenever a
//! schedule changes, a fresh event is pushed and the stale one is invalidated
//! by advancing the validity token held on the participating node-edge slots
//! (or on the region, for shrink events). Stale events are discarded silently
//! when popped.
//!

use super::matching_graph::*;
use super::region::*;
use super::util::*;
use crate::derivative::Derivative;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Derivative)]
#[derivative(Debug)]
pub enum TentativeEventData {
    /// the covered radii of two detector nodes meet along their shared edge,
    /// or a single covered radius reaches the boundary (`interactee == None`)
    NeighborInteraction {
        #[derivative(Debug = "ignore")]
        node_1: DetectorNodeWeak,
        local_index_1: usize,
        token_1: ScheduleToken,
        #[derivative(Debug = "ignore")]
        interactee: Option<(DetectorNodeWeak, usize, ScheduleToken)>,
    },
    /// a shrinking region's boundary retreats onto its outermost covered node,
    /// or its radius reaches zero
    RegionShrink {
        #[derivative(Debug = "ignore")]
        region: RegionWeak,
        token: ScheduleToken,
    },
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct TentativeEvent {
    pub time: Timestamp,
    /// stable sequence number: equal-time events fire in push order
    pub seq: u64,
    pub data: TentativeEventData,
}

impl PartialEq for TentativeEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for TentativeEvent {}

impl PartialOrd for TentativeEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TentativeEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

/// a min-priority queue of tentative events keyed by (time, sequence number)
pub struct EventQueue {
    heap: BinaryHeap<Reverse<TentativeEvent>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, time: Timestamp, data: TentativeEventData) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(TentativeEvent { time, seq, data }));
    }

    pub fn pop(&mut self) -> Option<TentativeEvent> {
        self.heap.pop().map(|Reverse(event)| event)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
