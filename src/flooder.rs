//! Graph Flooder
//!
//! The continuous-time simulator at the heart of the decoder. Regions grow and
//! shrink at unit speed over the matching graph; the flooder advances a global
//! logical clock to the next live tentative event, mutates the geometry
//! accordingly and hands confirmed matching events to the driver. Everything
//! in between (regions spreading over empty detector nodes, shrinking regions
//! releasing nodes, stale events) is handled internally and produces no
//! matching event.
//!

use super::events::*;
use super::matching_graph::*;
use super::region::*;
use super::util::*;
use crate::pointers::*;
use tracing::{debug, trace};

/// a confirmed event handed from the flooder to the driver
#[derive(Debug)]
pub enum MatchingEvent {
    /// two distinct top-level regions collide along a concrete edge
    RegionHitRegion {
        region_1: RegionPtr,
        region_2: RegionPtr,
        edge: CompressedEdge,
    },
    /// a region's growing edge reaches the virtual boundary
    RegionHitBoundary { region: RegionPtr, edge: CompressedEdge },
    /// a shrinking leaf region collapsed to zero radius
    DegenerateImplosion { region: RegionPtr },
    /// a shrinking blossom collapsed to zero radius and must be expanded
    BlossomImplosion { region: RegionPtr },
}

pub struct GraphFlooder {
    pub graph: MatchingGraph,
    queue: EventQueue,
    /// the logical clock, in the same integer unit as edge weights
    pub time: Timestamp,
    /// every region created during the current decoding; anchors region
    /// lifetimes, all other links are weak
    pub region_arena: Vec<RegionPtr>,
}

impl GraphFlooder {
    pub fn new(graph: MatchingGraph) -> Self {
        Self {
            graph,
            queue: EventQueue::new(),
            time: 0,
            region_arena: vec![],
        }
    }

    /// reset all decoding state, keeping the graph shape
    pub fn clear(&mut self) {
        self.queue.clear();
        self.graph.clear_covering_state();
        self.region_arena.clear();
        self.time = 0;
    }

    pub fn sync_negative_weight_observables_and_detection_events(&mut self) {
        self.graph.sync_negative_weight_observables_and_detection_events();
    }

    /// create a new growing leaf region on an excited detector
    pub fn create_region(&mut self, node_ptr: &DetectorNodePtr) -> RegionPtr {
        let region = RegionPtr::new_value(GraphFillRegion {
            index: self.region_arena.len(),
            source: Some(node_ptr.downgrade()),
            blossom_children: vec![],
            grow_state: RegionGrowState::Grow,
            radius: Radius::new(0, self.time),
            blossom_parent: None,
            alt_tree_node: None,
            shell_area: vec![node_ptr.downgrade()],
            shrink_event_token: 0,
            matched: None,
        });
        {
            let mut node = node_ptr.write();
            assert!(node.region.is_none(), "creating a region on a covered detector node forbidden");
            node.region = Some(region.downgrade());
            node.source = Some(node.index);
            node.observables_crossed = 0;
            node.arrival_radius = 0;
        }
        debug!("region {:?} created at detector {:?}", region, node_ptr);
        self.region_arena.push(region.clone());
        self.reschedule_events_at_detector_node(node_ptr);
        region
    }

    /// change the grow state of a top-level region; every event touching the
    /// region's covered area is rescheduled because future collision times shift
    pub fn set_region_growth(&mut self, region_ptr: &RegionPtr, grow_state: RegionGrowState) {
        assert!(region_ptr.is_top_level(), "setting growth of a contained region forbidden");
        region_ptr.set_grow_state(grow_state, self.time);
        trace!("region {:?} grow state set to {:?}", region_ptr, grow_state);
        self.reschedule_events_for_region(region_ptr);
    }

    /// bundle an odd alternating cycle of top-level regions into a new growing
    /// blossom, detaching each child from the top-level forest
    pub fn create_blossom(&mut self, cycle: Vec<RegionEdge>) -> RegionPtr {
        assert!(
            cycle.len() >= 3 && cycle.len() % 2 == 1,
            "a blossom must contain an odd number of at least 3 regions, got {}",
            cycle.len()
        );
        let blossom = RegionPtr::new_value(GraphFillRegion {
            index: self.region_arena.len(),
            source: None,
            blossom_children: cycle.clone(),
            grow_state: RegionGrowState::Grow,
            radius: Radius::new(0, self.time),
            blossom_parent: None,
            alt_tree_node: None,
            shell_area: vec![],
            shrink_event_token: 0,
            matched: None,
        });
        for region_edge in cycle.iter() {
            let child_ptr = &region_edge.region;
            assert!(child_ptr.is_top_level(), "a contained region cannot join another blossom");
            child_ptr.set_grow_state(RegionGrowState::Stay, self.time); // freeze the child radius
            let mut child = child_ptr.write();
            child.blossom_parent = Some(blossom.downgrade());
            child.alt_tree_node = None;
        }
        debug!("blossom {:?} created over {} regions", blossom, cycle.len());
        self.region_arena.push(blossom.clone());
        self.reschedule_events_for_region(&blossom);
        blossom
    }

    /// undo a blossom contraction at zero radius, restoring its children to the
    /// top-level forest; the driver assigns new grow states to every child,
    /// which triggers the necessary rescheduling
    pub fn shatter_blossom(&mut self, blossom_ptr: &RegionPtr) {
        {
            let blossom = blossom_ptr.read_recursive();
            assert!(blossom.is_blossom(), "only blossoms can be shattered");
            assert!(
                blossom.shell_area.is_empty(),
                "a blossom can only be shattered after releasing every covered node"
            );
        }
        assert_eq!(blossom_ptr.radius_at(self.time), 0, "a blossom can only be shattered at zero radius");
        debug!("blossom {:?} shattered", blossom_ptr);
        // the dissolved blossom stays in the region arena: freeze it at zero
        // radius so the dual objective no longer tracks it
        blossom_ptr.set_grow_state(RegionGrowState::Stay, self.time);
        let children: Vec<RegionPtr> = blossom_ptr
            .read_recursive()
            .blossom_children
            .iter()
            .map(|region_edge| region_edge.region.clone())
            .collect();
        for child in children.iter() {
            child.write().blossom_parent = None;
        }
    }

    /// advance the clock to the next live tentative event and return the
    /// corresponding matching event; `None` once the queue is exhausted
    pub fn next_event(&mut self) -> Option<MatchingEvent> {
        while let Some(event) = self.queue.pop() {
            match event.data {
                TentativeEventData::NeighborInteraction {
                    node_1,
                    local_index_1,
                    token_1,
                    interactee,
                } => {
                    let node_1 = node_1.upgrade_force();
                    if node_1.read_recursive().schedule_tokens[local_index_1] != token_1 {
                        continue; // invalidated
                    }
                    let node_2 = match &interactee {
                        Some((node_2, local_index_2, token_2)) => {
                            let node_2 = node_2.upgrade_force();
                            if node_2.read_recursive().schedule_tokens[*local_index_2] != *token_2 {
                                continue; // invalidated
                            }
                            Some(node_2)
                        }
                        None => None,
                    };
                    debug_assert!(event.time >= self.time, "events must fire in non-decreasing time");
                    self.time = event.time;
                    if let Some(matching_event) = self.do_neighbor_interaction(&node_1, local_index_1, node_2.as_ref()) {
                        return Some(matching_event);
                    }
                }
                TentativeEventData::RegionShrink { region, token } => {
                    let region = region.upgrade_force();
                    if region.read_recursive().shrink_event_token != token {
                        continue; // invalidated
                    }
                    debug_assert!(event.time >= self.time, "events must fire in non-decreasing time");
                    self.time = event.time;
                    if let Some(matching_event) = self.do_region_shrinking(&region) {
                        return Some(matching_event);
                    }
                }
            }
        }
        None
    }

    /// the covering state of one endpoint of an edge: its top-level region,
    /// its covered radius and the top-level grow rate
    fn cover_info(&self, node_ptr: &DetectorNodePtr) -> Option<(RegionPtr, Weight, Weight)> {
        let node = node_ptr.read_recursive();
        node.region.as_ref().map(|region| {
            let region = region.upgrade_force();
            let covered = region.chain_total_radius(self.time) - node.arrival_radius;
            debug_assert!(covered >= 0, "covered radius must never be negative");
            let top = region.top_region();
            let rate = top.read_recursive().grow_state.rate();
            (top, covered, rate)
        })
    }

    fn do_neighbor_interaction(
        &mut self,
        node_1: &DetectorNodePtr,
        local_index_1: usize,
        node_2: Option<&DetectorNodePtr>,
    ) -> Option<MatchingEvent> {
        let node_2 = match node_2 {
            None => {
                // the covered radius reached the boundary
                let (region, edge) = {
                    let node = node_1.read_recursive();
                    let neighbor = &node.neighbors[local_index_1];
                    debug_assert!(neighbor.node.is_none(), "slot mismatch: expected a boundary edge");
                    let source = node.source.expect("a boundary collision requires a covered node");
                    (
                        node.region.as_ref().expect("covered").upgrade_force(),
                        CompressedEdge::new(source, None, node.observables_crossed ^ neighbor.observables),
                    )
                };
                let top = region.top_region();
                trace!("region {:?} hit the boundary at time {}", top, self.time);
                return Some(MatchingEvent::RegionHitBoundary { region: top, edge });
            }
            Some(node_2) => node_2,
        };
        let covered_1 = node_1.read_recursive().is_covered();
        let covered_2 = node_2.read_recursive().is_covered();
        match (covered_1, covered_2) {
            (true, false) => {
                self.do_region_arriving_at_empty_detector_node(node_1, local_index_1, node_2);
                None
            }
            (false, true) => {
                let local_index_2 = node_2
                    .read_recursive()
                    .index_of_neighbor(Some(node_1))
                    .expect("edges are stored on both endpoints");
                self.do_region_arriving_at_empty_detector_node(node_2, local_index_2, node_1);
                None
            }
            (true, true) => {
                let top_1 = self.cover_info(node_1).expect("covered").0;
                let top_2 = self.cover_info(node_2).expect("covered").0;
                if top_1 == top_2 {
                    return None; // both became contained in a common blossom, drop silently
                }
                let edge = {
                    let node_1 = node_1.read_recursive();
                    let node_2 = node_2.read_recursive();
                    let neighbor = &node_1.neighbors[local_index_1];
                    CompressedEdge::new(
                        node_1.source.expect("covered"),
                        Some(node_2.source.expect("covered")),
                        node_1.observables_crossed ^ node_2.observables_crossed ^ neighbor.observables,
                    )
                };
                trace!("region {:?} hit region {:?} at time {}", top_1, top_2, self.time);
                Some(MatchingEvent::RegionHitRegion {
                    region_1: top_1,
                    region_2: top_2,
                    edge,
                })
            }
            (false, false) => unreachable!("a neighbor interaction event fired between two uncovered nodes"),
        }
    }

    /// a growing region claims an uncovered detector node across a fully-grown edge
    fn do_region_arriving_at_empty_detector_node(
        &mut self,
        from_node: &DetectorNodePtr,
        from_local_index: usize,
        to_node: &DetectorNodePtr,
    ) {
        let (top, source, observables_crossed) = {
            let node = from_node.read_recursive();
            let neighbor = &node.neighbors[from_local_index];
            (
                node.region.as_ref().expect("covered").upgrade_force().top_region(),
                node.source.expect("covered"),
                node.observables_crossed ^ neighbor.observables,
            )
        };
        let arrival_radius = top.radius_at(self.time);
        {
            let mut node = to_node.write();
            debug_assert!(node.region.is_none(), "arriving at an already covered node");
            node.region = Some(top.downgrade());
            node.source = Some(source);
            node.observables_crossed = observables_crossed;
            node.arrival_radius = arrival_radius;
        }
        top.write().shell_area.push(to_node.downgrade());
        trace!("region {:?} arrived at detector {:?} at time {}", top, to_node, self.time);
        self.reschedule_events_at_detector_node(to_node);
    }

    /// a shrinking region's boundary reached its outermost covered node: either
    /// release that node, or report the implosion once nothing is left
    fn do_region_shrinking(&mut self, region_ptr: &RegionPtr) -> Option<MatchingEvent> {
        let (is_blossom, shell_len, radius_now) = {
            let region = region_ptr.read_recursive();
            debug_assert!(
                region.grow_state == RegionGrowState::Shrink,
                "a shrink event fired on a non-shrinking region"
            );
            (
                region.is_blossom(),
                region.shell_area.len(),
                region.radius.at(region.grow_state, self.time),
            )
        };
        if is_blossom && shell_len == 0 {
            debug_assert_eq!(radius_now, 0);
            debug!("blossom {:?} imploded at time {}", region_ptr, self.time);
            return Some(MatchingEvent::BlossomImplosion {
                region: region_ptr.clone(),
            });
        }
        if !is_blossom && shell_len == 1 {
            debug_assert_eq!(radius_now, 0);
            debug!("leaf region {:?} imploded at time {}", region_ptr, self.time);
            return Some(MatchingEvent::DegenerateImplosion {
                region: region_ptr.clone(),
            });
        }
        // release the outermost covered node
        let node_weak = region_ptr.write().shell_area.pop().expect("shell is nonempty");
        let node_ptr = node_weak.upgrade_force();
        debug_assert_eq!(
            node_ptr.read_recursive().arrival_radius,
            radius_now,
            "the released node must sit exactly on the shrinking boundary"
        );
        node_ptr.write().uncover();
        trace!("region {:?} released detector {:?} at time {}", region_ptr, node_ptr, self.time);
        self.reschedule_events_at_detector_node(&node_ptr);
        self.schedule_tentative_shrink_event(region_ptr);
        None
    }

    /// re-evaluate every event at the given detector node, one per incident edge
    pub fn reschedule_events_at_detector_node(&mut self, node_ptr: &DetectorNodePtr) {
        let num_neighbors = node_ptr.read_recursive().neighbors.len();
        for local_index in 0..num_neighbors {
            self.schedule_tentative_neighbor_interaction_event(node_ptr, local_index);
        }
    }

    /// re-evaluate every event touching the region's covered area, plus its
    /// shrink event
    pub fn reschedule_events_for_region(&mut self, region_ptr: &RegionPtr) {
        let mut nodes = vec![];
        region_ptr.visit_covered_nodes(&mut |node| nodes.push(node.clone()));
        for node in nodes.iter() {
            self.reschedule_events_at_detector_node(node);
        }
        self.schedule_tentative_shrink_event(region_ptr);
    }

    /// schedule the next boundary-retreat event of a shrinking region; no-op
    /// for growing or frozen regions (their stale events were invalidated when
    /// the grow state changed)
    fn schedule_tentative_shrink_event(&mut self, region_ptr: &RegionPtr) {
        let (grow_state, radius_now, target) = {
            let region = region_ptr.read_recursive();
            let target = region
                .shell_area
                .last()
                .map(|node| node.upgrade_force().read_recursive().arrival_radius)
                .unwrap_or(0);
            (
                region.grow_state,
                region.radius.at(region.grow_state, self.time),
                target,
            )
        };
        if grow_state != RegionGrowState::Shrink {
            return;
        }
        debug_assert!(radius_now >= target, "the outermost node is beyond the region boundary");
        let token = {
            let mut region = region_ptr.write();
            region.shrink_event_token += 1;
            region.shrink_event_token
        };
        self.queue.push(
            self.time + (radius_now - target),
            TentativeEventData::RegionShrink {
                region: region_ptr.downgrade(),
                token,
            },
        );
    }

    /// compute the unique time at which the covered radii meet along this edge
    /// and install the event in the queue, invalidating whatever previously
    /// occupied the edge's two schedule slots; edges that cannot collide are
    /// only invalidated
    pub fn schedule_tentative_neighbor_interaction_event(&mut self, node_ptr: &DetectorNodePtr, local_index: usize) {
        let (weight, peer) = {
            let node = node_ptr.read_recursive();
            let neighbor = &node.neighbors[local_index];
            (neighbor.weight, neighbor.node.as_ref().map(|weak| weak.upgrade_force()))
        };
        debug_assert!(weight >= 0, "negative weights must be canonicalised before flooding");
        let side_1 = self.cover_info(node_ptr);
        let peer_ptr = match peer {
            None => {
                // boundary edge: single slot
                let token_1 = node_ptr.write().bump_schedule_token(local_index);
                if let Some((_top, covered, rate)) = side_1 {
                    if rate > 0 {
                        debug_assert!(covered <= weight, "covered radius beyond the boundary edge");
                        self.queue.push(
                            self.time + (weight - covered),
                            TentativeEventData::NeighborInteraction {
                                node_1: node_ptr.downgrade(),
                                local_index_1: local_index,
                                token_1,
                                interactee: None,
                            },
                        );
                    }
                }
                return;
            }
            Some(peer_ptr) => peer_ptr,
        };
        let side_2 = self.cover_info(&peer_ptr);
        let peer_local_index = peer_ptr
            .read_recursive()
            .index_of_neighbor(Some(node_ptr))
            .expect("edges are stored on both endpoints");
        let token_1 = node_ptr.write().bump_schedule_token(local_index);
        let token_2 = peer_ptr.write().bump_schedule_token(peer_local_index);
        let fire_time = match (&side_1, &side_2) {
            (None, None) => None,
            (Some((_top, covered, rate)), None) | (None, Some((_top, covered, rate))) => {
                // a growing region spreading towards an uncovered node
                if *rate > 0 {
                    debug_assert!(*covered <= weight, "covered radius beyond the edge towards an uncovered node");
                    Some(self.time + (weight - covered))
                } else {
                    None
                }
            }
            (Some((top_1, covered_1, rate_1)), Some((top_2, covered_2, rate_2))) => {
                if top_1 == top_2 {
                    None // internal edge of a blossom, frozen at zero slack
                } else {
                    let slack = weight - covered_1 - covered_2;
                    let combined = rate_1 + rate_2;
                    if combined <= 0 {
                        None // the pair cannot collide
                    } else if slack <= 0 {
                        debug_assert_eq!(slack, 0, "two regions over-grew a shared edge");
                        Some(self.time)
                    } else {
                        if combined == 2 {
                            assert!(
                                slack % 2 == 0,
                                "odd gap between two growing regions, please make sure all weights are even numbers"
                            );
                        }
                        Some(self.time + slack / combined)
                    }
                }
            }
        };
        if let Some(time) = fire_time {
            self.queue.push(
                time,
                TentativeEventData::NeighborInteraction {
                    node_1: node_ptr.downgrade(),
                    local_index_1: local_index,
                    token_1,
                    interactee: Some((peer_ptr.downgrade(), peer_local_index, token_2)),
                },
            );
        }
    }
}
