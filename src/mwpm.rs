//! Mwpm Driver
//!
//! Consumes matching events from the flooder, maintains the alternating-tree
//! forest of top-level regions and instructs the flooder when to change a
//! region's growth, contract a blossom or expand one. Once the queue is
//! exhausted every excited region is matched and the final matching is read
//! off by recursively shattering matched blossoms.
//!

use super::alternating_tree::*;
use super::error::*;
use super::flooder::*;
use super::matching_graph::*;
use super::pointers::*;
use super::region::*;
use super::util::*;
use tracing::debug;

pub struct Mwpm {
    pub flooder: GraphFlooder,
    /// the leaf regions created for the current syndrome, in creation order
    pub detection_regions: Vec<RegionPtr>,
}

/// the final matching: one compressed edge per matched pair of excited
/// detectors (or per boundary match), plus the total matching weight
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingResult {
    pub match_edges: Vec<CompressedEdge>,
    pub weight: Weight,
}

impl MatchingResult {
    /// XOR of the observable masks of all matched paths
    pub fn observable_mask(&self) -> ObsMask {
        self.match_edges.iter().fold(0, |mask, edge| mask ^ edge.observables)
    }
}

/// how a top-level region currently participates in the algorithm
enum RegionRole {
    /// the "+" region of an alternating-tree node
    Outer(AltTreeNodePtr),
    /// settled, together with its peer (`None` for a boundary match)
    Matched(Option<RegionPtr>),
}

impl Mwpm {
    pub fn new(flooder: GraphFlooder) -> Self {
        Self {
            flooder,
            detection_regions: vec![],
        }
    }

    pub fn clear(&mut self) {
        self.flooder.clear();
        self.detection_regions.clear();
    }

    /// spawn a growing leaf region on an excited detector, as its own
    /// single-node alternating tree
    pub fn create_detection_event(&mut self, node_ptr: &DetectorNodePtr) {
        let region = self.flooder.create_region(node_ptr);
        new_tree_root(&region);
        self.detection_regions.push(region);
    }

    /// drive the flooder until no live events remain
    pub fn run(&mut self) {
        while let Some(event) = self.flooder.next_event() {
            self.process_event(event);
        }
    }

    pub fn process_event(&mut self, event: MatchingEvent) {
        match event {
            MatchingEvent::RegionHitRegion {
                region_1,
                region_2,
                edge,
            } => self.handle_region_hit_region(region_1, region_2, edge),
            MatchingEvent::RegionHitBoundary { region, edge } => self.handle_region_hit_boundary(region, edge),
            MatchingEvent::DegenerateImplosion { region } => self.handle_degenerate_implosion(region),
            MatchingEvent::BlossomImplosion { region } => self.handle_blossom_implosion(region),
        }
    }

    fn region_role(&self, region: &RegionPtr) -> RegionRole {
        let region_read = region.read_recursive();
        if let Some(node) = &region_read.alt_tree_node {
            assert!(
                node.read_recursive().outer_region == region.downgrade(),
                "a matching event fired on an inner region"
            );
            return RegionRole::Outer(node.clone());
        }
        match &region_read.matched {
            Some(matched) => RegionRole::Matched(matched.peer.as_ref().map(|peer| peer.upgrade_force())),
            None => panic!("a matching event fired on a region that is neither in a tree nor matched"),
        }
    }

    fn handle_region_hit_region(&mut self, region_1: RegionPtr, region_2: RegionPtr, edge: CompressedEdge) {
        assert!(region_1 != region_2, "a region cannot collide with itself");
        match (self.region_role(&region_1), self.region_role(&region_2)) {
            (RegionRole::Outer(node_1), RegionRole::Outer(node_2)) => {
                if node_1.find_root() == node_2.find_root() {
                    self.handle_tree_hitting_self(region_1, node_1, region_2, node_2, edge);
                } else {
                    self.handle_tree_hitting_other_tree(region_1, node_1, region_2, node_2, edge);
                }
            }
            (RegionRole::Outer(node_1), RegionRole::Matched(peer)) => match peer {
                Some(peer) => self.handle_tree_hitting_match(region_1, node_1, region_2, peer, edge),
                None => self.handle_tree_hitting_boundary_match(region_1, node_1, region_2, edge),
            },
            (RegionRole::Matched(peer), RegionRole::Outer(node_2)) => match peer {
                Some(peer) => self.handle_tree_hitting_match(region_2, node_2, region_1, peer, edge.reversed()),
                None => self.handle_tree_hitting_boundary_match(region_2, node_2, region_1, edge.reversed()),
            },
            (RegionRole::Matched(_), RegionRole::Matched(_)) => {
                unreachable!("two settled regions cannot collide")
            }
        }
    }

    /// the boundary is an always-available "+" partner: augment the whole tree
    /// through it
    fn handle_region_hit_boundary(&mut self, region: RegionPtr, edge: CompressedEdge) {
        let node = match self.region_role(&region) {
            RegionRole::Outer(node) => node,
            RegionRole::Matched(_) => unreachable!("a settled region cannot hit the boundary"),
        };
        debug!("tree of region {:?} augments through the boundary", region);
        self.augment_tree(&node);
        self.match_region_to_boundary(&region, edge);
    }

    /// an augmenting path between two different trees: both dissolve into
    /// matched pairs and the colliding regions match each other
    fn handle_tree_hitting_other_tree(
        &mut self,
        region_1: RegionPtr,
        node_1: AltTreeNodePtr,
        region_2: RegionPtr,
        node_2: AltTreeNodePtr,
        edge: CompressedEdge,
    ) {
        debug!("augmenting path between {:?} and {:?}", region_1, region_2);
        self.augment_tree(&node_1);
        self.augment_tree(&node_2);
        self.match_regions(&region_1, &region_2, edge);
    }

    /// a "+" region hit a matched region: the matched pair joins the tree as a
    /// new "−"/"+" node
    fn handle_tree_hitting_match(
        &mut self,
        _tree_region: RegionPtr,
        tree_node: AltTreeNodePtr,
        hit_region: RegionPtr,
        hit_peer: RegionPtr,
        edge: CompressedEdge,
    ) {
        debug!("matched pair ({:?}, {:?}) joins the tree", hit_region, hit_peer);
        let inner_to_outer_edge = {
            let matched = hit_region.read_recursive().matched.clone().expect("the hit region is matched");
            debug_assert!(
                matched.peer.as_ref().map(|weak| weak.upgrade_force()) == Some(hit_peer.clone()),
                "match links out of sync"
            );
            matched.edge
        };
        hit_region.write().matched = None;
        hit_peer.write().matched = None;
        make_child(&tree_node, &hit_region, &hit_peer, inner_to_outer_edge, edge.reversed());
        self.flooder.set_region_growth(&hit_region, RegionGrowState::Shrink);
        self.flooder.set_region_growth(&hit_peer, RegionGrowState::Grow);
    }

    /// a "+" region hit a region matched to the boundary: the augmenting path
    /// runs through the boundary, freeing it
    fn handle_tree_hitting_boundary_match(
        &mut self,
        tree_region: RegionPtr,
        tree_node: AltTreeNodePtr,
        hit_region: RegionPtr,
        edge: CompressedEdge,
    ) {
        debug!("augmenting path through boundary-matched region {:?}", hit_region);
        self.augment_tree(&tree_node);
        hit_region.write().matched = None;
        self.match_regions(&tree_region, &hit_region, edge);
    }

    /// two "+" regions of the same tree closed an odd alternating cycle:
    /// contract it into a blossom rooted at their common ancestor
    fn handle_tree_hitting_self(
        &mut self,
        region_1: RegionPtr,
        node_1: AltTreeNodePtr,
        region_2: RegionPtr,
        node_2: AltTreeNodePtr,
        edge: CompressedEdge,
    ) {
        let ancestor = common_ancestor(&node_1, &node_2);
        let (path_1, orphans_1) = node_1.prune_upward_path_stopping_before(&ancestor);
        let (path_2, orphans_2) = node_2.prune_upward_path_stopping_before(&ancestor);
        let ancestor_outer = ancestor.read_recursive().outer_region.upgrade_force();
        // assemble the odd cycle: down from the ancestor to region_2, across
        // the colliding edge to region_1, and back up to the ancestor
        let mut cycle: Vec<RegionEdge> = vec![];
        if path_2.is_empty() {
            debug_assert!(ancestor_outer == region_2, "an empty path means the ancestor collided");
            cycle.push(RegionEdge {
                region: ancestor_outer.clone(),
                edge: edge.reversed(),
            });
        } else {
            let last = path_2.len() - 1;
            cycle.push(RegionEdge {
                region: ancestor_outer.clone(),
                edge: path_2[last].edge.reversed(),
            });
            for i in (1..=last).rev() {
                cycle.push(RegionEdge {
                    region: path_2[i].region.clone(),
                    edge: path_2[i - 1].edge.reversed(),
                });
            }
            cycle.push(RegionEdge {
                region: region_2.clone(),
                edge: edge.reversed(),
            });
        }
        cycle.extend(path_1.iter().cloned());
        debug!("contracting an odd cycle of {} regions around {:?}", cycle.len(), region_1);
        let blossom = self.flooder.create_blossom(cycle);
        ancestor.write().outer_region = blossom.downgrade();
        blossom.write().alt_tree_node = Some(ancestor.clone());
        for orphan in orphans_1.into_iter().chain(orphans_2) {
            let orphan_edge = orphan
                .read_recursive()
                .parent
                .as_ref()
                .expect("orphans hung below a pruned node")
                .edge
                .clone();
            orphan.write().parent = Some(AltTreeParent {
                node: ancestor.downgrade(),
                edge: orphan_edge,
            });
            ancestor.write().children.push(orphan);
        }
    }

    /// a leaf "−" region shrank to zero: its tree parent's and its own "+"
    /// regions effectively collide through the zero-radius region, closing a
    /// length-3 odd cycle
    fn handle_degenerate_implosion(&mut self, region: RegionPtr) {
        let node = region
            .read_recursive()
            .alt_tree_node
            .clone()
            .expect("an imploding region must be in a tree");
        let (parent_outer, own_outer, edge) = {
            let node_read = node.read_recursive();
            assert!(
                node_read.inner_region == Some(region.downgrade()),
                "only inner regions shrink"
            );
            let parent = node_read.parent.clone().expect("an inner region cannot be the root");
            let inner_to_outer_edge = node_read
                .inner_to_outer_edge
                .clone()
                .expect("a non-root node always has an inner-to-outer edge");
            (
                parent.node.upgrade_force().read_recursive().outer_region.upgrade_force(),
                node_read.outer_region.upgrade_force(),
                parent.edge.reversed().merged_with(&inner_to_outer_edge),
            )
        };
        debug!("degenerate implosion of {:?} collapses a tree segment", region);
        self.handle_region_hit_region(parent_outer, own_outer, edge);
    }

    /// a "−" blossom shrank to zero: expand it, re-routing the enclosing tree
    /// through the odd cycle arc and matching the even arc pairwise
    fn handle_blossom_implosion(&mut self, blossom: RegionPtr) {
        let node = blossom
            .read_recursive()
            .alt_tree_node
            .clone()
            .expect("an imploding blossom must be in a tree");
        let (parent, inner_to_outer_edge) = {
            let node_read = node.read_recursive();
            assert!(
                node_read.inner_region == Some(blossom.downgrade()),
                "only inner blossoms implode"
            );
            (
                node_read.parent.clone().expect("an inner blossom cannot be the root"),
                node_read
                    .inner_to_outer_edge
                    .clone()
                    .expect("a non-root node always has an inner-to-outer edge"),
            )
        };
        let in_parent = self.find_child_owning(&blossom, parent.edge.loc_from);
        let in_child = self.find_child_owning(&blossom, inner_to_outer_edge.loc_from);
        let cycle = blossom.read_recursive().blossom_children.clone();
        self.flooder.shatter_blossom(&blossom);
        blossom.write().alt_tree_node = None;
        debug!(
            "blossom {:?} expands into {} regions, re-routing the tree",
            blossom,
            cycle.len()
        );
        // rotate the cycle to start at the child touching the tree parent, and
        // orient it so that the arc towards the other touching child has an
        // odd number of regions
        let start = cycle
            .iter()
            .position(|region_edge| region_edge.region == in_parent)
            .expect("the touching child is in the cycle");
        let mut cycle = rotated_cycle(&cycle, start);
        let mut in_child_index = cycle
            .iter()
            .position(|region_edge| region_edge.region == in_child)
            .expect("the touching child is in the cycle");
        if in_child_index % 2 == 1 {
            cycle = reversed_cycle(&cycle);
            in_child_index = cycle.len() - in_child_index;
        }
        // the odd arc replaces the blossom in the tree as "−"/"+" pairs
        let parent_node = parent.node.upgrade_force();
        parent_node.write().children.retain(|child| child != &node);
        let mut previous = parent_node;
        let mut previous_edge = parent.edge.clone();
        for s in 0..in_child_index / 2 {
            let inner = cycle[2 * s].region.clone();
            let outer = cycle[2 * s + 1].region.clone();
            let child_node = make_child(&previous, &inner, &outer, cycle[2 * s].edge.clone(), previous_edge);
            self.flooder.set_region_growth(&inner, RegionGrowState::Shrink);
            self.flooder.set_region_growth(&outer, RegionGrowState::Grow);
            previous = child_node;
            previous_edge = cycle[2 * s + 1].edge.reversed();
        }
        // the original node keeps its outer region and adopts the touching
        // child as its new inner region
        {
            let mut node_mut = node.write();
            node_mut.inner_region = Some(cycle[in_child_index].region.downgrade());
            node_mut.parent = Some(AltTreeParent {
                node: previous.downgrade(),
                edge: previous_edge,
            });
        }
        previous.write().children.push(node.clone());
        cycle[in_child_index].region.write().alt_tree_node = Some(node.clone());
        self.flooder
            .set_region_growth(&cycle[in_child_index].region, RegionGrowState::Shrink);
        // the even arc becomes matched pairs
        let mut k = in_child_index + 1;
        while k < cycle.len() {
            let pair_edge = cycle[k].edge.clone();
            let region_a = cycle[k].region.clone();
            let region_b = cycle[k + 1].region.clone();
            self.match_regions(&region_a, &region_b, pair_edge);
            k += 2;
        }
    }

    /// dissolve a tree into matched pairs: after re-rooting at `node`, every
    /// other tree node matches its inner and outer regions with each other;
    /// the new root's outer region is left for the caller to match externally
    fn augment_tree(&mut self, node: &AltTreeNodePtr) {
        node.become_root();
        let pairs: Vec<(RegionPtr, RegionPtr, CompressedEdge)> = node
            .all_nodes_in_tree()
            .iter()
            .filter(|tree_node| *tree_node != node)
            .map(|tree_node| {
                let tree_node = tree_node.read_recursive();
                (
                    tree_node
                        .inner_region
                        .as_ref()
                        .expect("a non-root node always has an inner region")
                        .upgrade_force(),
                    tree_node.outer_region.upgrade_force(),
                    tree_node
                        .inner_to_outer_edge
                        .clone()
                        .expect("a non-root node always has an inner-to-outer edge"),
                )
            })
            .collect();
        for (inner, outer, edge) in pairs {
            self.match_regions(&inner, &outer, edge);
        }
        let root_outer = node.read_recursive().outer_region.upgrade_force();
        root_outer.write().alt_tree_node = None;
    }

    fn match_regions(&mut self, region_1: &RegionPtr, region_2: &RegionPtr, edge: CompressedEdge) {
        debug!("region {:?} matched with region {:?}", region_1, region_2);
        {
            let mut region = region_1.write();
            region.matched = Some(RegionMatch::to_peer(region_2, edge.clone()));
            region.alt_tree_node = None;
        }
        {
            let mut region = region_2.write();
            region.matched = Some(RegionMatch::to_peer(region_1, edge.reversed()));
            region.alt_tree_node = None;
        }
        self.flooder.set_region_growth(region_1, RegionGrowState::Stay);
        self.flooder.set_region_growth(region_2, RegionGrowState::Stay);
    }

    fn match_region_to_boundary(&mut self, region: &RegionPtr, edge: CompressedEdge) {
        debug!("region {:?} matched with the boundary", region);
        {
            let mut region = region.write();
            region.matched = Some(RegionMatch::to_boundary(edge));
            region.alt_tree_node = None;
        }
        self.flooder.set_region_growth(region, RegionGrowState::Stay);
    }

    /// the direct child of `blossom` whose coverage contains the given detector
    fn find_child_owning(&self, blossom: &RegionPtr, detector: DetectorIndex) -> RegionPtr {
        let mut region = self.flooder.graph.nodes[detector]
            .read_recursive()
            .region
            .as_ref()
            .expect("the touching detector must be covered")
            .upgrade_force();
        loop {
            let parent = region
                .read_recursive()
                .blossom_parent
                .clone()
                .expect("the touching detector must be covered by a descendant of the blossom")
                .upgrade_force();
            if parent == *blossom {
                return region;
            }
            region = parent;
        }
    }

    /// read off the final matching, recursively shattering matched blossoms;
    /// the weight is the dual objective, the sum of all region radii
    pub fn extract_matching(&mut self) -> MwpmResult<MatchingResult> {
        let mut match_edges = vec![];
        let mut visited: Vec<RegionPtr> = vec![];
        for leaf in self.detection_regions.clone() {
            let top = leaf.top_region();
            if visited.contains(&top) {
                continue;
            }
            visited.push(top.clone());
            let matched = match top.read_recursive().matched.clone() {
                Some(matched) => matched,
                None => {
                    let unmatched = self
                        .detection_regions
                        .iter()
                        .filter(|region| region.top_region().read_recursive().matched.is_none())
                        .count();
                    return Err(MwpmError::UnmatchableSyndrome { unmatched });
                }
            };
            match_edges.push(matched.edge.clone());
            match &matched.peer {
                Some(peer) => {
                    let peer = peer.upgrade_force();
                    visited.push(peer.clone());
                    self.shatter_into_matches(&top, &mut match_edges);
                    self.shatter_into_matches(&peer, &mut match_edges);
                }
                None => self.shatter_into_matches(&top, &mut match_edges),
            }
        }
        let time = self.flooder.time;
        let weight = self
            .flooder
            .region_arena
            .iter()
            .map(|region| region.radius_at(time))
            .sum();
        Ok(MatchingResult { match_edges, weight })
    }

    /// hand a blossom's external match down to the child owning the matched
    /// endpoint and pair the remaining children around the cycle
    fn shatter_into_matches(&mut self, region_ptr: &RegionPtr, match_edges: &mut Vec<CompressedEdge>) {
        let (is_blossom, matched) = {
            let region = region_ptr.read_recursive();
            (
                region.is_blossom(),
                region.matched.clone().expect("shattering an unmatched region"),
            )
        };
        if !is_blossom {
            return;
        }
        let cycle = region_ptr.read_recursive().blossom_children.clone();
        let sub_blossom = self.find_child_owning(region_ptr, matched.edge.loc_from);
        sub_blossom.write().matched = Some(matched);
        let start = cycle
            .iter()
            .position(|region_edge| region_edge.region == sub_blossom)
            .expect("the owning child is in the cycle");
        let cycle = rotated_cycle(&cycle, start);
        let mut k = 1;
        while k < cycle.len() {
            let pair_edge = cycle[k].edge.clone();
            cycle[k].region.write().matched = Some(RegionMatch::to_peer(&cycle[k + 1].region, pair_edge.clone()));
            cycle[k + 1].region.write().matched = Some(RegionMatch::to_peer(&cycle[k].region, pair_edge.reversed()));
            match_edges.push(pair_edge);
            k += 2;
        }
        self.shatter_into_matches(&sub_blossom, match_edges);
        let mut k = 1;
        while k < cycle.len() {
            let region_a = cycle[k].region.clone();
            let region_b = cycle[k + 1].region.clone();
            self.shatter_into_matches(&region_a, match_edges);
            self.shatter_into_matches(&region_b, match_edges);
            k += 2;
        }
    }
}
