//! Graph Fill Region
//!
//! A region is the growing/shrinking ball of covered detector nodes centred on
//! one excited detector (leaf form), or the contraction of an odd alternating
//! cycle of regions (blossom form). Regions are the dual variables of the
//! matching LP: a leaf radius is the dual of its excited detector, a blossom
//! radius is the dual of its odd set.
//!

use super::alternating_tree::*;
use super::matching_graph::*;
use super::pointers::*;
use super::util::*;
use crate::derivative::Derivative;

/// three possible grow states: Grow (+1), Stay (0), Shrink (-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionGrowState {
    Grow,
    Stay,
    Shrink,
}

impl RegionGrowState {
    pub fn rate(&self) -> Weight {
        match self {
            Self::Grow => 1,
            Self::Stay => 0,
            Self::Shrink => -1,
        }
    }
}

/// a region radius as an affine function of logical time: the value at
/// `last_update` plus the grow rate times the elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Radius {
    pub value: Weight,
    pub last_update: Timestamp,
}

impl Radius {
    pub fn new(value: Weight, last_update: Timestamp) -> Self {
        Self { value, last_update }
    }

    pub fn at(&self, grow_state: RegionGrowState, time: Timestamp) -> Weight {
        debug_assert!(time >= self.last_update, "radius evaluated before its last update");
        self.value + grow_state.rate() * (time - self.last_update)
    }
}

/// the implicit path between two region sources, summarized as its two
/// endpoints and the XOR of the observable masks along it; `loc_to == None`
/// denotes the virtual boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedEdge {
    pub loc_from: DetectorIndex,
    pub loc_to: Option<DetectorIndex>,
    pub observables: ObsMask,
}

impl CompressedEdge {
    pub fn new(loc_from: DetectorIndex, loc_to: Option<DetectorIndex>, observables: ObsMask) -> Self {
        Self {
            loc_from,
            loc_to,
            observables,
        }
    }

    pub fn reversed(&self) -> Self {
        let loc_to = self.loc_to.expect("cannot reverse an edge into the boundary");
        Self {
            loc_from: loc_to,
            loc_to: Some(self.loc_from),
            observables: self.observables,
        }
    }

    /// join two path summaries sharing an endpoint into one
    pub fn merged_with(&self, other: &Self) -> Self {
        debug_assert_eq!(self.loc_to, Some(other.loc_from), "merged edges must share an endpoint");
        Self {
            loc_from: self.loc_from,
            loc_to: other.loc_to,
            observables: self.observables ^ other.observables,
        }
    }
}

/// a region together with the edge connecting it to the next region in a
/// blossom cycle
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct RegionEdge {
    #[derivative(Debug = "ignore")]
    pub region: RegionPtr,
    pub edge: CompressedEdge,
}

/// a settled match of a region, either with a peer region or with the virtual
/// boundary; the edge is oriented away from the owning region
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct RegionMatch {
    #[derivative(Debug = "ignore")]
    pub peer: Option<RegionWeak>,
    pub edge: CompressedEdge,
}

impl RegionMatch {
    pub fn to_peer(peer: &RegionPtr, edge: CompressedEdge) -> Self {
        Self {
            peer: Some(peer.downgrade()),
            edge,
        }
    }

    pub fn to_boundary(edge: CompressedEdge) -> Self {
        debug_assert!(edge.loc_to.is_none(), "a boundary match must end at the boundary");
        Self { peer: None, edge }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct GraphFillRegion {
    /// the creation index of this region, for debugging
    pub index: usize,
    /// leaf form: the sole excited detector this region grew from
    #[derivative(Debug = "ignore")]
    pub source: Option<DetectorNodeWeak>,
    /// blossom form: the odd cycle of contained regions; each edge connects a
    /// child to the next child in the cycle
    #[derivative(Debug = "ignore")]
    pub blossom_children: Vec<RegionEdge>,
    pub grow_state: RegionGrowState,
    pub radius: Radius,
    /// when contained in a blossom, the grow state must be [`RegionGrowState::Stay`]
    #[derivative(Debug = "ignore")]
    pub blossom_parent: Option<RegionWeak>,
    /// the alternating-tree node this region belongs to, when it is part of
    /// the top-level forest; the strong link anchors the tree
    #[derivative(Debug = "ignore")]
    pub alt_tree_node: Option<AltTreeNodePtr>,
    /// detector nodes whose deepest owner is this region, in arrival order
    #[derivative(Debug = "ignore")]
    pub shell_area: Vec<DetectorNodeWeak>,
    /// advanced whenever the grow state changes, invalidating scheduled shrink events
    pub shrink_event_token: ScheduleToken,
    #[derivative(Debug = "ignore")]
    pub matched: Option<RegionMatch>,
}

pub type RegionPtr = ArcRwLock<GraphFillRegion>;
pub type RegionWeak = WeakRwLock<GraphFillRegion>;

impl std::fmt::Debug for RegionPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let region = self.read_recursive();
        write!(f, "{}", region.index)
    }
}

impl std::fmt::Debug for RegionWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upgrade_force().fmt(f)
    }
}

impl GraphFillRegion {
    pub fn is_blossom(&self) -> bool {
        !self.blossom_children.is_empty()
    }
}

impl RegionPtr {
    pub fn is_top_level(&self) -> bool {
        self.read_recursive().blossom_parent.is_none()
    }

    /// the radius of this single region at the given time
    pub fn radius_at(&self, time: Timestamp) -> Weight {
        let region = self.read_recursive();
        region.radius.at(region.grow_state, time)
    }

    /// the unique top-level region owning this one, possibly itself
    pub fn top_region(&self) -> RegionPtr {
        let mut current = self.clone();
        loop {
            let parent = match &current.read_recursive().blossom_parent {
                Some(parent) => parent.upgrade_force(),
                None => break,
            };
            current = parent;
        }
        current
    }

    /// the sum of radii along the containment chain from this region to its
    /// top-level ancestor; a node owned by this region has covered radius
    /// equal to this sum minus its arrival radius
    pub fn chain_total_radius(&self, time: Timestamp) -> Weight {
        let mut total = 0;
        let mut current = self.clone();
        loop {
            total += current.radius_at(time);
            let parent = match &current.read_recursive().blossom_parent {
                Some(parent) => parent.upgrade_force(),
                None => break,
            };
            current = parent;
        }
        total
    }

    /// rebase the affine radius at the given time and switch the grow state
    pub fn set_grow_state(&self, grow_state: RegionGrowState, time: Timestamp) {
        let mut region = self.write();
        let value = region.radius.at(region.grow_state, time);
        debug_assert!(value >= 0, "a region radius must never be negative");
        region.radius = Radius::new(value, time);
        region.grow_state = grow_state;
        region.shrink_event_token += 1;
    }

    /// visit every detector node covered by this region: its own shell area
    /// plus, recursively, the shell areas of all contained regions
    pub fn visit_covered_nodes(&self, visitor: &mut impl FnMut(&DetectorNodePtr)) {
        let (shell, children): (Vec<DetectorNodeWeak>, Vec<RegionPtr>) = {
            let region = self.read_recursive();
            (
                region.shell_area.clone(),
                region.blossom_children.iter().map(|child| child.region.clone()).collect(),
            )
        };
        for node_weak in shell.iter() {
            visitor(&node_weak.upgrade_force());
        }
        for child in children.iter() {
            child.visit_covered_nodes(visitor);
        }
    }
}

/// rotate a blossom cycle so that it starts at `start`, preserving the cyclic
/// order and edge orientations
pub fn rotated_cycle(cycle: &[RegionEdge], start: usize) -> Vec<RegionEdge> {
    let n = cycle.len();
    (0..n).map(|i| cycle[(start + i) % n].clone()).collect()
}

/// reverse the traversal direction of a blossom cycle while keeping the first
/// element in place; every connecting edge is re-oriented accordingly
pub fn reversed_cycle(cycle: &[RegionEdge]) -> Vec<RegionEdge> {
    let n = cycle.len();
    (0..n)
        .map(|i| RegionEdge {
            region: cycle[(n - i) % n].region.clone(),
            edge: cycle[(n - i - 1) % n].edge.reversed(),
        })
        .collect()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn create_leaf_region_for_test(index: usize) -> RegionPtr {
        RegionPtr::new_value(GraphFillRegion {
            index,
            source: None,
            blossom_children: vec![],
            grow_state: RegionGrowState::Grow,
            radius: Radius::new(0, 0),
            blossom_parent: None,
            alt_tree_node: None,
            shell_area: vec![],
            shrink_event_token: 0,
            matched: None,
        })
    }

    fn cycle_of(indices: &[usize]) -> Vec<RegionEdge> {
        let n = indices.len();
        (0..n)
            .map(|i| RegionEdge {
                region: create_leaf_region_for_test(indices[i]),
                edge: CompressedEdge::new(indices[i], Some(indices[(i + 1) % n]), 1 << indices[i]),
            })
            .collect()
    }

    fn assert_cycle_closed(cycle: &[RegionEdge]) {
        let n = cycle.len();
        for i in 0..n {
            assert_eq!(
                cycle[i].edge.loc_to,
                Some(cycle[(i + 1) % n].edge.loc_from),
                "each connecting edge must end where the next one starts"
            );
        }
    }

    #[test]
    fn region_radius_affine() {
        // cargo test region_radius_affine -- --nocapture
        let radius = Radius::new(3, 10);
        assert_eq!(radius.at(RegionGrowState::Grow, 15), 8);
        assert_eq!(radius.at(RegionGrowState::Stay, 15), 3);
        assert_eq!(radius.at(RegionGrowState::Shrink, 12), 1);
    }

    #[test]
    fn region_set_grow_state_rebases() {
        // cargo test region_set_grow_state_rebases -- --nocapture
        let region = create_leaf_region_for_test(0);
        region.set_grow_state(RegionGrowState::Grow, 0);
        assert_eq!(region.radius_at(4), 4);
        region.set_grow_state(RegionGrowState::Shrink, 4);
        assert_eq!(region.radius_at(6), 2);
        let token = region.read_recursive().shrink_event_token;
        region.set_grow_state(RegionGrowState::Stay, 6);
        assert_eq!(region.radius_at(100), 2);
        assert_ne!(token, region.read_recursive().shrink_event_token, "token must advance");
    }

    #[test]
    fn region_top_region_chain() {
        // cargo test region_top_region_chain -- --nocapture
        let child = create_leaf_region_for_test(0);
        let blossom = create_leaf_region_for_test(1);
        child.set_grow_state(RegionGrowState::Grow, 0);
        child.set_grow_state(RegionGrowState::Stay, 5); // frozen at radius 5
        child.write().blossom_parent = Some(blossom.downgrade());
        blossom.write().radius = Radius::new(0, 5); // the blossom starts growing at time 5
        assert_eq!(child.top_region(), blossom);
        assert_eq!(blossom.top_region(), blossom);
        assert!(!child.is_top_level());
        assert_eq!(child.chain_total_radius(8), 5 + 3);
    }

    #[test]
    fn region_cycle_rotate_reverse() {
        // cargo test region_cycle_rotate_reverse -- --nocapture
        let cycle = cycle_of(&[0, 1, 2, 3, 4]);
        assert_cycle_closed(&cycle);
        let rotated = rotated_cycle(&cycle, 3);
        assert_cycle_closed(&rotated);
        assert_eq!(rotated[0].region, cycle[3].region);
        let reversed = reversed_cycle(&cycle);
        assert_cycle_closed(&reversed);
        assert_eq!(reversed[0].region, cycle[0].region, "first element stays in place");
        assert_eq!(reversed[1].region, cycle[4].region);
        assert_eq!(reversed[0].edge, cycle[4].edge.reversed());
    }

    #[test]
    fn region_compressed_edge_merge() {
        // cargo test region_compressed_edge_merge -- --nocapture
        let a = CompressedEdge::new(0, Some(1), 0b011);
        let b = CompressedEdge::new(1, Some(2), 0b110);
        let merged = a.merged_with(&b);
        assert_eq!(merged, CompressedEdge::new(0, Some(2), 0b101));
        assert_eq!(a.reversed(), CompressedEdge::new(1, Some(0), 0b011));
    }
}
