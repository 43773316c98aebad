//! Alternating Tree
//!
//! The classical blossom-algorithm forest of "+"/"−" labelled regions rooted at
//! still-unmatched excited regions. Each tree node pairs an inner ("−",
//! shrinking) region with an outer ("+", growing) region; the root carries only
//! an outer region. Regions hold strong links to their tree node and parents
//! hold strong links to children, while the reverse directions are weak, so a
//! tree is dropped as soon as its regions leave the forest.
//!

use super::pointers::*;
use super::region::*;
use crate::derivative::Derivative;

/// the upward link of a tree node; the edge is oriented from this node's inner
/// region to the parent node's outer region
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct AltTreeParent {
    #[derivative(Debug = "ignore")]
    pub node: AltTreeNodeWeak,
    pub edge: CompressedEdge,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct AltTreeNode {
    /// the "−" region; absent only at the root
    #[derivative(Debug = "ignore")]
    pub inner_region: Option<RegionWeak>,
    /// the "+" region
    #[derivative(Debug = "ignore")]
    pub outer_region: RegionWeak,
    /// oriented from the inner region to the outer region; absent at the root
    pub inner_to_outer_edge: Option<CompressedEdge>,
    pub parent: Option<AltTreeParent>,
    #[derivative(Debug = "ignore")]
    pub children: Vec<AltTreeNodePtr>,
}

pub type AltTreeNodePtr = ArcRwLock<AltTreeNode>;
pub type AltTreeNodeWeak = WeakRwLock<AltTreeNode>;

impl std::fmt::Debug for AltTreeNodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.read_recursive().fmt(f)
    }
}

impl std::fmt::Debug for AltTreeNodeWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upgrade_force().fmt(f)
    }
}

/// create a single-node tree holding a freshly created growing region
pub fn new_tree_root(outer_region: &RegionPtr) -> AltTreeNodePtr {
    let node = AltTreeNodePtr::new_value(AltTreeNode {
        inner_region: None,
        outer_region: outer_region.downgrade(),
        inner_to_outer_edge: None,
        parent: None,
        children: vec![],
    });
    outer_region.write().alt_tree_node = Some(node.clone());
    node
}

/// attach a matched pair to the tree as a new "−"/"+" node below `parent`
pub fn make_child(
    parent: &AltTreeNodePtr,
    inner_region: &RegionPtr,
    outer_region: &RegionPtr,
    inner_to_outer_edge: CompressedEdge,
    parent_edge: CompressedEdge,
) -> AltTreeNodePtr {
    let node = AltTreeNodePtr::new_value(AltTreeNode {
        inner_region: Some(inner_region.downgrade()),
        outer_region: outer_region.downgrade(),
        inner_to_outer_edge: Some(inner_to_outer_edge),
        parent: Some(AltTreeParent {
            node: parent.downgrade(),
            edge: parent_edge,
        }),
        children: vec![],
    });
    parent.write().children.push(node.clone());
    inner_region.write().alt_tree_node = Some(node.clone());
    outer_region.write().alt_tree_node = Some(node.clone());
    node
}

impl AltTreeNodePtr {
    pub fn find_root(&self) -> AltTreeNodePtr {
        let mut current = self.clone();
        loop {
            let parent = match &current.read_recursive().parent {
                Some(parent) => parent.node.upgrade_force(),
                None => break,
            };
            current = parent;
        }
        current
    }

    /// this node and all its ancestors, in order from this node to the root
    pub fn ancestors(&self) -> Vec<AltTreeNodePtr> {
        let mut chain = vec![self.clone()];
        loop {
            let parent = match &chain.last().unwrap().read_recursive().parent {
                Some(parent) => parent.node.upgrade_force(),
                None => break,
            };
            chain.push(parent);
        }
        chain
    }

    /// every node of the tree containing this node
    pub fn all_nodes_in_tree(&self) -> Vec<AltTreeNodePtr> {
        let root = self.find_root();
        let mut nodes = vec![];
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            pending.extend(node.read_recursive().children.iter().cloned());
            nodes.push(node);
        }
        nodes
    }

    /// invert the path from this node to the root so that this node becomes the
    /// root: each ancestor is re-hung below its former child, inheriting the
    /// child's inner region
    pub fn become_root(&self) {
        let parent = match self.read_recursive().parent.clone() {
            Some(parent) => parent,
            None => return,
        };
        let parent_ptr = parent.node.upgrade_force();
        parent_ptr.become_root();
        parent_ptr.write().children.retain(|child| child != self);
        let (inner_region, inner_to_outer_edge) = {
            let mut this = self.write();
            let inner_region = this.inner_region.take().expect("a non-root node always has an inner region");
            let inner_to_outer_edge = this
                .inner_to_outer_edge
                .take()
                .expect("a non-root node always has an inner-to-outer edge");
            this.parent = None;
            (inner_region, inner_to_outer_edge)
        };
        {
            let mut parent_node = parent_ptr.write();
            parent_node.inner_region = Some(inner_region.clone());
            parent_node.inner_to_outer_edge = Some(parent.edge);
            parent_node.parent = Some(AltTreeParent {
                node: self.downgrade(),
                edge: inner_to_outer_edge,
            });
        }
        inner_region.upgrade_force().write().alt_tree_node = Some(parent_ptr.clone());
        self.write().children.push(parent_ptr);
    }

    /// walk from this node up to (excluding) `common_ancestor`, detaching every
    /// visited node from the tree; returns the visited regions as an upward
    /// path of region edges (outer then inner per node, each edge pointing to
    /// the next region towards the ancestor) together with the orphaned
    /// subtrees that must be re-attached by the caller
    pub fn prune_upward_path_stopping_before(
        &self,
        common_ancestor: &AltTreeNodePtr,
    ) -> (Vec<RegionEdge>, Vec<AltTreeNodePtr>) {
        let mut path = vec![];
        let mut orphans = vec![];
        let mut current = self.clone();
        while current != *common_ancestor {
            let parent = current
                .read_recursive()
                .parent
                .clone()
                .expect("the common ancestor must be an ancestor of this node");
            let parent_ptr = parent.node.upgrade_force();
            {
                let mut node = current.write();
                let outer = node.outer_region.upgrade_force();
                let inner = node
                    .inner_region
                    .as_ref()
                    .expect("a non-root node always has an inner region")
                    .upgrade_force();
                let inner_to_outer_edge = node
                    .inner_to_outer_edge
                    .clone()
                    .expect("a non-root node always has an inner-to-outer edge");
                path.push(RegionEdge {
                    region: outer.clone(),
                    edge: inner_to_outer_edge.reversed(),
                });
                path.push(RegionEdge {
                    region: inner.clone(),
                    edge: parent.edge.clone(),
                });
                orphans.append(&mut node.children);
                outer.write().alt_tree_node = None;
                inner.write().alt_tree_node = None;
            }
            parent_ptr.write().children.retain(|child| child != &current);
            current = parent_ptr;
        }
        (path, orphans)
    }
}

/// the most recent common ancestor of two nodes of the same tree
pub fn common_ancestor(node_1: &AltTreeNodePtr, node_2: &AltTreeNodePtr) -> AltTreeNodePtr {
    let chain_1 = node_1.ancestors();
    let mut current = node_2.clone();
    loop {
        if chain_1.contains(&current) {
            return current;
        }
        let parent = current
            .read_recursive()
            .parent
            .as_ref()
            .expect("the two nodes must belong to the same tree")
            .node
            .upgrade_force();
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::tests::create_leaf_region_for_test;

    fn edge(from: usize, to: usize) -> CompressedEdge {
        CompressedEdge::new(from, Some(to), 0)
    }

    /// a chain root(0) -> (1-, 2+) -> (3-, 4+), where numbers are region indices
    fn build_chain() -> (Vec<RegionPtr>, Vec<AltTreeNodePtr>) {
        let regions: Vec<RegionPtr> = (0..5).map(create_leaf_region_for_test).collect();
        let root = new_tree_root(&regions[0]);
        let middle = make_child(&root, &regions[1], &regions[2], edge(1, 2), edge(1, 0));
        let bottom = make_child(&middle, &regions[3], &regions[4], edge(3, 4), edge(3, 2));
        (regions, vec![root, middle, bottom])
    }

    #[test]
    fn alternating_tree_find_root_and_ancestors() {
        // cargo test alternating_tree_find_root_and_ancestors -- --nocapture
        let (_regions, nodes) = build_chain();
        assert_eq!(nodes[2].find_root(), nodes[0]);
        assert_eq!(nodes[2].ancestors(), vec![nodes[2].clone(), nodes[1].clone(), nodes[0].clone()]);
        assert_eq!(nodes[2].all_nodes_in_tree().len(), 3);
        assert_eq!(common_ancestor(&nodes[2], &nodes[1]), nodes[1]);
        assert_eq!(common_ancestor(&nodes[2], &nodes[0]), nodes[0]);
    }

    #[test]
    fn alternating_tree_become_root() {
        // cargo test alternating_tree_become_root -- --nocapture
        let (regions, nodes) = build_chain();
        nodes[2].become_root();
        // the bottom node is now the root and kept its outer region
        assert!(nodes[2].read_recursive().parent.is_none());
        assert!(nodes[2].read_recursive().inner_region.is_none());
        assert_eq!(nodes[2].read_recursive().outer_region.upgrade_force(), regions[4]);
        assert_eq!(nodes[0].find_root(), nodes[2]);
        // the middle node inherited the bottom's inner region 3
        let middle = nodes[1].read_recursive();
        assert_eq!(middle.inner_region.as_ref().unwrap().upgrade_force(), regions[3]);
        assert_eq!(middle.outer_region.upgrade_force(), regions[2]);
        assert_eq!(middle.inner_to_outer_edge.as_ref().unwrap(), &edge(3, 2));
        assert_eq!(middle.parent.as_ref().unwrap().edge, edge(3, 4));
        // the old root inherited inner region 1 and hangs below the middle node
        let old_root = nodes[0].read_recursive();
        assert_eq!(old_root.inner_region.as_ref().unwrap().upgrade_force(), regions[1]);
        assert_eq!(old_root.inner_to_outer_edge.as_ref().unwrap(), &edge(1, 0));
        assert_eq!(old_root.parent.as_ref().unwrap().edge, edge(1, 2));
        // region back-links follow the inversion
        assert_eq!(regions[3].read_recursive().alt_tree_node.as_ref().unwrap(), &nodes[1]);
        assert_eq!(regions[1].read_recursive().alt_tree_node.as_ref().unwrap(), &nodes[0]);
    }

    #[test]
    fn alternating_tree_prune_upward_path() {
        // cargo test alternating_tree_prune_upward_path -- --nocapture
        let (regions, nodes) = build_chain();
        let (path, orphans) = nodes[2].prune_upward_path_stopping_before(&nodes[0]);
        assert!(orphans.is_empty());
        assert_eq!(path.len(), 4, "two nodes pruned, one outer and one inner each");
        assert_eq!(path[0].region, regions[4]);
        assert_eq!(path[0].edge, edge(4, 3));
        assert_eq!(path[1].region, regions[3]);
        assert_eq!(path[1].edge, edge(3, 2));
        assert_eq!(path[2].region, regions[2]);
        assert_eq!(path[2].edge, edge(2, 1));
        assert_eq!(path[3].region, regions[1]);
        assert_eq!(path[3].edge, edge(1, 0));
        assert!(nodes[0].read_recursive().children.is_empty());
        assert!(regions[1].read_recursive().alt_tree_node.is_none());
    }
}
