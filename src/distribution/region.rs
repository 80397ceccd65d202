//! Arena-backed partition tree.
//!
//! Nodes live in a `Vec` and reference each other by index. A merge frees the
//! slots of the removed children; freed slots are never handed out again, so
//! an index stays unambiguous for the lifetime of the tree.

use super::types::{InstanceId, RegionState, Traversal};
use crate::error::DistributionError;
use crate::geometry::Hyperrectangle;

use std::collections::{BTreeMap, HashMap};

pub type NodeIndex = usize;

/// Identifier of the root region.
pub const ROOT_REGION_ID: i64 = 0;

/// A single region of the key space.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionNode {
    pub region_id: i64,
    pub rectangle: Hyperrectangle,
    pub state: RegionState,
    pub replicas: Vec<InstanceId>,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    pub split_position: Option<f64>,
    pub depth: usize,
}

impl RegionNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_replica(&self, instance: &InstanceId) -> bool {
        self.replicas.contains(instance)
    }

    /// `<group>_<region id>`.
    pub fn identifier(&self, group: &str) -> String {
        format!("{}_{}", group, self.region_id)
    }
}

#[derive(Debug, Clone)]
pub struct PartitionTree {
    group: String,
    dimension: usize,
    nodes: Vec<Option<RegionNode>>,
    by_region_id: HashMap<i64, NodeIndex>,
    next_region_id: i64,
}

impl PartitionTree {
    /// Tree with a single root region covering the whole `dimension`-d space.
    pub fn new(
        group: impl Into<String>,
        dimension: usize,
        replicas: Vec<InstanceId>,
    ) -> Result<Self, DistributionError> {
        let rectangle = Hyperrectangle::full_covering(dimension)?;

        let root = RegionNode {
            region_id: ROOT_REGION_ID,
            rectangle,
            state: RegionState::Creating,
            replicas,
            parent: None,
            children: Vec::new(),
            split_position: None,
            depth: 0,
        };

        let mut by_region_id = HashMap::new();
        by_region_id.insert(ROOT_REGION_ID, 0);

        Ok(Self {
            group: group.into(),
            dimension,
            nodes: vec![Some(root)],
            by_region_id,
            next_region_id: ROOT_REGION_ID + 1,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn root(&self) -> Option<&RegionNode> {
        self.node(0)
    }

    pub fn node(&self, index: NodeIndex) -> Option<&RegionNode> {
        self.nodes.get(index).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, index: NodeIndex) -> Option<&mut RegionNode> {
        self.nodes.get_mut(index).and_then(|n| n.as_mut())
    }

    pub fn index_of(&self, region_id: i64) -> Option<NodeIndex> {
        self.by_region_id.get(&region_id).copied()
    }

    pub fn region(&self, region_id: i64) -> Option<&RegionNode> {
        self.index_of(region_id).and_then(|i| self.node(i))
    }

    fn region_index(&self, region_id: i64) -> Result<NodeIndex, DistributionError> {
        self.index_of(region_id)
            .ok_or(DistributionError::UnknownRegion(region_id))
    }

    pub fn parent(&self, region_id: i64) -> Option<&RegionNode> {
        self.region(region_id)
            .and_then(|n| n.parent)
            .and_then(|p| self.node(p))
    }

    pub fn children(&self, region_id: i64) -> Vec<&RegionNode> {
        self.region(region_id)
            .map(|n| n.children.iter().filter_map(|&c| self.node(c)).collect())
            .unwrap_or_default()
    }

    /// Dimensions are cycled with the tree depth.
    pub fn split_dimension(&self, region_id: i64) -> Result<usize, DistributionError> {
        let node = self.region(region_id).ok_or(DistributionError::UnknownRegion(region_id))?;
        Ok(node.depth % self.dimension)
    }

    /// Splits the leaf `region_id` at `position` along its split dimension.
    ///
    /// The left child includes the split point, the right child excludes it.
    /// Both children start in `Creating` and inherit the parent's replicas;
    /// the parent moves to `Splitting`. Returns the child region ids.
    pub fn split(&mut self, region_id: i64, position: f64) -> Result<(i64, i64), DistributionError> {
        let index = self.region_index(region_id)?;
        let dimension = self.split_dimension(region_id)?;

        let (left_rect, right_rect, replicas, depth) = {
            let node = self.node(index).ok_or(DistributionError::UnknownRegion(region_id))?;

            if !node.is_leaf() {
                return Err(DistributionError::NotALeaf(region_id));
            }

            let left = node.rectangle.split_and_get_left(position, dimension, true)?;
            let right = node.rectangle.split_and_get_right(position, dimension, false)?;
            (left, right, node.replicas.clone(), node.depth)
        };

        let left_id = self.push_child(index, left_rect, replicas.clone(), depth + 1);
        let right_id = self.push_child(index, right_rect, replicas, depth + 1);

        if let Some(node) = self.node_mut(index) {
            node.split_position = Some(position);
            node.state = RegionState::Splitting;
        }

        Ok((left_id, right_id))
    }

    fn push_child(
        &mut self,
        parent: NodeIndex,
        rectangle: Hyperrectangle,
        replicas: Vec<InstanceId>,
        depth: usize,
    ) -> i64 {
        let region_id = self.next_region_id;
        self.next_region_id += 1;

        let index = self.nodes.len();
        self.nodes.push(Some(RegionNode {
            region_id,
            rectangle,
            state: RegionState::Creating,
            replicas,
            parent: Some(parent),
            children: Vec::new(),
            split_position: None,
            depth,
        }));
        self.by_region_id.insert(region_id, index);

        if let Some(node) = self.node_mut(parent) {
            node.children.push(index);
        }

        region_id
    }

    /// Removes both children of `region_id` and turns it back into an
    /// `Active` leaf. The children must be leaves. Returns the removed ids.
    pub fn merge(&mut self, region_id: i64) -> Result<Vec<i64>, DistributionError> {
        let index = self.region_index(region_id)?;

        let child_indexes = self
            .node(index)
            .map(|n| n.children.clone())
            .unwrap_or_default();

        if child_indexes.is_empty() {
            return Err(DistributionError::NoChildren(region_id));
        }

        for &child in &child_indexes {
            if let Some(node) = self.node(child)
                && !node.is_leaf()
            {
                return Err(DistributionError::InvalidState {
                    region: region_id,
                    reason: format!("child {} is not a leaf", node.region_id),
                });
            }
        }

        let mut removed = Vec::with_capacity(child_indexes.len());
        for child in child_indexes {
            if let Some(node) = self.nodes[child].take() {
                self.by_region_id.remove(&node.region_id);
                removed.push(node.region_id);
            }
        }

        if let Some(node) = self.node_mut(index) {
            node.children.clear();
            node.split_position = None;
            node.state = RegionState::Active;
        }

        Ok(removed)
    }

    pub fn set_state(&mut self, region_id: i64, state: RegionState) -> Result<(), DistributionError> {
        let index = self.region_index(region_id)?;
        if let Some(node) = self.node_mut(index) {
            node.state = state;
        }
        Ok(())
    }

    pub fn set_replicas(
        &mut self,
        region_id: i64,
        replicas: Vec<InstanceId>,
    ) -> Result<(), DistributionError> {
        let index = self.region_index(region_id)?;
        if let Some(node) = self.node_mut(index) {
            node.replicas = replicas;
        }
        Ok(())
    }

    /// Depth-first pre-order walk from the root until `visit` says stop.
    pub fn traverse<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a RegionNode) -> Traversal,
    {
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let Some(node) = self.node(index) else {
                continue;
            };

            if visit(node) == Traversal::Stop {
                return;
            }

            // Reverse so the left child is visited first
            stack.extend(node.children.iter().rev());
        }
    }

    pub fn all_regions(&self) -> Vec<&RegionNode> {
        let mut regions = Vec::new();
        self.traverse(|node| {
            regions.push(node);
            Traversal::Continue
        });
        regions
    }

    pub fn leaves(&self) -> Vec<&RegionNode> {
        self.all_regions().into_iter().filter(|n| n.is_leaf()).collect()
    }

    /// Regions overlapping `rectangle` whose state passes `predicate`, keyed
    /// by replica. Subtrees not intersecting the rectangle are pruned.
    pub fn regions_for_box<P>(
        &self,
        rectangle: &Hyperrectangle,
        predicate: P,
    ) -> BTreeMap<InstanceId, Vec<i64>>
    where
        P: Fn(RegionState) -> bool,
    {
        let mut result: BTreeMap<InstanceId, Vec<i64>> = BTreeMap::new();
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let Some(node) = self.node(index) else {
                continue;
            };

            if !node.rectangle.intersects(rectangle) {
                continue;
            }

            if predicate(node.state) {
                for replica in &node.replicas {
                    result.entry(replica.clone()).or_default().push(node.region_id);
                }
            }

            stack.extend(node.children.iter().rev());
        }

        for ids in result.values_mut() {
            ids.sort_unstable();
        }

        result
    }

    /// The highest region id handed out so far.
    pub fn highest_region_id(&self) -> i64 {
        self.next_region_id - 1
    }
}
