use super::coordination::{CoordinationService, group_path};
use super::region::{PartitionTree, RegionNode};
use super::region_index::RegionIndex;
use super::types::{InstanceId, RegionEvent, RegionState, Traversal};
use crate::error::DistributionError;
use crate::geometry::Hyperrectangle;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub type RegionCallback = Arc<dyn Fn(&RegionEvent) + Send + Sync>;

/// Owns the partition tree of one distribution group.
///
/// Every structural change bumps the group version in the coordination
/// service, rebuilds the local region index and notifies the registered
/// callbacks. Callbacks run after the tree lock is released.
pub struct SpacePartitioner {
    group: String,
    local: InstanceId,
    tree: RwLock<PartitionTree>,
    region_index: Arc<RegionIndex>,
    callbacks: RwLock<Vec<(u64, RegionCallback)>>,
    next_callback_id: AtomicU64,
    coordinator: Arc<dyn CoordinationService>,
}

impl SpacePartitioner {
    /// Creates the group with an `Active` root region replicated on `replicas`.
    pub fn new(
        group: &str,
        dimension: usize,
        replicas: Vec<InstanceId>,
        local: InstanceId,
        coordinator: Arc<dyn CoordinationService>,
    ) -> Result<Arc<Self>, DistributionError> {
        let mut tree = PartitionTree::new(group, dimension, replicas)?;
        tree.set_state(super::region::ROOT_REGION_ID, RegionState::Active)?;

        coordinator.set_state(&group_path(group), &format!("dimensions={}", dimension))?;

        let partitioner = Arc::new(Self {
            group: group.to_string(),
            local,
            tree: RwLock::new(tree),
            region_index: Arc::new(RegionIndex::new()),
            callbacks: RwLock::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            coordinator,
        });

        partitioner.rebuild_region_index();
        info!("Distribution group {} created ({} dimensions)", group, dimension);

        Ok(partitioner)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn local_instance(&self) -> &InstanceId {
        &self.local
    }

    pub fn region_index(&self) -> Arc<RegionIndex> {
        self.region_index.clone()
    }

    pub fn coordinator(&self) -> Arc<dyn CoordinationService> {
        self.coordinator.clone()
    }

    pub fn dimension(&self) -> usize {
        self.tree.read().dimension()
    }

    /// Runs `f` against a read-locked tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&PartitionTree) -> R) -> R {
        f(&self.tree.read())
    }

    /// Snapshot of a region.
    pub fn region(&self, region_id: i64) -> Option<RegionNode> {
        self.tree.read().region(region_id).cloned()
    }

    pub fn regions_for_box<P>(
        &self,
        rectangle: &Hyperrectangle,
        predicate: P,
    ) -> BTreeMap<InstanceId, Vec<i64>>
    where
        P: Fn(RegionState) -> bool,
    {
        self.tree.read().regions_for_box(rectangle, predicate)
    }

    /// Region ids on this node that accept writes for `rectangle`.
    pub fn local_write_regions(&self, rectangle: &Hyperrectangle) -> Vec<i64> {
        self.regions_for_box(rectangle, |state| state.is_writable())
            .remove(&self.local)
            .unwrap_or_default()
    }

    pub fn register_callback(&self, callback: RegionCallback) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, callback));
        id
    }

    pub fn unregister_callback(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(callback_id, _)| *callback_id != id);
        callbacks.len() != before
    }

    /// Starts a split of `region_id`: the region moves to `Splitting` and two
    /// `Creating` children are installed.
    pub fn split_region(&self, region_id: i64, position: f64) -> Result<(i64, i64), DistributionError> {
        let (left, right) = {
            let mut tree = self.tree.write();
            tree.split(region_id, position)?
        };

        info!(
            "Region {} of {} split at {} into {} and {}",
            region_id, self.group, position, left, right
        );

        self.after_change(vec![
            RegionEvent::Changed {
                region_id,
                state: RegionState::Splitting,
            },
            RegionEvent::Added { region_id: left },
            RegionEvent::Added { region_id: right },
        ])?;

        Ok((left, right))
    }

    /// Finishes a split: the children become `Active`, the parent `Split`.
    pub fn complete_split(&self, region_id: i64) -> Result<(), DistributionError> {
        let children = {
            let mut tree = self.tree.write();
            let node = tree
                .region(region_id)
                .ok_or(DistributionError::UnknownRegion(region_id))?;

            if node.state != RegionState::Splitting {
                return Err(DistributionError::InvalidState {
                    region: region_id,
                    reason: format!("expected splitting, found {}", node.state),
                });
            }

            let children: Vec<i64> = tree.children(region_id).iter().map(|c| c.region_id).collect();
            for &child in &children {
                tree.set_state(child, RegionState::Active)?;
            }
            tree.set_state(region_id, RegionState::Split)?;
            children
        };

        let mut events: Vec<RegionEvent> = children
            .into_iter()
            .map(|child| RegionEvent::Changed {
                region_id: child,
                state: RegionState::Active,
            })
            .collect();
        events.push(RegionEvent::Changed {
            region_id,
            state: RegionState::Split,
        });

        self.after_change(events)
    }

    /// Marks `region_id` as `Merging`; its children keep serving reads.
    pub fn prepare_merge(&self, region_id: i64) -> Result<(), DistributionError> {
        {
            let mut tree = self.tree.write();
            if tree.children(region_id).is_empty() {
                return Err(DistributionError::NoChildren(region_id));
            }
            tree.set_state(region_id, RegionState::Merging)?;
        }

        self.after_change(vec![RegionEvent::Changed {
            region_id,
            state: RegionState::Merging,
        }])
    }

    /// Drops the children of `region_id`; the region becomes an `Active` leaf.
    pub fn merge_region(&self, region_id: i64) -> Result<Vec<i64>, DistributionError> {
        let removed = {
            let mut tree = self.tree.write();
            tree.merge(region_id)?
        };

        info!("Regions {:?} of {} merged into {}", removed, self.group, region_id);

        let mut events: Vec<RegionEvent> = removed
            .iter()
            .map(|&child| RegionEvent::Removed { region_id: child })
            .collect();
        events.push(RegionEvent::Changed {
            region_id,
            state: RegionState::Active,
        });

        self.after_change(events)?;
        Ok(removed)
    }

    pub fn set_region_state(&self, region_id: i64, state: RegionState) -> Result<(), DistributionError> {
        self.tree.write().set_state(region_id, state)?;
        self.after_change(vec![RegionEvent::Changed { region_id, state }])
    }

    fn after_change(&self, events: Vec<RegionEvent>) -> Result<(), DistributionError> {
        let path = group_path(&self.group);
        let value = self.coordinator.get_state(&path)?.unwrap_or_default();
        self.coordinator.set_state(&path, &value)?;

        self.rebuild_region_index();

        let callbacks: Vec<RegionCallback> =
            self.callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();

        for event in &events {
            for callback in &callbacks {
                callback(event);
            }
        }

        Ok(())
    }

    /// Re-indexes all readable regions replicated on this node.
    pub fn rebuild_region_index(&self) {
        let mut mappings = Vec::new();

        self.tree.read().traverse(|node| {
            if node.state.is_readable() && node.is_replica(&self.local) {
                mappings.push((node.region_id, node.rectangle.clone()));
            }
            Traversal::Continue
        });

        if mappings.is_empty() {
            debug!("No readable regions of {} on {}", self.group, self.local);
        }

        self.region_index.replace_all(mappings);
    }
}
