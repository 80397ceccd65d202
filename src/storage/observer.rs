//! Deletes local table data once its region has split or was merged away.

use super::registry::EngineRegistry;
use super::types::TupleStoreName;
use crate::distribution::{RegionEvent, RegionState, SpacePartitioner};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct RegionObserver {
    registry: Arc<EngineRegistry>,
    observed_groups: Mutex<HashSet<String>>,
}

impl RegionObserver {
    pub fn new(registry: Arc<EngineRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            observed_groups: Mutex::new(HashSet::new()),
        })
    }

    /// Starts watching the group of `name`. Tables without a region id are
    /// not distributed and are ignored. Each group is watched once.
    pub fn register_table(&self, name: &TupleStoreName, partitioner: &SpacePartitioner) {
        if name.region_id().is_none() {
            return;
        }

        let mut observed = self.observed_groups.lock();
        if !observed.insert(name.group().to_string()) {
            return;
        }

        let registry = self.registry.clone();
        let group = name.group().to_string();
        partitioner.register_callback(Arc::new(move |event| {
            handle_event(&registry, &group, event);
        }));

        debug!("Observing regions of group {}", name.group());
    }

    pub fn is_observing(&self, group: &str) -> bool {
        self.observed_groups.lock().contains(group)
    }
}

fn handle_event(registry: &EngineRegistry, group: &str, event: &RegionEvent) {
    let region_id = event.region_id();

    let reason = match event {
        RegionEvent::Removed { .. } => "merged",
        RegionEvent::Changed {
            state: RegionState::Split,
            ..
        } => "split",
        _ => return,
    };

    info!("Region {} of {} has {}, deleting local data", region_id, group, reason);

    if let Err(e) = registry.delete_data_of_region(group, region_id, false) {
        error!("Unable to delete data of region {} in {}: {}", region_id, group, e);
    }
}
