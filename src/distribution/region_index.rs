use crate::geometry::Hyperrectangle;
use crate::storage::types::TupleStoreName;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default timeout of the mapping waits.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const EMPTY_RESULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Flat `region id -> rectangle` index of the regions stored on this node.
///
/// Rebuilt by the space partitioner whenever the tree changes. Readers go
/// through the concurrent map; waiters park on the generation counter, which
/// writers bump after every change.
pub struct RegionIndex {
    entries: DashMap<i64, Hyperrectangle>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Returns false if the region was already mapped.
    pub fn add_mapping(&self, region_id: i64, rectangle: Hyperrectangle) -> bool {
        if self.entries.contains_key(&region_id) {
            return false;
        }

        self.entries.insert(region_id, rectangle);
        debug!("Region {} added to the local index", region_id);
        self.notify();
        true
    }

    pub fn remove_mapping(&self, region_id: i64) -> bool {
        let removed = self.entries.remove(&region_id).is_some();
        if removed {
            debug!("Region {} removed from the local index", region_id);
            self.notify();
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.notify();
    }

    /// Swaps the whole content for a fresh snapshot.
    pub fn replace_all(&self, mappings: Vec<(i64, Hyperrectangle)>) {
        let keep: Vec<i64> = mappings.iter().map(|(id, _)| *id).collect();
        self.entries.retain(|id, _| keep.contains(id));

        for (region_id, rectangle) in mappings {
            self.entries.insert(region_id, rectangle);
        }

        self.notify();
    }

    fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.changed.notify_all();
    }

    /// Ids of all regions overlapping `rectangle`, ascending.
    pub fn region_ids_for(&self, rectangle: &Hyperrectangle) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .entries
            .iter()
            .filter(|entry| entry.value().intersects(rectangle))
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn all_region_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn rectangle_of(&self, region_id: i64) -> Option<Hyperrectangle> {
        self.entries.get(&region_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local table names of `table` for all regions overlapping `rectangle`.
    ///
    /// Right after a split the new regions may not be indexed yet, so an
    /// empty result is retried up to `retries` times.
    pub fn local_tables_for_region(
        &self,
        rectangle: &Hyperrectangle,
        table: &TupleStoreName,
        retries: usize,
    ) -> Vec<TupleStoreName> {
        for attempt in 0..=retries {
            let names: Vec<TupleStoreName> = self
                .region_ids_for(rectangle)
                .into_iter()
                .map(|id| table.clone_with_region_id(id))
                .collect();

            if !names.is_empty() {
                return names;
            }

            if attempt < retries {
                std::thread::sleep(EMPTY_RESULT_RETRY_DELAY);
            }
        }

        warn!("No local regions found for {} in {}", table, rectangle);
        Vec::new()
    }

    pub fn wait_until_mapping_appears(&self, region_id: i64, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.entries.contains_key(&region_id))
    }

    pub fn wait_until_mapping_disappears(&self, region_id: i64, timeout: Duration) -> bool {
        self.wait_until(timeout, || !self.entries.contains_key(&region_id))
    }

    fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();

        loop {
            if condition() {
                return true;
            }

            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                return condition();
            }
        }
    }
}
