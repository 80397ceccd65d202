use super::instances::TupleStoreInstances;
use super::tuple_store::ReadOnlyTupleStore;
use crate::error::StorageError;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Every readable unit of an engine, acquired as one snapshot.
///
/// Dropping the value releases all units, so acquires and releases stay
/// balanced on every path.
pub struct AcquiredTupleStores {
    stores: Vec<Arc<dyn ReadOnlyTupleStore>>,
}

impl AcquiredTupleStores {
    /// Acquires all current units. If one of them is already being torn down
    /// the partial set is released and the snapshot is retried, since a flush
    /// or compaction changed the unit list in the meantime.
    pub fn acquire(
        instances: &TupleStoreInstances,
        retries: usize,
        delay: Duration,
    ) -> Result<Self, StorageError> {
        for attempt in 0..retries.max(1) {
            let candidates = instances.all_tuple_stores();
            let mut acquired = Vec::with_capacity(candidates.len());
            let mut complete = true;

            for store in candidates {
                if store.acquire() {
                    acquired.push(store);
                } else {
                    complete = false;
                    break;
                }
            }

            if complete {
                return Ok(Self { stores: acquired });
            }

            for store in &acquired {
                store.release();
            }

            debug!("Unable to acquire all tuple stores, attempt {}", attempt + 1);
            std::thread::sleep(delay);
        }

        Err(StorageError::AcquireExhausted(retries))
    }

    pub fn stores(&self) -> &[Arc<dyn ReadOnlyTupleStore>] {
        &self.stores
    }
}

impl Drop for AcquiredTupleStores {
    fn drop(&mut self) {
        for store in &self.stores {
            store.release();
        }
    }
}
