use super::types::Tuple;
use crate::geometry::Hyperrectangle;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// A readable unit: the memtable, an unflushed memtable or a segment.
///
/// Units are reference counted through `acquire`/`release`. After
/// `delete_on_close` no new reference is handed out and the unit releases
/// its resources once the last holder lets go.
pub trait ReadOnlyTupleStore: Send + Sync {
    fn name(&self) -> String;

    /// All versions of `key` held by this unit, tombstones included.
    fn get(&self, key: &str) -> Vec<Tuple>;

    fn all_tuples(&self) -> Vec<Tuple>;

    fn inserted_since(&self, timestamp: u64) -> Vec<Tuple> {
        self.all_tuples()
            .into_iter()
            .filter(|t| t.received_timestamp >= timestamp)
            .collect()
    }

    fn overlapping(&self, rectangle: &Hyperrectangle) -> Vec<Tuple> {
        self.all_tuples()
            .into_iter()
            .filter(|t| t.bounding_box.intersects(rectangle))
            .collect()
    }

    fn number_of_tuples(&self) -> usize;

    fn size(&self) -> usize;

    fn oldest_version(&self) -> u64;

    fn newest_version(&self) -> u64;

    fn acquire(&self) -> bool;

    fn release(&self);

    fn usage_count(&self) -> i32;

    fn delete_on_close(&self);
}

/// Reference counter with deferred deletion.
#[derive(Debug, Default)]
pub struct UsageCounter {
    usage: AtomicI32,
    pending_delete: AtomicBool,
}

impl UsageCounter {
    /// Fails once deletion is pending.
    pub fn acquire(&self) -> bool {
        if self.pending_delete.load(Ordering::Acquire) {
            return false;
        }

        self.usage.fetch_add(1, Ordering::AcqRel);

        // Deletion may have been requested between the check and the increment
        if self.pending_delete.load(Ordering::Acquire) {
            self.usage.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        true
    }

    /// Returns true if the caller dropped the last reference of a unit that
    /// is pending deletion.
    pub fn release(&self) -> bool {
        let remaining = self.usage.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(remaining >= 0, "release without acquire");
        remaining <= 0 && self.pending_delete.load(Ordering::Acquire)
    }

    /// Returns true if the unit is unused and can be closed right away.
    pub fn delete_on_close(&self) -> bool {
        self.pending_delete.store(true, Ordering::Release);
        self.usage.load(Ordering::Acquire) <= 0
    }

    pub fn usage(&self) -> i32 {
        self.usage.load(Ordering::Acquire)
    }

    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete.load(Ordering::Acquire)
    }
}
