use super::memtable::Memtable;
use super::segment::Segment;
use super::tuple_store::ReadOnlyTupleStore;
use super::types::EngineMode;
use crate::error::StorageError;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::debug;

struct Inner {
    memtable: Option<Arc<Memtable>>,
    unflushed: Vec<Arc<Memtable>>,
    segments: Vec<Arc<Segment>>,
    mode: EngineMode,
}

/// The readable units of one engine: the active memtable, memtables waiting
/// for their flush, and flushed segments (oldest first).
///
/// One monitor per engine guards the lists; waiters for flushes park on its
/// condition variable.
pub struct TupleStoreInstances {
    inner: Mutex<Inner>,
    flushed: Condvar,
}

impl Default for TupleStoreInstances {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleStoreInstances {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                memtable: None,
                unflushed: Vec::new(),
                segments: Vec::new(),
                mode: EngineMode::ReadOnly,
            }),
            flushed: Condvar::new(),
        }
    }

    pub fn memtable(&self) -> Option<Arc<Memtable>> {
        self.inner.lock().memtable.clone()
    }

    /// Installs `memtable` as the writable table. The previous one, if any,
    /// moves to the unflushed list and is returned.
    pub fn activate_new_memtable(&self, memtable: Arc<Memtable>) -> Option<Arc<Memtable>> {
        let mut inner = self.inner.lock();
        let old = inner.memtable.replace(memtable);

        if let Some(old) = &old {
            inner.unflushed.push(old.clone());
        }

        old
    }

    /// Moves the writable memtable to the unflushed list without a
    /// replacement. Used when the engine stops.
    pub fn retire_memtable(&self) -> Option<Arc<Memtable>> {
        let mut inner = self.inner.lock();
        let old = inner.memtable.take();

        if let Some(old) = &old {
            inner.unflushed.push(old.clone());
        }

        old
    }

    /// Swaps a flushed memtable for its segment. An empty memtable has no
    /// segment. Wakes all flush waiters after the lists are updated.
    pub fn replace_memtable_with_segment(&self, memtable: &Arc<Memtable>, segment: Option<Arc<Segment>>) {
        let mut inner = self.inner.lock();

        if let Some(segment) = segment {
            inner.segments.push(segment);
        }

        inner.unflushed.retain(|m| !Arc::ptr_eq(m, memtable));
        debug!(
            "Memtable {} replaced, {} unflushed remaining",
            memtable.table_number(),
            inner.unflushed.len()
        );

        self.flushed.notify_all();
    }

    pub fn add_segment(&self, segment: Arc<Segment>) {
        let mut inner = self.inner.lock();
        inner.segments.push(segment);
        inner.segments.sort_by_key(|s| s.table_number());
    }

    /// Atomically replaces `old` segments with `new` ones.
    pub fn replace_compacted_segments(
        &self,
        new: Vec<Arc<Segment>>,
        old: &[Arc<Segment>],
    ) -> Result<(), StorageError> {
        if old.is_empty() {
            return Err(StorageError::Failed(
                "compaction result without input segments".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        for segment in old {
            if !inner.segments.iter().any(|s| Arc::ptr_eq(s, segment)) {
                return Err(StorageError::Failed(format!(
                    "compacted segment {} is not registered",
                    segment.table_number()
                )));
            }
        }

        for segment in &new {
            if inner.segments.iter().any(|s| Arc::ptr_eq(s, segment)) {
                return Err(StorageError::Failed(format!(
                    "segment {} is already registered",
                    segment.table_number()
                )));
            }
        }

        inner
            .segments
            .retain(|s| !old.iter().any(|o| Arc::ptr_eq(s, o)));
        inner.segments.extend(new);
        inner.segments.sort_by_key(|s| s.table_number());

        Ok(())
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.inner.lock().segments.clone()
    }

    pub fn unflushed_count(&self) -> usize {
        self.inner.lock().unflushed.len()
    }

    /// All readable units, oldest data first.
    pub fn all_tuple_stores(&self) -> Vec<Arc<dyn ReadOnlyTupleStore>> {
        let inner = self.inner.lock();
        let mut stores: Vec<Arc<dyn ReadOnlyTupleStore>> =
            Vec::with_capacity(inner.segments.len() + inner.unflushed.len() + 1);

        for segment in &inner.segments {
            stores.push(segment.clone());
        }
        for memtable in &inner.unflushed {
            stores.push(memtable.clone());
        }
        if let Some(memtable) = &inner.memtable {
            stores.push(memtable.clone());
        }

        stores
    }

    /// Blocks until `memtable` has left the unflushed list.
    pub fn wait_for_memtable_flush(&self, memtable: &Arc<Memtable>) {
        let mut inner = self.inner.lock();
        while inner.unflushed.iter().any(|m| Arc::ptr_eq(m, memtable)) {
            self.flushed.wait(&mut inner);
        }
    }

    pub fn wait_for_all_flushed(&self) {
        let mut inner = self.inner.lock();
        while !inner.unflushed.is_empty() {
            self.flushed.wait(&mut inner);
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.inner.lock().mode
    }

    pub fn set_read_only(&self) {
        self.inner.lock().mode = EngineMode::ReadOnly;
    }

    pub fn set_read_write(&self) {
        self.inner.lock().mode = EngineMode::ReadWrite;
    }

    /// Forgets every unit and wakes all waiters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.memtable = None;
        inner.unflushed.clear();
        inner.segments.clear();
        self.flushed.notify_all();
    }
}
