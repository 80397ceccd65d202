use super::tuple_store::{ReadOnlyTupleStore, UsageCounter};
use super::types::{Tuple, now_ms};
use super::wal::WriteAheadLog;
use crate::error::StorageError;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// The writable in-memory table of an engine.
///
/// Append-only; bounded by entry count and accounted bytes. Once rotated out
/// it stays readable until its segment replaces it.
pub struct Memtable {
    table_number: u64,
    entries: RwLock<Vec<Tuple>>,
    size_bytes: AtomicUsize,
    max_entries: usize,
    max_size: usize,
    created: u64,
    oldest_version: AtomicU64,
    newest_version: AtomicU64,
    usage: UsageCounter,
    cleared: AtomicBool,
    wal: Mutex<Option<WriteAheadLog>>,
}

impl Memtable {
    pub fn new(
        table_number: u64,
        max_entries: usize,
        max_size: usize,
        wal: Option<WriteAheadLog>,
    ) -> Self {
        Self {
            table_number,
            entries: RwLock::new(Vec::with_capacity(max_entries.min(4096))),
            size_bytes: AtomicUsize::new(0),
            max_entries,
            max_size,
            created: now_ms(),
            oldest_version: AtomicU64::new(u64::MAX),
            newest_version: AtomicU64::new(0),
            usage: UsageCounter::default(),
            cleared: AtomicBool::new(false),
            wal: Mutex::new(wal),
        }
    }

    pub fn table_number(&self) -> u64 {
        self.table_number
    }

    pub fn created_timestamp(&self) -> u64 {
        self.created
    }

    pub fn is_full(&self) -> bool {
        self.size_bytes.load(Ordering::Acquire) >= self.max_size
            || self.entries.read().len() + 1 > self.max_entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn put(&self, tuple: Tuple) -> Result<(), StorageError> {
        debug_assert!(self.usage.usage() > 0, "put on an unacquired memtable");

        let mut entries = self.entries.write();

        if entries.len() >= self.max_entries {
            return Err(StorageError::Failed(format!(
                "memtable {} is full ({} entries)",
                self.table_number, self.max_entries
            )));
        }

        if let Some(wal) = self.wal.lock().as_mut() {
            wal.append(&tuple)?;
        }

        self.size_bytes.fetch_add(tuple.size(), Ordering::AcqRel);
        self.oldest_version
            .fetch_min(tuple.version_timestamp, Ordering::AcqRel);
        self.newest_version
            .fetch_max(tuple.version_timestamp, Ordering::AcqRel);

        entries.push(tuple);
        Ok(())
    }

    pub fn delete(&self, key: &str, timestamp: u64) -> Result<(), StorageError> {
        self.put(Tuple::tombstone(key, timestamp))
    }

    /// Entries ordered by key, then by version.
    pub fn sorted_tuples(&self) -> Vec<Tuple> {
        let mut tuples = self.entries.read().clone();
        tuples.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.version_timestamp.cmp(&b.version_timestamp))
        });
        tuples
    }

    fn clear(&self) {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("Clearing memtable {}", self.table_number);
        self.entries.write().clear();

        if let Some(wal) = self.wal.lock().take()
            && let Err(e) = wal.delete()
        {
            warn!("Unable to delete write-ahead log of memtable {}: {}", self.table_number, e);
        }
    }
}

impl ReadOnlyTupleStore for Memtable {
    fn name(&self) -> String {
        format!("memtable_{}", self.table_number)
    }

    fn get(&self, key: &str) -> Vec<Tuple> {
        self.entries
            .read()
            .iter()
            .filter(|t| t.key == key)
            .cloned()
            .collect()
    }

    fn all_tuples(&self) -> Vec<Tuple> {
        self.entries.read().clone()
    }

    fn number_of_tuples(&self) -> usize {
        self.entries.read().len()
    }

    fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Acquire)
    }

    fn oldest_version(&self) -> u64 {
        self.oldest_version.load(Ordering::Acquire)
    }

    fn newest_version(&self) -> u64 {
        self.newest_version.load(Ordering::Acquire)
    }

    fn acquire(&self) -> bool {
        self.usage.acquire()
    }

    fn release(&self) {
        if self.usage.release() {
            self.clear();
        }
    }

    fn usage_count(&self) -> i32 {
        self.usage.usage()
    }

    fn delete_on_close(&self) {
        if self.usage.delete_on_close() {
            self.clear();
        }
    }
}
