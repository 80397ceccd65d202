//! Storage engine of one table partition.
//!
//! ## Lifecycle
//! `init` opens the flushed segments, replays leftover write-ahead logs and
//! moves the engine to `RUNNING`. Any unrecoverable error moves it to
//! `FAILED`, which makes it read-only and drops every readable unit.
//!
//! ## Writes
//! Puts and deletes run under one engine-wide mutex: rotate the memtable if it
//! is full, then append. The rotated memtable stays readable until the disk
//! worker swaps it for its segment.

use super::acquirer::AcquiredTupleStores;
use super::disk::DiskStorage;
use super::duplicate::{DuplicateResolver, resolver_for};
use super::memtable::Memtable;
use super::segment::Segment;
use super::instances::TupleStoreInstances;
use super::service_state::{ServiceState, State};
use super::tuple_store::ReadOnlyTupleStore;
use super::types::{EngineMode, Tuple, TupleStoreConfig, TupleStoreName};
use super::wal::WriteAheadLog;
use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::geometry::Hyperrectangle;

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

pub type InsertCallback = Arc<dyn Fn(&Tuple) + Send + Sync>;

pub struct StorageEngine {
    name: TupleStoreName,
    directory: PathBuf,
    config: TupleStoreConfig,
    store_config: Arc<StoreConfig>,
    storage: Arc<DiskStorage>,
    instances: TupleStoreInstances,
    state: ServiceState,
    write_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    next_table_number: AtomicU64,
    resolver: Box<dyn DuplicateResolver>,
    insert_callbacks: RwLock<Vec<InsertCallback>>,
    weak_self: Weak<StorageEngine>,
}

impl StorageEngine {
    pub fn new(
        name: TupleStoreName,
        config: TupleStoreConfig,
        store_config: Arc<StoreConfig>,
        storage: Arc<DiskStorage>,
    ) -> Arc<Self> {
        let directory = storage.table_dir(&name);
        let resolver = resolver_for(&config);

        Arc::new_cyclic(|me: &Weak<StorageEngine>| {
            let state = ServiceState::new();

            let weak = me.clone();
            state.register_callback(Arc::new(move |state| {
                if state == State::Failed
                    && let Some(engine) = weak.upgrade()
                {
                    engine.close_resources();
                }
            }));

            Self {
                name,
                directory,
                config,
                store_config,
                storage,
                instances: TupleStoreInstances::new(),
                state,
                write_lock: Mutex::new(()),
                compaction_lock: Mutex::new(()),
                next_table_number: AtomicU64::new(0),
                resolver,
                insert_callbacks: RwLock::new(Vec::new()),
                weak_self: me.clone(),
            }
        })
    }

    pub fn name(&self) -> &TupleStoreName {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &TupleStoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<DiskStorage> {
        &self.storage
    }

    pub fn instances(&self) -> &TupleStoreInstances {
        &self.instances
    }

    pub fn state(&self) -> State {
        self.state.state()
    }

    pub fn service_state(&self) -> &ServiceState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn mode(&self) -> EngineMode {
        self.instances.mode()
    }

    pub fn set_read_only(&self) {
        info!("Engine {} is now read-only", self.name);
        self.instances.set_read_only();
    }

    pub fn set_read_write(&self) {
        info!("Engine {} is now read-write", self.name);
        self.instances.set_read_write();
    }

    /// Held for the whole of one compaction run.
    pub(crate) fn lock_compaction(&self) -> MutexGuard<'_, ()> {
        self.compaction_lock.lock()
    }

    fn next_table_number(&self) -> u64 {
        self.next_table_number.fetch_add(1, Ordering::AcqRel)
    }

    /// Opens the engine. A finished engine may be opened again.
    pub fn init(&self) -> Result<(), StorageError> {
        if self.state.is_finished() {
            self.state.reset()?;
        }
        self.state.dispatch_to_starting()?;

        match self.open() {
            Ok(()) => {
                self.state.dispatch_to_running()?;
                info!("Engine {} is running", self.name);
                Ok(())
            }
            Err(e) => {
                self.fail(format!("init failed: {}", e));
                Err(e)
            }
        }
    }

    fn open(&self) -> Result<(), StorageError> {
        self.instances.clear();
        fs::create_dir_all(&self.directory)?;

        let segments = Segment::list(&self.directory)?;
        let logs = WriteAheadLog::list(&self.directory)?;

        let highest = segments
            .iter()
            .map(|(n, _)| *n)
            .chain(logs.iter().map(|(n, _)| *n))
            .max();
        self.next_table_number
            .store(highest.map_or(0, |n| n + 1), Ordering::Release);

        for (_, path) in &segments {
            let segment = Segment::open(path)?;
            debug!("Opened segment {} of {}", segment.table_number(), self.name);
            self.instances.add_segment(Arc::new(segment));
        }

        self.init_new_memtable()?;
        self.instances.set_read_write();

        self.replay_logs(&segments, logs)?;

        Ok(())
    }

    /// Re-inserts the content of write-ahead logs whose memtable never made
    /// it into a segment.
    fn replay_logs(
        &self,
        segments: &[(u64, PathBuf)],
        logs: Vec<(u64, PathBuf)>,
    ) -> Result<(), StorageError> {
        for (number, path) in logs {
            if segments.iter().any(|(s, _)| *s == number) {
                debug!("Log {} of {} already flushed", number, self.name);
            } else {
                let tuples = WriteAheadLog::replay(&path)?;
                info!("Replaying {} tuples of log {} into {}", tuples.len(), number, self.name);
                for tuple in tuples {
                    self.append(tuple)?;
                }
            }

            // The flushed memtable may remove its own log concurrently
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Flushes (if writable), releases all resources and terminates.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        if !self.state.is_running() {
            debug!("Engine {} not running ({}), nothing to shut down", self.name, self.state());
            return Ok(());
        }

        self.state.dispatch_to_stopping()?;
        info!("Shutting down engine {}", self.name);

        if self.mode() == EngineMode::ReadWrite {
            let retired = {
                let _guard = self.write_lock.lock();
                self.instances.retire_memtable()
            };
            if let Some(memtable) = retired {
                self.storage.schedule_flush(self.self_arc()?, memtable)?;
            }
            self.instances.wait_for_all_flushed();
        }

        self.close_resources();
        self.state.dispatch_to_terminated()
    }

    fn close_resources(&self) {
        self.instances.set_read_only();
        self.instances.clear();
    }

    /// Moves the engine to `FAILED`; its resources are released.
    pub fn fail(&self, reason: impl Into<String>) {
        self.state.dispatch_to_failed(reason);
    }

    /// Rotates the memtable and blocks until it is on disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        if !self.state.is_running() {
            return Err(self.not_running_error());
        }

        if let Some(old) = self.rotate_memtable()? {
            self.instances.wait_for_memtable_flush(&old);
        }

        if self.state() == State::Failed {
            return Err(StorageError::Failed(
                self.state.failure_reason().unwrap_or_default(),
            ));
        }

        Ok(())
    }

    fn rotate_memtable(&self) -> Result<Option<Arc<Memtable>>, StorageError> {
        let _guard = self.write_lock.lock();
        self.init_new_memtable()
    }

    /// Activates a fresh memtable and queues the previous one for flushing.
    /// The caller holds the write lock or is still initializing.
    fn init_new_memtable(&self) -> Result<Option<Arc<Memtable>>, StorageError> {
        let number = self.next_table_number();

        let wal = if self.store_config.write_ahead_log {
            Some(WriteAheadLog::create(&self.directory, number)?)
        } else {
            None
        };

        let memtable = Arc::new(Memtable::new(
            number,
            self.store_config.memtable_entries_max,
            self.store_config.memtable_size_max,
            wal,
        ));

        // Reference held while the memtable is active or waiting for its flush
        if !memtable.acquire() {
            return Err(StorageError::Failed("unable to acquire fresh memtable".to_string()));
        }

        let old = self.instances.activate_new_memtable(memtable);

        if let Some(old) = &old {
            let engine = self.self_arc()?;
            self.storage.schedule_flush(engine, old.clone())?;
        }

        Ok(old)
    }

    fn self_arc(&self) -> Result<Arc<StorageEngine>, StorageError> {
        self.weak_self
            .upgrade()
            .ok_or_else(|| StorageError::Failed("engine dropped".to_string()))
    }

    /// `Failed` for a broken engine, `Rejected` while it is not running yet
    /// or shutting down.
    pub(crate) fn not_running_error(&self) -> StorageError {
        match self.state() {
            State::Failed => StorageError::Failed(format!(
                "engine {} failed: {}",
                self.name,
                self.state.failure_reason().unwrap_or_default()
            )),
            state => StorageError::Rejected(format!("engine {} is not ready ({})", self.name, state)),
        }
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if !self.state.is_running() {
            return Err(self.not_running_error());
        }

        if self.mode() == EngineMode::ReadOnly {
            return Err(StorageError::Rejected(format!("engine {} is read-only", self.name)));
        }

        Ok(())
    }

    pub fn put(&self, tuple: Tuple) -> Result<(), StorageError> {
        self.check_writable()?;

        let callback_tuple = tuple.clone();
        if let Err(e) = self.append(tuple) {
            if !e.is_rejected() {
                self.fail(format!("append failed: {}", e));
            }
            return Err(e);
        }

        let callbacks: Vec<InsertCallback> = self.insert_callbacks.read().clone();
        for callback in callbacks {
            callback(&callback_tuple);
        }

        Ok(())
    }

    pub fn delete(&self, key: &str, timestamp: u64) -> Result<(), StorageError> {
        self.put(Tuple::tombstone(key, timestamp))
    }

    fn append(&self, tuple: Tuple) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();

        let mut memtable = self
            .instances
            .memtable()
            .ok_or_else(|| StorageError::Rejected(format!("engine {} has no memtable", self.name)))?;

        if memtable.is_full() {
            self.init_new_memtable()?;
            memtable = self
                .instances
                .memtable()
                .ok_or_else(|| StorageError::Failed("memtable rotation lost the memtable".to_string()))?;
        }

        memtable.put(tuple)
    }

    pub fn register_insert_callback(&self, callback: InsertCallback) {
        self.insert_callbacks.write().push(callback);
    }

    pub fn clear_insert_callbacks(&self) {
        self.insert_callbacks.write().clear();
    }

    fn check_readable(&self) -> Result<(), StorageError> {
        if !self.state.is_running() {
            return Err(self.not_running_error());
        }
        Ok(())
    }

    pub(crate) fn acquire_all(&self) -> Result<AcquiredTupleStores, StorageError> {
        AcquiredTupleStores::acquire(
            &self.instances,
            self.store_config.acquire_retry,
            self.store_config.acquire_retry_delay(),
        )
        .inspect_err(|e| {
            error!("Unable to acquire tuple stores of {}: {}", self.name, e);
            self.fail(e.to_string());
        })
    }

    fn collect<F>(&self, f: F) -> Result<Vec<Tuple>, StorageError>
    where
        F: Fn(&dyn ReadOnlyTupleStore) -> Vec<Tuple>,
    {
        self.check_readable()?;
        let acquired = self.acquire_all()?;

        let mut tuples = Vec::new();
        for store in acquired.stores() {
            tuples.extend(f(store.as_ref()));
        }

        Ok(tuples)
    }

    /// Current value(s) of `key` after duplicate resolution.
    pub fn get(&self, key: &str) -> Result<Vec<Tuple>, StorageError> {
        let tuples = self.collect(|store| store.get(key))?;
        Ok(self.resolver.resolve(tuples))
    }

    /// Every stored version of `key`, tombstones included.
    pub fn get_all_versions(&self, key: &str) -> Result<Vec<Tuple>, StorageError> {
        self.collect(|store| store.get(key))
    }

    /// Resolved tuples whose bounding box intersects `rectangle`.
    pub fn query_rectangle(&self, rectangle: &Hyperrectangle) -> Result<Vec<Tuple>, StorageError> {
        let tuples = self.collect(|store| store.all_tuples())?;
        Ok(self
            .resolver
            .resolve(tuples)
            .into_iter()
            .filter(|t| t.bounding_box.intersects(rectangle))
            .collect())
    }

    /// Raw tuples received at or after `timestamp`, tombstones included.
    pub fn get_inserted_since(&self, timestamp: u64) -> Result<Vec<Tuple>, StorageError> {
        self.collect(|store| store.inserted_since(timestamp))
    }

    pub fn all_tuples(&self) -> Result<Vec<Tuple>, StorageError> {
        let tuples = self.collect(|store| store.all_tuples())?;
        Ok(self.resolver.resolve(tuples))
    }

    /// Accounted bytes of all units.
    pub fn size(&self) -> Result<usize, StorageError> {
        let acquired = self.acquire_all()?;
        Ok(acquired.stores().iter().map(|s| s.size()).sum())
    }

    /// Stored tuples of all units, versions and tombstones counted.
    pub fn number_of_tuples(&self) -> Result<usize, StorageError> {
        let acquired = self.acquire_all()?;
        Ok(acquired.stores().iter().map(|s| s.number_of_tuples()).sum())
    }
}
