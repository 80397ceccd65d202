//! Process-wide owner of all storage engines.
//!
//! ## Core Concepts
//! - **Locations**: every configured storage directory runs its own
//!   `DiskStorage`. A new table is placed on the location holding the fewest
//!   tables.
//! - **Known vs. open**: the location map lists every table found on disk;
//!   engines are opened lazily on first access.
//! - **Locking**: one mutex over the location map serializes create, open and
//!   delete. Lookups of already open engines skip it.

use super::disk::{self, DiskStorage, FlushCallback, FlushCallbacks};
use super::engine::StorageEngine;
use super::metadata;
use super::service_state::ServiceState;
use super::types::{TupleStoreConfig, TupleStoreName};
use crate::config::StoreConfig;
use crate::error::StorageError;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct EngineRegistry {
    config: Arc<StoreConfig>,
    storages: DashMap<PathBuf, Arc<DiskStorage>>,
    locations: Mutex<HashMap<TupleStoreName, PathBuf>>,
    engines: DashMap<TupleStoreName, Arc<StorageEngine>>,
    flush_callbacks: FlushCallbacks,
    state: ServiceState,
}

impl EngineRegistry {
    pub fn new(config: Arc<StoreConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            storages: DashMap::new(),
            locations: Mutex::new(HashMap::new()),
            engines: DashMap::new(),
            flush_callbacks: Arc::new(RwLock::new(Vec::new())),
            state: ServiceState::new(),
        })
    }

    /// Starts one `DiskStorage` per configured directory and scans them for
    /// existing tables.
    pub fn init(&self) -> Result<(), StorageError> {
        self.state.dispatch_to_starting()?;

        let result = self.scan_locations();

        match result {
            Ok(tables) => {
                self.state.dispatch_to_running()?;
                info!(
                    "Storage registry running: {} location(s), {} known table(s)",
                    self.storages.len(),
                    tables
                );
                Ok(())
            }
            Err(e) => {
                error!("Unable to start storage registry: {}", e);
                self.state.dispatch_to_failed(e.to_string());
                Err(e)
            }
        }
    }

    fn scan_locations(&self) -> Result<usize, StorageError> {
        let mut locations = self.locations.lock();

        for directory in &self.config.storage_directories {
            let storage = DiskStorage::start(
                directory,
                self.config.flush_threads_per_storage,
                self.flush_callbacks.clone(),
            )?;

            for table in storage.list_tables()? {
                debug!("Found table {} in {}", table, directory.display());
                if let Some(previous) = locations.insert(table.clone(), directory.clone()) {
                    warn!(
                        "Table {} exists in {} and {}, using the latter",
                        table,
                        previous.display(),
                        directory.display()
                    );
                }
            }

            self.storages.insert(directory.clone(), storage);
        }

        Ok(locations.len())
    }

    pub fn config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    fn check_running(&self) -> Result<(), StorageError> {
        if !self.state.is_running() {
            return Err(StorageError::Rejected(format!(
                "storage registry is not ready ({})",
                self.state.state()
            )));
        }
        Ok(())
    }

    /// The engine of a known table, opened on first access.
    pub fn get_tuple_store_manager(
        &self,
        name: &TupleStoreName,
    ) -> Result<Arc<StorageEngine>, StorageError> {
        if let Some(engine) = self.engines.get(name) {
            return Ok(engine.clone());
        }

        self.check_running()?;
        let locations = self.locations.lock();
        self.open_locked(&locations, name)
    }

    fn open_locked(
        &self,
        locations: &HashMap<TupleStoreName, PathBuf>,
        name: &TupleStoreName,
    ) -> Result<Arc<StorageEngine>, StorageError> {
        if let Some(engine) = self.engines.get(name) {
            return Ok(engine.clone());
        }

        let location = locations
            .get(name)
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))?;
        let storage = self.storage(location)?;

        let table_config = metadata::read_table_config(&storage.table_dir(name))?;
        let engine = StorageEngine::new(name.clone(), table_config, self.config.clone(), storage);
        engine.init()?;

        self.engines.insert(name.clone(), engine.clone());
        Ok(engine)
    }

    fn storage(&self, location: &Path) -> Result<Arc<DiskStorage>, StorageError> {
        self.storages
            .get(location)
            .map(|s| s.clone())
            .ok_or_else(|| StorageError::Failed(format!("unknown storage location {}", location.display())))
    }

    /// The location with the fewest tables. Locations without any table
    /// count as zero.
    pub fn lowest_utilized_location(&self) -> Option<PathBuf> {
        let locations = self.locations.lock();
        self.lowest_utilized_location_locked(&locations)
    }

    fn lowest_utilized_location_locked(
        &self,
        locations: &HashMap<TupleStoreName, PathBuf>,
    ) -> Option<PathBuf> {
        let mut usage: HashMap<PathBuf, usize> = self
            .storages
            .iter()
            .map(|entry| (entry.key().clone(), 0))
            .collect();

        for location in locations.values() {
            *usage.entry(location.clone()).or_insert(0) += 1;
        }

        // Ties go to the first configured directory
        self.config
            .storage_directories
            .iter()
            .filter_map(|d| usage.get(d).map(|count| (d, *count)))
            .min_by_key(|(_, count)| *count)
            .map(|(d, _)| d.clone())
    }

    pub fn create_table(
        &self,
        name: &TupleStoreName,
        table_config: &TupleStoreConfig,
    ) -> Result<Arc<StorageEngine>, StorageError> {
        self.check_running()?;
        let mut locations = self.locations.lock();

        if locations.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }

        self.create_locked(&mut locations, name, table_config)
    }

    fn create_locked(
        &self,
        locations: &mut HashMap<TupleStoreName, PathBuf>,
        name: &TupleStoreName,
        table_config: &TupleStoreConfig,
    ) -> Result<Arc<StorageEngine>, StorageError> {
        let location = self
            .lowest_utilized_location_locked(locations)
            .ok_or_else(|| StorageError::Failed("no storage location available".to_string()))?;
        let storage = self.storage(&location)?;

        metadata::write_table_config(&storage.table_dir(name), table_config)?;

        let engine = StorageEngine::new(
            name.clone(),
            table_config.clone(),
            self.config.clone(),
            storage,
        );
        engine.init()?;

        info!("Created table {} in {}", name, location.display());
        locations.insert(name.clone(), location);
        self.engines.insert(name.clone(), engine.clone());

        Ok(engine)
    }

    /// Opens the table if it is known, creates it otherwise.
    pub fn get_or_create(
        &self,
        name: &TupleStoreName,
        table_config: &TupleStoreConfig,
    ) -> Result<Arc<StorageEngine>, StorageError> {
        if let Some(engine) = self.engines.get(name) {
            return Ok(engine.clone());
        }

        self.check_running()?;
        let mut locations = self.locations.lock();

        if locations.contains_key(name) {
            self.open_locked(&locations, name)
        } else {
            self.create_locked(&mut locations, name, table_config)
        }
    }

    pub fn is_engine_active(&self, name: &TupleStoreName) -> bool {
        self.engines.contains_key(name)
    }

    pub fn is_table_known(&self, name: &TupleStoreName) -> bool {
        self.locations.lock().contains_key(name)
    }

    /// Shuts the engine of `name` down. Returns false if it was not open.
    pub fn shutdown_table(&self, name: &TupleStoreName) -> bool {
        let Some((_, engine)) = self.engines.remove(name) else {
            return false;
        };

        info!("Shutting down engine of {}", name);
        if let Err(e) = engine.shutdown() {
            error!("Error while shutting down {}: {}", name, e);
        }
        true
    }

    /// Shuts the engine down and removes the table data, either right away
    /// or through the disk workers of its location.
    pub fn delete_table(&self, name: &TupleStoreName, synchronous: bool) -> Result<(), StorageError> {
        let mut locations = self.locations.lock();
        self.delete_locked(&mut locations, name, synchronous)
    }

    fn delete_locked(
        &self,
        locations: &mut HashMap<TupleStoreName, PathBuf>,
        name: &TupleStoreName,
        synchronous: bool,
    ) -> Result<(), StorageError> {
        self.shutdown_table(name);

        let Some(location) = locations.remove(name) else {
            error!("Table {} not known during deletion", name);
            return Ok(());
        };

        let storage = self.storage(&location)?;
        let directory = storage.table_dir(name);

        if synchronous {
            disk::delete_directory(&directory)?;
        } else {
            storage.schedule_delete(directory)?;
        }

        info!("Deleted table {}", name);
        Ok(())
    }

    /// Removes all tables of `group` and its metadata at every location.
    pub fn delete_all_tables_in_group(&self, group: &str) -> Result<(), StorageError> {
        let mut locations = self.locations.lock();

        let tables: Vec<TupleStoreName> = locations
            .keys()
            .filter(|name| name.group() == group)
            .cloned()
            .collect();

        info!("Deleting {} table(s) of group {}", tables.len(), group);
        for table in tables {
            self.delete_locked(&mut locations, &table, true)?;
        }

        for storage in self.storages.iter() {
            disk::delete_directory(&storage.group_dir(group))?;
        }

        Ok(())
    }

    /// Removes the local data of every table of `group` in `region_id`.
    pub fn delete_data_of_region(
        &self,
        group: &str,
        region_id: i64,
        synchronous: bool,
    ) -> Result<(), StorageError> {
        let mut locations = self.locations.lock();

        let tables: Vec<TupleStoreName> = locations
            .keys()
            .filter(|name| name.group() == group && name.region_id() == Some(region_id))
            .cloned()
            .collect();

        for table in tables {
            info!("Deleting local data of {} (region {} is gone)", table, region_id);
            self.delete_locked(&mut locations, &table, synchronous)?;
        }

        Ok(())
    }

    pub fn all_tables(&self) -> Vec<TupleStoreName> {
        let mut tables: Vec<TupleStoreName> = self.locations.lock().keys().cloned().collect();
        tables.sort();
        tables
    }

    pub fn tables_for_group(&self, group: &str) -> Vec<TupleStoreName> {
        self.all_tables()
            .into_iter()
            .filter(|name| name.group() == group)
            .collect()
    }

    pub fn tables_for_group_and_region(&self, group: &str, region_id: i64) -> Vec<TupleStoreName> {
        self.tables_for_group(group)
            .into_iter()
            .filter(|name| name.region_id() == Some(region_id))
            .collect()
    }

    pub fn tables_for_location(&self, location: &Path) -> Vec<TupleStoreName> {
        let mut tables: Vec<TupleStoreName> = self
            .locations
            .lock()
            .iter()
            .filter(|(_, l)| l.as_path() == location)
            .map(|(name, _)| name.clone())
            .collect();
        tables.sort();
        tables
    }

    pub fn size_of_region(&self, group: &str, region_id: i64) -> Result<usize, StorageError> {
        let mut total = 0;
        for table in self.tables_for_group_and_region(group, region_id) {
            total += self.get_tuple_store_manager(&table)?.size()?;
        }
        Ok(total)
    }

    pub fn tuples_in_region(&self, group: &str, region_id: i64) -> Result<usize, StorageError> {
        let mut total = 0;
        for table in self.tables_for_group_and_region(group, region_id) {
            total += self.get_tuple_store_manager(&table)?.number_of_tuples()?;
        }
        Ok(total)
    }

    /// Engines that are currently open.
    pub fn active_engines(&self) -> Vec<Arc<StorageEngine>> {
        self.engines.iter().map(|e| e.value().clone()).collect()
    }

    pub fn register_flush_callback(&self, callback: FlushCallback) {
        self.flush_callbacks.write().push(callback);
    }

    pub fn storages(&self) -> Vec<Arc<DiskStorage>> {
        self.storages.iter().map(|s| s.clone()).collect()
    }

    /// Records the group version at every location.
    pub fn write_group_metadata(&self, group: &str, version: u64) -> Result<(), StorageError> {
        for storage in self.storages.iter() {
            storage.write_group_metadata(group, version)?;
        }
        Ok(())
    }

    /// Stops all engines, then all storage locations.
    pub fn shutdown(&self) {
        if !self.state.is_running() {
            warn!("Ignoring shutdown, registry is in state {}", self.state.state());
            return;
        }

        if let Err(e) = self.state.dispatch_to_stopping() {
            error!("Unable to stop storage registry: {}", e);
            return;
        }

        info!("Shutting down {} engine(s)", self.engines.len());
        let names: Vec<TupleStoreName> = self.engines.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.shutdown_table(&name);
        }

        info!("Shutting down storage locations");
        for storage in self.storages.iter() {
            storage.shutdown();
        }

        self.engines.clear();
        self.locations.lock().clear();
        self.storages.clear();

        if let Err(e) = self.state.dispatch_to_terminated() {
            error!("Unable to terminate storage registry: {}", e);
        }
    }
}
