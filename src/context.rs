//! Everything a node needs, built once at startup and handed to the
//! components that use it.

use crate::config::StoreConfig;
use crate::distribution::coordination::group_path;
use crate::distribution::{CoordinationService, InstanceId, RegionEvent, SpacePartitioner};
use crate::error::{DistributionError, StorageError};
use crate::storage::observer::RegionObserver;
use crate::storage::registry::EngineRegistry;
use crate::storage::router::LocalRouter;
use crate::storage::types::{TupleStoreConfig, TupleStoreName};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct NodeContext {
    local: InstanceId,
    config: Arc<StoreConfig>,
    coordinator: Arc<dyn CoordinationService>,
    registry: Arc<EngineRegistry>,
    observer: Arc<RegionObserver>,
    router: LocalRouter,
    partitioners: DashMap<String, Arc<SpacePartitioner>>,
    table_configs: DashMap<String, TupleStoreConfig>,
}

impl NodeContext {
    /// Starts the engine registry and wires flushes to the replica
    /// checkpoints in the coordination service.
    pub fn new(
        local: InstanceId,
        config: StoreConfig,
        coordinator: Arc<dyn CoordinationService>,
    ) -> Result<Arc<Self>, StorageError> {
        let config = Arc::new(config);

        let registry = EngineRegistry::new(config.clone());
        registry.register_flush_callback(checkpoint_callback(local.clone(), coordinator.clone()));
        registry.init()?;

        let observer = RegionObserver::new(registry.clone());
        let router = LocalRouter::new(registry.clone(), observer.clone(), config.operation_retry);

        info!("Node context for {} ready", local);

        Ok(Arc::new(Self {
            local,
            config,
            coordinator,
            registry,
            observer,
            router,
            partitioners: DashMap::new(),
            table_configs: DashMap::new(),
        }))
    }

    pub fn local(&self) -> &InstanceId {
        &self.local
    }

    pub fn config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<dyn CoordinationService> {
        self.coordinator.clone()
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn observer(&self) -> &Arc<RegionObserver> {
        &self.observer
    }

    pub fn router(&self) -> &LocalRouter {
        &self.router
    }

    /// Creates a distribution group. The local group metadata follows the
    /// group version from now on; an existing metadata file is left alone so
    /// recovery can compare it.
    pub fn create_group(
        &self,
        group: &str,
        dimension: usize,
        replicas: Vec<InstanceId>,
    ) -> Result<Arc<SpacePartitioner>, DistributionError> {
        let partitioner = SpacePartitioner::new(
            group,
            dimension,
            replicas,
            self.local.clone(),
            self.coordinator.clone(),
        )?;

        let version = self.coordinator.get_version(&group_path(group))?;
        for storage in self.registry.storages() {
            match storage.read_group_metadata(group) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Err(e) = storage.write_group_metadata(group, version) {
                        error!("Unable to write metadata of group {}: {}", group, e);
                    }
                }
                Err(e) => error!("Unable to read metadata of group {}: {}", group, e),
            }
        }

        let registry = self.registry.clone();
        let coordinator = self.coordinator.clone();
        let group_name = group.to_string();
        partitioner.register_callback(Arc::new(move |_event: &RegionEvent| {
            match coordinator.get_version(&group_path(&group_name)) {
                Ok(version) => {
                    if let Err(e) = registry.write_group_metadata(&group_name, version) {
                        error!("Unable to write metadata of group {}: {}", group_name, e);
                    }
                }
                Err(e) => error!("Unable to read version of group {}: {}", group_name, e),
            }
        }));

        self.partitioners.insert(group.to_string(), partitioner.clone());
        Ok(partitioner)
    }

    pub fn partitioner(&self, group: &str) -> Option<Arc<SpacePartitioner>> {
        self.partitioners.get(group).map(|p| p.clone())
    }

    pub fn partitioners(&self) -> Vec<Arc<SpacePartitioner>> {
        self.partitioners.iter().map(|p| p.clone()).collect()
    }

    /// Sets the configuration used when partitions of `table` are created.
    pub fn register_table(&self, table: &TupleStoreName, config: TupleStoreConfig) {
        self.table_configs.insert(table.full_name_without_region(), config);
    }

    pub fn table_config(&self, table: &TupleStoreName) -> TupleStoreConfig {
        self.table_configs
            .get(&table.full_name_without_region())
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

/// Advances the local checkpoint of the flushed table's region. Checkpoints
/// never move backwards.
fn checkpoint_callback(
    local: InstanceId,
    coordinator: Arc<dyn CoordinationService>,
) -> crate::storage::disk::FlushCallback {
    Arc::new(move |table: &TupleStoreName, timestamp: u64| {
        let Some(region_id) = table.region_id() else {
            return;
        };

        let current = match coordinator.get_checkpoint(table.group(), region_id, &local) {
            Ok(current) => current.unwrap_or(0),
            Err(e) => {
                error!("Unable to read checkpoint of {}: {}", table, e);
                return;
            }
        };

        if timestamp <= current {
            return;
        }

        match coordinator.set_checkpoint(table.group(), region_id, &local, timestamp) {
            Ok(()) => debug!("Checkpoint of {} on {} is now {}", table, local, timestamp),
            Err(e) => error!("Unable to update checkpoint of {}: {}", table, e),
        }
    })
}
