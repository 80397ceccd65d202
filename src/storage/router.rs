//! Routes writes and reads of one node to its local table partitions.
//!
//! A write lands in every local region whose rectangle overlaps the tuple's
//! bounding box and whose state accepts writes. A read visits every local
//! region in the region index that overlaps the query rectangle.

use super::duplicate::resolver_for;
use super::engine::StorageEngine;
use super::observer::RegionObserver;
use super::registry::EngineRegistry;
use super::types::{Tuple, TupleStoreConfig, TupleStoreName};
use crate::distribution::SpacePartitioner;
use crate::error::StorageError;
use crate::geometry::{FULL_SPACE, Hyperrectangle};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EMPTY_ROUTE_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct LocalRouter {
    registry: Arc<EngineRegistry>,
    observer: Arc<RegionObserver>,
    retries: usize,
}

impl LocalRouter {
    pub fn new(registry: Arc<EngineRegistry>, observer: Arc<RegionObserver>, retries: usize) -> Self {
        Self {
            registry,
            observer,
            retries,
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    fn check_dimension(
        partitioner: &SpacePartitioner,
        rectangle: &Hyperrectangle,
    ) -> Result<(), StorageError> {
        if !rectangle.is_full_space() && rectangle.dimension() != partitioner.dimension() {
            return Err(StorageError::Rejected(format!(
                "rectangle {} has {} dimensions, group {} has {}",
                rectangle,
                rectangle.dimension(),
                partitioner.group(),
                partitioner.dimension()
            )));
        }
        Ok(())
    }

    /// Local writable regions for `rectangle`, retried while the tree has
    /// not caught up with a split.
    fn write_regions(
        &self,
        partitioner: &SpacePartitioner,
        rectangle: &Hyperrectangle,
    ) -> Result<Vec<i64>, StorageError> {
        for attempt in 0..=self.retries {
            let regions = partitioner.local_write_regions(rectangle);
            if !regions.is_empty() {
                return Ok(regions);
            }

            if attempt < self.retries {
                std::thread::sleep(EMPTY_ROUTE_RETRY_DELAY);
            }
        }

        Err(StorageError::Rejected(format!(
            "no local region of {} accepts writes for {}",
            partitioner.group(),
            rectangle
        )))
    }

    /// Stores `tuple` in every matching local region. Returns the tables
    /// written to.
    pub fn insert(
        &self,
        partitioner: &SpacePartitioner,
        table: &TupleStoreName,
        table_config: &TupleStoreConfig,
        tuple: Tuple,
    ) -> Result<Vec<TupleStoreName>, StorageError> {
        Self::check_dimension(partitioner, &tuple.bounding_box)?;

        let regions = self.write_regions(partitioner, &tuple.bounding_box)?;
        let mut written = Vec::with_capacity(regions.len());

        for region_id in regions {
            let name = table.clone_with_region_id(region_id);
            let engine = self.registry.get_or_create(&name, table_config)?;
            self.observer.register_table(&name, partitioner);

            engine.put(tuple.clone())?;
            written.push(name);
        }

        debug!("Stored {} in {:?}", tuple.key, written);
        Ok(written)
    }

    /// Writes a tombstone for `key` into every local writable region.
    pub fn delete(
        &self,
        partitioner: &SpacePartitioner,
        table: &TupleStoreName,
        table_config: &TupleStoreConfig,
        key: &str,
        timestamp: u64,
    ) -> Result<Vec<TupleStoreName>, StorageError> {
        self.insert(partitioner, table, table_config, Tuple::tombstone(key, timestamp))
    }

    /// Engines of `table` for all local regions overlapping `rectangle`.
    /// Regions that never received data have no engine and are skipped.
    fn engines_for(
        &self,
        partitioner: &SpacePartitioner,
        table: &TupleStoreName,
        rectangle: &Hyperrectangle,
    ) -> Result<Vec<Arc<StorageEngine>>, StorageError> {
        let mut engines = Vec::new();

        for region_id in partitioner.region_index().region_ids_for(rectangle) {
            let name = table.clone_with_region_id(region_id);
            if !self.registry.is_table_known(&name) {
                continue;
            }
            engines.push(self.registry.get_tuple_store_manager(&name)?);
        }

        Ok(engines)
    }

    pub fn query(
        &self,
        partitioner: &SpacePartitioner,
        table: &TupleStoreName,
        table_config: &TupleStoreConfig,
        rectangle: &Hyperrectangle,
    ) -> Result<Vec<Tuple>, StorageError> {
        Self::check_dimension(partitioner, rectangle)?;

        let mut tuples = Vec::new();
        for engine in self.engines_for(partitioner, table, rectangle)? {
            tuples.extend(engine.query_rectangle(rectangle)?);
        }

        // A tuple spanning several regions is stored in each of them
        Ok(resolver_for(table_config).resolve(tuples))
    }

    pub fn get(
        &self,
        partitioner: &SpacePartitioner,
        table: &TupleStoreName,
        table_config: &TupleStoreConfig,
        key: &str,
    ) -> Result<Vec<Tuple>, StorageError> {
        let mut tuples = Vec::new();
        for engine in self.engines_for(partitioner, table, &FULL_SPACE)? {
            match engine.get(key) {
                Ok(found) => tuples.extend(found),
                Err(e) if e.is_rejected() => {
                    warn!("Skipping {} during get: {}", engine.name(), e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(resolver_for(table_config).resolve(tuples))
    }
}
