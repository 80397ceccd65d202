//! Merging the flushed segments of an engine.

use super::engine::StorageEngine;
use super::segment::Segment;
use super::tuple_store::ReadOnlyTupleStore;
use super::types::{Tuple, TupleStoreConfig};
use crate::error::StorageError;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Drops superseded versions. Tombstones survive so that newer units and
/// replicas pulling changes still see the deletion.
fn compaction_filter(config: &TupleStoreConfig, tuples: Vec<Tuple>) -> Vec<Tuple> {
    let mut by_key: HashMap<String, Vec<Tuple>> = HashMap::new();
    for tuple in tuples {
        by_key.entry(tuple.key.clone()).or_default().push(tuple);
    }

    let mut result = Vec::new();

    for (_, mut versions) in by_key {
        versions.sort_by(|a, b| b.version_timestamp.cmp(&a.version_timestamp));
        versions.dedup_by(|a, b| {
            a.version_timestamp == b.version_timestamp && a.deleted == b.deleted && a.data == b.data
        });

        if !config.allow_duplicates {
            versions.truncate(1);
        } else if config.versions > 0 {
            versions.truncate(config.versions);
        }

        result.extend(versions);
    }

    result
}

impl StorageEngine {
    /// Replaces all flushed segments with a single merged one. Returns the
    /// number of the new segment, or `None` when there was nothing to merge.
    ///
    /// The merged segment takes the highest number among its inputs, so it
    /// still sorts before every memtable created in the meantime.
    pub fn compact(&self) -> Result<Option<u64>, StorageError> {
        if !self.is_running() {
            return Err(self.not_running_error());
        }

        let _guard = self.lock_compaction();

        let candidates = self.instances().segments();
        if candidates.len() < 2 {
            return Ok(None);
        }

        let mut acquired: Vec<Arc<Segment>> = Vec::with_capacity(candidates.len());
        for segment in candidates {
            if segment.acquire() {
                acquired.push(segment);
            } else {
                debug!("Segment {} vanished, compacting without it", segment.table_number());
            }
        }

        let result = self.merge_segments(&acquired);

        match result {
            Ok(Some(number)) => {
                for segment in &acquired {
                    if segment.table_number() == number {
                        segment.disown_file();
                    }
                    segment.delete_on_close();
                    segment.release();
                }
                info!(
                    "Compacted {} segments of {} into segment {}",
                    acquired.len(),
                    self.name(),
                    number
                );
                Ok(Some(number))
            }
            other => {
                for segment in &acquired {
                    segment.release();
                }
                other
            }
        }
    }

    fn merge_segments(&self, segments: &[Arc<Segment>]) -> Result<Option<u64>, StorageError> {
        if segments.len() < 2 {
            return Ok(None);
        }

        let tuples: Vec<Tuple> = segments.iter().flat_map(|s| s.all_tuples()).collect();
        let merged = compaction_filter(self.config(), tuples);

        let Some(number) = segments.iter().map(|s| s.table_number()).max() else {
            return Ok(None);
        };

        // Atomically replaces the file of the newest input
        let segment = Arc::new(Segment::write(self.directory(), number, merged)?);

        if let Err(e) = self.instances().replace_compacted_segments(vec![segment.clone()], segments) {
            // The file now holds the data of every input
            segment.disown_file();
            segment.delete_on_close();
            return Err(e);
        }

        Ok(Some(number))
    }
}
