//! Catch-up of local replicas after downtime.
//!
//! ## Flow
//! 1. The instance is published as `OUTDATED`.
//! 2. Per group, the group version recorded at every storage location must
//!    match the coordination service. A mismatch aborts recovery.
//! 3. Every local region where a peer flushed later than the local copy
//!    (beyond the clock skew tolerance) pulls the tuples each of its tables
//!    received since the peer's checkpoint, minus the tolerance, from the
//!    most advanced peer.
//! 4. The instance is published as `READY`.

use super::peer::PeerClient;
use crate::context::NodeContext;
use crate::distribution::coordination::group_path;
use crate::distribution::helper::outdated_regions;
use crate::distribution::{InstanceState, OutdatedRegion, SpacePartitioner};
use crate::error::{RecoveryError, StorageError};
use crate::storage::types::{Tuple, TupleStoreName};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one recovery run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveryReport {
    pub outdated_regions: usize,
    pub recovered_tables: usize,
    pub failed_tables: usize,
    pub tuples: usize,
}

impl RecoveryReport {
    fn merge(&mut self, other: RecoveryReport) {
        self.outdated_regions += other.outdated_regions;
        self.recovered_tables += other.recovered_tables;
        self.failed_tables += other.failed_tables;
        self.tuples += other.tuples;
    }
}

pub struct RecoveryService {
    context: Arc<NodeContext>,
    peers: Arc<dyn PeerClient>,
}

impl RecoveryService {
    pub fn new(context: Arc<NodeContext>, peers: Arc<dyn PeerClient>) -> Self {
        Self { context, peers }
    }

    /// Recovers all groups known to the context.
    ///
    /// Only a version mismatch is returned as an error; any other failure of
    /// a group is logged and the next group is processed.
    pub async fn run(&self) -> Result<RecoveryReport, RecoveryError> {
        let coordinator = self.context.coordinator();
        let local = self.context.local().clone();

        coordinator.set_instance_state(&local, InstanceState::Outdated)?;
        info!("Running recovery for local stored data");

        let mut report = RecoveryReport::default();

        let mut partitioners = self.context.partitioners();
        partitioners.sort_by(|a, b| a.group().cmp(b.group()));

        for partitioner in partitioners {
            match self.recover_group(&partitioner).await {
                Ok(group_report) => report.merge(group_report),
                Err(e @ RecoveryError::VersionMismatch { .. }) => {
                    coordinator.set_instance_state(&local, InstanceState::Failed)?;
                    return Err(e);
                }
                Err(e) => {
                    error!("Recovery of group {} failed: {}", partitioner.group(), e);
                }
            }
        }

        coordinator.set_instance_state(&local, InstanceState::Ready)?;
        info!(
            "Recovery done: {} outdated region(s), {} table(s) recovered, {} failed, {} tuple(s)",
            report.outdated_regions, report.recovered_tables, report.failed_tables, report.tuples
        );

        Ok(report)
    }

    pub async fn recover_group(
        &self,
        partitioner: &SpacePartitioner,
    ) -> Result<RecoveryReport, RecoveryError> {
        let group = partitioner.group();
        info!("Recovery: running recovery for group {}", group);

        self.check_group_version(group)?;

        let tolerance = self.context.config().max_clock_skew_ms;
        let outdated = outdated_regions(partitioner, self.context.local(), tolerance)?;

        let mut report = RecoveryReport {
            outdated_regions: outdated.len(),
            ..RecoveryReport::default()
        };

        for region in outdated {
            report.merge(self.recover_region(group, &region).await?);
        }

        Ok(report)
    }

    /// Compares the group version written next to the local data with the
    /// coordination service. Locations without metadata are skipped.
    pub fn check_group_version(&self, group: &str) -> Result<(), RecoveryError> {
        let remote = self.context.coordinator().get_version(&group_path(group))?;

        for storage in self.context.registry().storages() {
            let Some(metadata) = storage.read_group_metadata(group)? else {
                debug!(
                    "No metadata for group {} in {}, skipping check",
                    group,
                    storage.base_dir().display()
                );
                continue;
            };

            if metadata.version != remote {
                error!(
                    "Local version {} of group {} does not match remote version {}",
                    metadata.version, group, remote
                );
                return Err(RecoveryError::VersionMismatch {
                    group: group.to_string(),
                    local: metadata.version.to_string(),
                    remote: remote.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn recover_region(
        &self,
        group: &str,
        region: &OutdatedRegion,
    ) -> Result<RecoveryReport, RecoveryError> {
        let tables = self
            .context
            .registry()
            .tables_for_group_and_region(group, region.region_id);

        // Even with synchronized clocks the nodes may drift apart
        let since = region
            .newest_version
            .saturating_sub(self.context.config().max_clock_skew_ms);

        let mut report = RecoveryReport::default();

        for table in tables {
            match self.recover_table(&table, region, since).await {
                Ok(tuples) => {
                    info!("Recovery: inserted {} tuple(s) into {}", tuples, table);
                    report.recovered_tables += 1;
                    report.tuples += tuples;
                }
                Err(e) => {
                    error!("Recovery: unable to recover {}: {}", table, e);
                    report.failed_tables += 1;
                }
            }
        }

        if report.recovered_tables > 0 && report.failed_tables == 0 {
            self.advance_checkpoint(group, region)?;
        } else {
            warn!(
                "Region {} of {} stays outdated: {} table(s) recovered, {} failed",
                region.region_id, group, report.recovered_tables, report.failed_tables
            );
        }

        Ok(report)
    }

    async fn recover_table(
        &self,
        table: &TupleStoreName,
        region: &OutdatedRegion,
        since: u64,
    ) -> Result<usize, RecoveryError> {
        info!(
            "Recovery: pulling {} from {} (received since {})",
            table, region.newest_instance, since
        );

        let tuples = self
            .peers
            .inserted_since(&region.newest_instance, table, since)
            .await?;

        let registry = self.context.registry().clone();
        let table = table.clone();

        let inserted = tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let engine = registry.get_tuple_store_manager(&table)?;
            let count = tuples.len();
            for tuple in tuples {
                engine.put(received_now(tuple))?;
            }
            Ok(count)
        })
        .await
        .map_err(|e| RecoveryError::Peer(format!("recovery task aborted: {}", e)))??;

        Ok(inserted)
    }

    /// The local copy now holds everything the peer had flushed.
    fn advance_checkpoint(&self, group: &str, region: &OutdatedRegion) -> Result<(), RecoveryError> {
        let coordinator = self.context.coordinator();
        let local = self.context.local();

        let current = coordinator
            .get_checkpoint(group, region.region_id, local)?
            .unwrap_or(0);

        if region.newest_version > current {
            coordinator.set_checkpoint(group, region.region_id, local, region.newest_version)?;
            debug!(
                "Checkpoint of region {} on {} advanced to {}",
                region.region_id, local, region.newest_version
            );
        }

        Ok(())
    }
}

/// Recovered tuples count as received now, so peers catching up from this
/// node see them as well.
fn received_now(mut tuple: Tuple) -> Tuple {
    tuple.received_timestamp = crate::storage::types::now_ms();
    tuple
}
