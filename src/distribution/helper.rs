//! Queries over the partition tree that combine it with the coordination
//! service.

use super::partitioner::SpacePartitioner;
use super::region::RegionNode;
use super::types::{InstanceId, OutdatedRegion, Traversal};
use crate::error::DistributionError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between two attempts of [`find_region`].
pub const FIND_REGION_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Looks up `region_id`, retrying while it has not propagated yet.
pub fn find_region(
    partitioner: &SpacePartitioner,
    region_id: i64,
    retries: usize,
) -> Result<RegionNode, DistributionError> {
    for attempt in 0..=retries {
        if let Some(region) = partitioner.region(region_id) {
            return Ok(region);
        }

        if attempt < retries {
            debug!("Region {} not found, retry {}/{}", region_id, attempt + 1, retries);
            std::thread::sleep(FIND_REGION_RETRY_DELAY);
        }
    }

    Err(DistributionError::UnknownRegion(region_id))
}

/// Number of regions each instance holds a replica of, across all groups.
pub fn system_utilization(partitioners: &[Arc<SpacePartitioner>]) -> HashMap<InstanceId, usize> {
    let mut utilization: HashMap<InstanceId, usize> = HashMap::new();

    for partitioner in partitioners {
        partitioner.with_tree(|tree| {
            tree.traverse(|node| {
                for replica in &node.replicas {
                    *utilization.entry(replica.clone()).or_default() += 1;
                }
                Traversal::Continue
            })
        });
    }

    utilization
}

/// Regions replicated on `local` where another replica flushed more than
/// `tolerance_ms` later than the local copy.
///
/// A region the local instance never flushed counts as checkpoint 0.
pub fn outdated_regions(
    partitioner: &SpacePartitioner,
    local: &InstanceId,
    tolerance_ms: u64,
) -> Result<Vec<OutdatedRegion>, DistributionError> {
    let coordinator = partitioner.coordinator();
    let group = partitioner.group().to_string();

    let candidates: Vec<RegionNode> = partitioner.with_tree(|tree| {
        tree.all_regions()
            .into_iter()
            .filter(|node| node.is_replica(local) && node.state.is_readable())
            .cloned()
            .collect()
    });

    let mut result = Vec::new();

    for region in candidates {
        let local_version = coordinator
            .get_checkpoint(&group, region.region_id, local)?
            .unwrap_or(0);

        let mut newest: Option<(InstanceId, u64)> = None;

        for replica in region.replicas.iter().filter(|r| *r != local) {
            let Some(checkpoint) = coordinator.get_checkpoint(&group, region.region_id, replica)? else {
                continue;
            };

            if newest.as_ref().is_none_or(|(_, best)| checkpoint > *best) {
                newest = Some((replica.clone(), checkpoint));
            }
        }

        if let Some((newest_instance, newest_version)) = newest
            && newest_version > local_version.saturating_add(tolerance_ms)
        {
            warn!(
                "Region {} of {} is outdated: local {} < {} on {}",
                region.region_id, group, local_version, newest_version, newest_instance
            );

            result.push(OutdatedRegion {
                region_id: region.region_id,
                newest_instance,
                newest_version,
                local_version,
            });
        }
    }

    Ok(result)
}
