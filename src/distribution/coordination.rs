//! Adapter to the cluster coordination service.
//!
//! The coordination service is an external versioned key/value store. The
//! store only needs node versions, plain values, per-replica checkpoints and
//! the published instance state; [`InMemoryCoordinator`] implements that
//! surface for single-process deployments and tests.

use super::types::{InstanceId, InstanceState};
use crate::error::DistributionError;

use dashmap::DashMap;
use tracing::debug;

/// Path of the node that describes a distribution group.
pub fn group_path(group: &str) -> String {
    format!("/groups/{}", group)
}

/// Path under which an instance publishes its state.
pub fn instance_state_path(instance: &InstanceId) -> String {
    format!("/nodes/state/{}", instance)
}

pub trait CoordinationService: Send + Sync {
    /// Version of the node at `path`; bumped on every write.
    fn get_version(&self, path: &str) -> Result<u64, DistributionError>;

    fn get_state(&self, path: &str) -> Result<Option<String>, DistributionError>;

    fn set_state(&self, path: &str, value: &str) -> Result<(), DistributionError>;

    /// Last flush checkpoint of `instance` for a region, if it ever flushed.
    fn get_checkpoint(
        &self,
        group: &str,
        region_id: i64,
        instance: &InstanceId,
    ) -> Result<Option<u64>, DistributionError>;

    fn set_checkpoint(
        &self,
        group: &str,
        region_id: i64,
        instance: &InstanceId,
        timestamp: u64,
    ) -> Result<(), DistributionError>;

    fn set_instance_state(
        &self,
        instance: &InstanceId,
        state: InstanceState,
    ) -> Result<(), DistributionError> {
        self.set_state(&instance_state_path(instance), state.as_str())
    }

    fn instance_state(&self, instance: &InstanceId) -> Result<InstanceState, DistributionError> {
        Ok(self
            .get_state(&instance_state_path(instance))?
            .map(|value| InstanceState::parse(&value))
            .unwrap_or(InstanceState::Unknown))
    }
}

#[derive(Debug, Clone)]
struct VersionedValue {
    value: String,
    version: u64,
}

#[derive(Default)]
pub struct InMemoryCoordinator {
    nodes: DashMap<String, VersionedValue>,
    checkpoints: DashMap<(String, i64, InstanceId), u64>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationService for InMemoryCoordinator {
    fn get_version(&self, path: &str) -> Result<u64, DistributionError> {
        self.nodes
            .get(path)
            .map(|node| node.version)
            .ok_or_else(|| DistributionError::Coordination(format!("no such node: {}", path)))
    }

    fn get_state(&self, path: &str) -> Result<Option<String>, DistributionError> {
        Ok(self.nodes.get(path).map(|node| node.value.clone()))
    }

    fn set_state(&self, path: &str, value: &str) -> Result<(), DistributionError> {
        let mut entry = self.nodes.entry(path.to_string()).or_insert(VersionedValue {
            value: String::new(),
            version: 0,
        });
        entry.value = value.to_string();
        entry.version += 1;
        debug!("Coordination node {} = {} (version {})", path, value, entry.version);
        Ok(())
    }

    fn get_checkpoint(
        &self,
        group: &str,
        region_id: i64,
        instance: &InstanceId,
    ) -> Result<Option<u64>, DistributionError> {
        Ok(self
            .checkpoints
            .get(&(group.to_string(), region_id, instance.clone()))
            .map(|c| *c))
    }

    fn set_checkpoint(
        &self,
        group: &str,
        region_id: i64,
        instance: &InstanceId,
        timestamp: u64,
    ) -> Result<(), DistributionError> {
        self.checkpoints
            .insert((group.to_string(), region_id, instance.clone()), timestamp);
        Ok(())
    }
}
