use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DistributionError;

/// Identity of a storage node, conventionally `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RegionState {
    Unknown,
    Creating,
    Active,
    ActiveFull,
    Splitting,
    Split,
    Merging,
    RedistributionActive,
}

/// States in which a region answers reads.
pub const STATES_READ: &[RegionState] = &[
    RegionState::Active,
    RegionState::ActiveFull,
    RegionState::Splitting,
    RegionState::RedistributionActive,
    RegionState::Merging,
];

/// States in which a region accepts writes.
pub const STATES_WRITE: &[RegionState] = &[
    RegionState::Active,
    RegionState::ActiveFull,
    RegionState::RedistributionActive,
];

impl RegionState {
    pub fn is_readable(&self) -> bool {
        STATES_READ.contains(self)
    }

    pub fn is_writable(&self) -> bool {
        STATES_WRITE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionState::Unknown => "unknown",
            RegionState::Creating => "creating",
            RegionState::Active => "active",
            RegionState::ActiveFull => "active-full",
            RegionState::Splitting => "splitting",
            RegionState::Split => "split",
            RegionState::Merging => "merging",
            RegionState::RedistributionActive => "redistribution-active",
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionState {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "unknown" => RegionState::Unknown,
            "creating" => RegionState::Creating,
            "active" => RegionState::Active,
            "active-full" => RegionState::ActiveFull,
            "splitting" => RegionState::Splitting,
            "split" => RegionState::Split,
            "merging" => RegionState::Merging,
            "redistribution-active" => RegionState::RedistributionActive,
            other => {
                return Err(DistributionError::Coordination(format!(
                    "unknown region state: {}",
                    other
                )));
            }
        };
        Ok(state)
    }
}

/// Availability of a node as published in the coordination service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Unknown,
    Outdated,
    Ready,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Unknown => "unknown",
            InstanceState::Outdated => "outdated",
            InstanceState::Ready => "ready",
            InstanceState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "outdated" => InstanceState::Outdated,
            "ready" => InstanceState::Ready,
            "failed" => InstanceState::Failed,
            _ => InstanceState::Unknown,
        }
    }
}

/// Change notification emitted by the space partitioner.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionEvent {
    Added { region_id: i64 },
    Changed { region_id: i64, state: RegionState },
    Removed { region_id: i64 },
}

impl RegionEvent {
    pub fn region_id(&self) -> i64 {
        match self {
            RegionEvent::Added { region_id }
            | RegionEvent::Changed { region_id, .. }
            | RegionEvent::Removed { region_id } => *region_id,
        }
    }
}

/// A region whose local copy lags behind a peer replica.
#[derive(Debug, Clone, PartialEq)]
pub struct OutdatedRegion {
    pub region_id: i64,
    pub newest_instance: InstanceId,
    pub newest_version: u64,
    pub local_version: u64,
}

/// Result of a traversal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    Continue,
    Stop,
}
