//! Distribution Module
//!
//! Decides where a rectangle lives.
//!
//! ## Core Concepts
//! - **Partition tree**: a binary k-d style tree over the key space; each split cycles to the next dimension.
//! - **Regions**: tree nodes with a rectangle, a lifecycle state, a replica set and a numeric id.
//! - **Region index**: the flat list of regions stored on this node, used to route reads and writes to local tables.
//! - **Coordination**: group versions, replica checkpoints and instance states live in an external service.

pub mod coordination;
pub mod helper;
pub mod partitioner;
pub mod region;
pub mod region_index;
pub mod types;

pub use coordination::{CoordinationService, InMemoryCoordinator};
pub use partitioner::{RegionCallback, SpacePartitioner};
pub use region::{PartitionTree, RegionNode};
pub use region_index::RegionIndex;
pub use types::{InstanceId, InstanceState, OutdatedRegion, RegionEvent, RegionState};

#[cfg(test)]
mod tests;
