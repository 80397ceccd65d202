//! Storage Module
//!
//! Log-structured storage of table partitions.
//!
//! ## Core Concepts
//! - **Engine**: one per `<group>_<table>_<region>`. Writes go to an in-memory memtable that rotates into immutable on-disk segments.
//! - **Acquire/Release**: every readable unit is reference counted; a reader pins all units for the duration of a query.
//! - **Registry**: owns all engines across the storage locations, creates partitions on the least used location and deletes data of regions that split or merged away.
//! - **Access**: `LocalRouter` maps a rectangle to the local partitions through the region index; the HTTP handlers sit on top of it.

pub mod acquirer;
pub mod compactor;
pub mod disk;
pub mod duplicate;
pub mod engine;
pub mod handlers;
pub mod instances;
pub mod memtable;
pub mod metadata;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod segment;
pub mod service_state;
pub mod tuple_store;
pub mod types;
pub mod wal;

pub use engine::StorageEngine;
pub use registry::EngineRegistry;
pub use types::{Tuple, TupleStoreConfig, TupleStoreName};
