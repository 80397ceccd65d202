//! Distributed Multi-Dimensional Data Store Library
//!
//! This library crate defines the core modules of a storage node. It serves
//! as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`geometry`**: Interval and hyperrectangle algebra. Every overlap, containment,
//!   split and merge decision reduces to these types.
//! - **`distribution`**: The partition tree of each distribution group, the local
//!   region index and the coordination service adapter.
//! - **`storage`**: Per-partition log-structured engines (memtable, write-ahead log,
//!   segments), the engine registry, routing and the HTTP handlers.
//! - **`recovery`**: Catch-up of outdated local replicas from their peers at startup.
//! - **`context`**: The explicit process context wiring the modules together.

pub mod config;
pub mod context;
pub mod distribution;
pub mod error;
pub mod geometry;
pub mod recovery;
pub mod storage;
