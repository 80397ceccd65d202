//! Recovery Module
//!
//! Brings local replicas up to date after the node was down.
//!
//! ## Core Concepts
//! - **Checkpoints**: every flush advances the replica's checkpoint of its region in the coordination service.
//! - **Outdated regions**: a peer's checkpoint is ahead of the local one by more than the tolerated clock skew.
//! - **Pull**: missing tuples are requested from the most advanced peer and re-inserted locally; one failing table does not stop the others.
//! - **Fail-stop**: local group metadata that disagrees with the coordination service is fatal.

pub mod peer;
pub mod service;

pub use peer::{HttpPeerClient, PeerClient};
pub use service::{RecoveryReport, RecoveryService};
