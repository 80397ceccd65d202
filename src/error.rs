//! Error types shared by the store's subsystems.
//!
//! Geometry and parsing failures are local and synchronous. Storage failures
//! distinguish [`StorageError::Rejected`] (the engine refused the call, try
//! again later or elsewhere) from [`StorageError::Failed`] (the engine is
//! broken and has released its resources).

use thiserror::Error;

/// Invalid geometric input. Never coerced, always surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Bounds are not increasing or a degenerate interval is open.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Malformed compact text or binary representation.
    #[error("parse error: {0}")]
    Parse(String),

    /// Two rectangles with a different number of dimensions were combined.
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    /// The requested dimension does not exist.
    #[error("invalid dimension {dimension} for a box with {dimensions} dimensions")]
    InvalidDimension { dimension: usize, dimensions: usize },

    /// The split point lies outside the interval of the split dimension.
    #[error("split point {point} is not covered in dimension {dimension}")]
    SplitPointNotCovered { point: f64, dimension: usize },
}

/// Errors raised by the storage engine and its registry.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The engine is read-only or not running; no side effects happened.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The engine hit an unrecoverable error and is in the failed state.
    #[error("storage failure: {0}")]
    Failed(String),

    /// Readable units kept changing while a reader tried to acquire them.
    #[error("unable to acquire tuple stores after {0} attempts")]
    AcquireExhausted(usize),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}

impl StorageError {
    /// True if the caller may retry the operation on another replica.
    pub fn is_rejected(&self) -> bool {
        matches!(self, StorageError::Rejected(_))
    }
}

/// Errors of the partition tree and the coordination service adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("unknown region: {0}")]
    UnknownRegion(i64),

    #[error("region {0} is not a leaf")]
    NotALeaf(i64),

    #[error("region {0} has no children")]
    NoChildren(i64),

    #[error("invalid region state transition for region {region}: {reason}")]
    InvalidState { region: i64, reason: String },

    #[error("coordination service error: {0}")]
    Coordination(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Errors of the distributed recovery.
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Local metadata diverges from the coordination service. Fatal.
    #[error("metadata version mismatch for group {group}: local {local}, remote {remote}")]
    VersionMismatch {
        group: String,
        local: String,
        remote: String,
    },

    #[error("peer request failed: {0}")]
    Peer(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}
