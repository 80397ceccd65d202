use crate::error::StorageError;
use crate::geometry::{FULL_SPACE, Hyperrectangle};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A stored record. A tombstone carries no data and hides older versions of
/// its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tuple {
    pub key: String,
    pub bounding_box: Hyperrectangle,
    pub data: Vec<u8>,
    pub version_timestamp: u64,
    pub received_timestamp: u64,
    pub deleted: bool,
}

impl Tuple {
    pub fn new(key: impl Into<String>, bounding_box: Hyperrectangle, data: Vec<u8>) -> Self {
        let now = now_ms();
        Self::with_version(key, bounding_box, data, now)
    }

    pub fn with_version(
        key: impl Into<String>,
        bounding_box: Hyperrectangle,
        data: Vec<u8>,
        version_timestamp: u64,
    ) -> Self {
        Self {
            key: key.into(),
            bounding_box,
            data,
            version_timestamp,
            received_timestamp: now_ms(),
            deleted: false,
        }
    }

    pub fn tombstone(key: impl Into<String>, version_timestamp: u64) -> Self {
        Self {
            key: key.into(),
            bounding_box: FULL_SPACE,
            data: Vec::new(),
            version_timestamp,
            received_timestamp: now_ms(),
            deleted: true,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Bytes accounted against the memtable size limit.
    pub fn size(&self) -> usize {
        self.data.len() + self.bounding_box.size()
    }
}

/// Physical table name: `<group>_<table>[_<region id>]`.
///
/// Group and table names may not contain `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleStoreName {
    group: String,
    table: String,
    region_id: Option<i64>,
}

impl TupleStoreName {
    pub fn new(group: &str, table: &str, region_id: Option<i64>) -> Result<Self, StorageError> {
        let name = Self {
            group: group.to_string(),
            table: table.to_string(),
            region_id,
        };

        if group.is_empty() || table.is_empty() || group.contains('_') || table.contains('_') {
            return Err(StorageError::InvalidTableName(name.to_string()));
        }

        Ok(name)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn region_id(&self) -> Option<i64> {
        self.region_id
    }

    pub fn full_name(&self) -> String {
        self.to_string()
    }

    /// `<group>_<table>`.
    pub fn full_name_without_region(&self) -> String {
        format!("{}_{}", self.group, self.table)
    }

    pub fn clone_with_region_id(&self, region_id: i64) -> Self {
        Self {
            group: self.group.clone(),
            table: self.table.clone(),
            region_id: Some(region_id),
        }
    }

    pub fn without_region(&self) -> Self {
        Self {
            group: self.group.clone(),
            table: self.table.clone(),
            region_id: None,
        }
    }

    pub fn is_valid(name: &str) -> bool {
        name.parse::<TupleStoreName>().is_ok()
    }
}

impl fmt::Display for TupleStoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.region_id {
            Some(region_id) => write!(f, "{}_{}_{}", self.group, self.table, region_id),
            None => write!(f, "{}_{}", self.group, self.table),
        }
    }
}

impl FromStr for TupleStoreName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('_').collect();

        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(StorageError::InvalidTableName(s.to_string()));
        }

        let region_id = match parts.get(2) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| StorageError::InvalidTableName(s.to_string()))?,
            ),
            None => None,
        };

        Self::new(parts[0], parts[1], region_id)
    }
}

/// Per-table settings, persisted next to the segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TupleStoreConfig {
    /// Keep every version of a key instead of only the newest one.
    pub allow_duplicates: bool,

    /// Versions older than this are hidden. 0 disables expiry.
    pub ttl_ms: u64,

    /// Versions kept per key when duplicates are allowed. 0 keeps all.
    pub versions: usize,
}

impl Default for TupleStoreConfig {
    fn default() -> Self {
        Self {
            allow_duplicates: false,
            ttl_ms: 0,
            versions: 0,
        }
    }
}

/// Whether an engine accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    ReadWrite,
    ReadOnly,
}
