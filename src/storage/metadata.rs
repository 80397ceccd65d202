//! Small JSON files kept next to the table data.

use super::types::TupleStoreConfig;
use crate::error::StorageError;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const GROUP_METADATA_FILE: &str = "group.json";
pub const TABLE_CONFIG_FILE: &str = "tuplestore.json";

/// Per (storage location, distribution group) record of the group version
/// the local data was written under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupMetadata {
    pub version: u64,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StorageError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_group_metadata(group_dir: &Path) -> Result<Option<GroupMetadata>, StorageError> {
    read_json(&group_dir.join(GROUP_METADATA_FILE))
}

pub fn write_group_metadata(group_dir: &Path, metadata: &GroupMetadata) -> Result<(), StorageError> {
    write_json(&group_dir.join(GROUP_METADATA_FILE), metadata)
}

/// The stored table configuration, or the default one if none was written.
pub fn read_table_config(table_dir: &Path) -> Result<TupleStoreConfig, StorageError> {
    Ok(read_json(&table_dir.join(TABLE_CONFIG_FILE))?.unwrap_or_default())
}

pub fn write_table_config(table_dir: &Path, config: &TupleStoreConfig) -> Result<(), StorageError> {
    write_json(&table_dir.join(TABLE_CONFIG_FILE), config)
}
