//! Storage Network Protocol
//!
//! Endpoints and Data Transfer Objects of the node's HTTP surface: client
//! writes and reads, and the internal pull used by recovering replicas.
//!
//! Rectangles travel in their compact text form (`[[0,1]:[2,3]]`, `[]` for
//! the full space).

use super::types::Tuple;

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Public endpoint for client write requests.
pub const ENDPOINT_PUT: &str = "/put";
/// Public endpoint for client deletions.
pub const ENDPOINT_DELETE: &str = "/delete";
/// Public endpoint for key lookups (`/get/:table/:key`).
pub const ENDPOINT_GET: &str = "/get";
/// Public endpoint for rectangle queries.
pub const ENDPOINT_QUERY: &str = "/query";
/// Internal endpoint answering "everything received since T" for one local table.
pub const ENDPOINT_INSERTED_SINCE: &str = "/internal/inserted_since";

// --- Data Transfer Objects ---

/// Client write. `table` is `<group>_<table>`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub table: String,
    pub key: String,
    pub bounding_box: String,
    pub value: String,
    /// Version of the write; the receive time is used when absent.
    #[serde(default)]
    pub version_timestamp: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: bool,
    /// Local tables the write landed in.
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    pub key: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub table: String,
    pub bounding_box: String,
}

/// A tuple as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TupleJson {
    pub key: String,
    pub bounding_box: String,
    pub value: String,
    pub version_timestamp: u64,
}

impl From<&Tuple> for TupleJson {
    fn from(tuple: &Tuple) -> Self {
        Self {
            key: tuple.key.clone(),
            bounding_box: tuple.bounding_box.to_string(),
            value: String::from_utf8_lossy(&tuple.data).into_owned(),
            version_timestamp: tuple.version_timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TuplesResponse {
    pub success: bool,
    pub tuples: Vec<TupleJson>,
}

/// Pull request of a recovering replica. `table` is the full local name
/// including the region id.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertedSinceRequest {
    pub table: String,
    pub timestamp: u64,
}

/// Raw tuples, tombstones included, so the receiver can replay them as-is.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertedSinceResponse {
    pub tuples: Vec<Tuple>,
}
