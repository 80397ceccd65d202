use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{
    DeleteRequest, InsertedSinceRequest, InsertedSinceResponse, PutRequest, PutResponse,
    QueryRequest, TupleJson, TuplesResponse,
};
use super::types::{Tuple, TupleStoreName, now_ms};
use crate::context::NodeContext;
use crate::distribution::SpacePartitioner;
use crate::error::StorageError;
use crate::geometry::Hyperrectangle;

/// Rejections mean "try another replica", anything else is a broken engine.
fn status_of(error: &StorageError) -> StatusCode {
    match error {
        StorageError::Rejected(_) => StatusCode::SERVICE_UNAVAILABLE,
        StorageError::UnknownTable(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidTableName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn resolve_table(
    ctx: &NodeContext,
    raw: &str,
) -> Result<(TupleStoreName, Arc<SpacePartitioner>), StatusCode> {
    let table: TupleStoreName = raw.parse().map_err(|e| {
        tracing::error!("Failed to parse table name: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let partitioner = ctx.partitioner(table.group()).ok_or_else(|| {
        tracing::warn!("Unknown distribution group {}", table.group());
        StatusCode::NOT_FOUND
    })?;

    Ok((table, partitioner))
}

/// Runs blocking storage work off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!("Storage operation failed: {}", e);
            Err(status_of(&e))
        }
        Err(e) => {
            tracing::error!("Storage task panicked: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn handle_put(
    Extension(ctx): Extension<Arc<NodeContext>>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let failed = |status: StatusCode| {
        (
            status,
            Json(PutResponse {
                success: false,
                tables: Vec::new(),
            }),
        )
    };

    let (table, partitioner) = match resolve_table(&ctx, &req.table) {
        Ok(resolved) => resolved,
        Err(status) => return failed(status),
    };

    let bounding_box: Hyperrectangle = match req.bounding_box.parse() {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to parse bounding box: {}", e);
            return failed(StatusCode::BAD_REQUEST);
        }
    };

    let version = req.version_timestamp.unwrap_or_else(now_ms);
    let tuple = Tuple::with_version(req.key, bounding_box, req.value.into_bytes(), version);

    let result = run_blocking(move || {
        let config = ctx.table_config(&table);
        ctx.router().insert(&partitioner, &table, &config, tuple)
    })
    .await;

    match result {
        Ok(tables) => (
            StatusCode::OK,
            Json(PutResponse {
                success: true,
                tables: tables.iter().map(|t| t.to_string()).collect(),
            }),
        ),
        Err(status) => failed(status),
    }
}

pub async fn handle_delete(
    Extension(ctx): Extension<Arc<NodeContext>>,
    Json(req): Json<DeleteRequest>,
) -> (StatusCode, Json<PutResponse>) {
    let (table, partitioner) = match resolve_table(&ctx, &req.table) {
        Ok(resolved) => resolved,
        Err(status) => {
            return (
                status,
                Json(PutResponse {
                    success: false,
                    tables: Vec::new(),
                }),
            );
        }
    };

    let timestamp = req.timestamp.unwrap_or_else(now_ms);

    let result = run_blocking(move || {
        let config = ctx.table_config(&table);
        ctx.router()
            .delete(&partitioner, &table, &config, &req.key, timestamp)
    })
    .await;

    match result {
        Ok(tables) => (
            StatusCode::OK,
            Json(PutResponse {
                success: true,
                tables: tables.iter().map(|t| t.to_string()).collect(),
            }),
        ),
        Err(status) => (
            status,
            Json(PutResponse {
                success: false,
                tables: Vec::new(),
            }),
        ),
    }
}

fn tuples_response(status: StatusCode, tuples: &[Tuple]) -> (StatusCode, Json<TuplesResponse>) {
    (
        status,
        Json(TuplesResponse {
            success: status == StatusCode::OK,
            tuples: tuples.iter().map(TupleJson::from).collect(),
        }),
    )
}

pub async fn handle_get(
    Extension(ctx): Extension<Arc<NodeContext>>,
    Path((table, key)): Path<(String, String)>,
) -> (StatusCode, Json<TuplesResponse>) {
    let (table, partitioner) = match resolve_table(&ctx, &table) {
        Ok(resolved) => resolved,
        Err(status) => return tuples_response(status, &[]),
    };

    let result = run_blocking(move || {
        let config = ctx.table_config(&table);
        ctx.router().get(&partitioner, &table, &config, &key)
    })
    .await;

    match result {
        Ok(tuples) if tuples.is_empty() => tuples_response(StatusCode::NOT_FOUND, &[]),
        Ok(tuples) => tuples_response(StatusCode::OK, &tuples),
        Err(status) => tuples_response(status, &[]),
    }
}

pub async fn handle_query(
    Extension(ctx): Extension<Arc<NodeContext>>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<TuplesResponse>) {
    let (table, partitioner) = match resolve_table(&ctx, &req.table) {
        Ok(resolved) => resolved,
        Err(status) => return tuples_response(status, &[]),
    };

    let rectangle: Hyperrectangle = match req.bounding_box.parse() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to parse query rectangle: {}", e);
            return tuples_response(StatusCode::BAD_REQUEST, &[]);
        }
    };

    let result = run_blocking(move || {
        let config = ctx.table_config(&table);
        ctx.router().query(&partitioner, &table, &config, &rectangle)
    })
    .await;

    match result {
        Ok(tuples) => tuples_response(StatusCode::OK, &tuples),
        Err(status) => tuples_response(status, &[]),
    }
}

/// Answers a recovering replica. A table this node never stored yields an
/// empty answer.
pub async fn handle_inserted_since(
    Extension(ctx): Extension<Arc<NodeContext>>,
    Json(req): Json<InsertedSinceRequest>,
) -> (StatusCode, Json<InsertedSinceResponse>) {
    let table: TupleStoreName = match req.table.parse() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to parse table name: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(InsertedSinceResponse { tuples: Vec::new() }),
            );
        }
    };

    let result = run_blocking(move || {
        if !ctx.registry().is_table_known(&table) {
            return Ok(Vec::new());
        }
        ctx.registry()
            .get_tuple_store_manager(&table)?
            .get_inserted_since(req.timestamp)
    })
    .await;

    match result {
        Ok(tuples) => {
            tracing::info!("Serving {} tuple(s) of {} to a recovering peer", tuples.len(), req.table);
            (StatusCode::OK, Json(InsertedSinceResponse { tuples }))
        }
        Err(status) => (status, Json(InsertedSinceResponse { tuples: Vec::new() })),
    }
}
