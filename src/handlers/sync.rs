use axum::{
    body::Bytes,
    extract::{Path, State},
};
use serde_json::Value;

use super::json_body;
use crate::auth::AuthenticatedIdentity;
use crate::database::Row;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::registry::Entity;
use crate::state::AppState;
use crate::sync::{SyncEngine, SyncError};

fn resolve(entity: &str) -> Result<Entity, ApiError> {
    Entity::resolve(entity).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn sync_error(state: &AppState, public: &str, err: SyncError) -> ApiError {
    match err {
        SyncError::Storage { .. } => state.internal(public, err),
        other => ApiError::bad_request(other.to_string()),
    }
}

/// GET /sync/:entity - every row the caller owns, newest first
pub async fn read(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Path(entity): Path<String>,
) -> ApiResult<Vec<Row>> {
    let entity = resolve(&entity)?;
    let engine = SyncEngine::new(state.store.as_ref(), state.config.sync.max_batch);

    let rows = engine
        .read(entity, &identity)
        .await
        .map_err(|e| sync_error(&state, "Failed to fetch data", e))?;
    Ok(ApiResponse::success(rows))
}

/// POST /sync/:entity/sync - batch upsert of `{items: [...]}`
pub async fn upsert(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Path(entity): Path<String>,
    body: Bytes,
) -> ApiResult<Vec<Row>> {
    let entity = resolve(&entity)?;
    let items = match json_body(&body)? {
        Value::Object(mut fields) => fields.remove("items"),
        _ => None,
    };

    let engine = SyncEngine::new(state.store.as_ref(), state.config.sync.max_batch);
    let outcome = engine
        .batch_upsert(entity, &identity, items)
        .await
        .map_err(|e| sync_error(&state, "Failed to sync data", e))?;

    Ok(ApiResponse::success(outcome.data).with_field("upserted", outcome.upserted))
}
