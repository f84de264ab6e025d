//! `/api/<entity>` handlers. One router per [`RestEntity`] shares these
//! functions; the entity arrives as a request extension.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension,
};

use super::json_body;
use crate::auth::AuthenticatedIdentity;
use crate::database::Row;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::records::{RecordError, RecordService};
use crate::registry::RestEntity;
use crate::state::AppState;

fn record_error(state: &AppState, entity: RestEntity, action: &str, err: RecordError) -> ApiError {
    match err {
        RecordError::NotFound(_) => ApiError::not_found(err.to_string()),
        RecordError::InvalidBody(msg) => ApiError::bad_request(msg),
        RecordError::DuplicateId(_) => ApiError::bad_request(err.to_string()),
        RecordError::Storage(e) => state.internal(&format!("Failed to {} {}", action, entity.singular().to_lowercase()), e),
    }
}

/// GET /api/:entity
pub async fn list(
    State(state): State<AppState>,
    Extension(entity): Extension<RestEntity>,
    identity: AuthenticatedIdentity,
) -> ApiResult<Vec<Row>> {
    let rows = RecordService::new(state.store.as_ref(), entity)
        .list(&identity)
        .await
        .map_err(|e| record_error(&state, entity, "fetch", e))?;
    Ok(ApiResponse::success(rows))
}

/// GET /api/:entity/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(entity): Extension<RestEntity>,
    identity: AuthenticatedIdentity,
    Path(id): Path<String>,
) -> ApiResult<Row> {
    let row = RecordService::new(state.store.as_ref(), entity)
        .get(&identity, &id)
        .await
        .map_err(|e| record_error(&state, entity, "fetch", e))?;
    Ok(ApiResponse::success(row))
}

/// POST /api/:entity
pub async fn create(
    State(state): State<AppState>,
    Extension(entity): Extension<RestEntity>,
    identity: AuthenticatedIdentity,
    body: Bytes,
) -> ApiResult<Row> {
    let body = json_body(&body)?;
    let row = RecordService::new(state.store.as_ref(), entity)
        .create(&identity, body)
        .await
        .map_err(|e| record_error(&state, entity, "create", e))?;
    Ok(ApiResponse::created(row))
}

/// PUT /api/:entity/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(entity): Extension<RestEntity>,
    identity: AuthenticatedIdentity,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Row> {
    let body = json_body(&body)?;
    let row = RecordService::new(state.store.as_ref(), entity)
        .update(&identity, &id, body)
        .await
        .map_err(|e| record_error(&state, entity, "update", e))?;
    Ok(ApiResponse::success(row))
}

/// DELETE /api/:entity/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(entity): Extension<RestEntity>,
    identity: AuthenticatedIdentity,
    Path(id): Path<String>,
) -> ApiResult<()> {
    RecordService::new(state.store.as_ref(), entity)
        .delete(&identity, &id)
        .await
        .map_err(|e| record_error(&state, entity, "delete", e))?;
    Ok(ApiResponse::no_content())
}
