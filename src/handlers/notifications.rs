use axum::{
    body::Bytes,
    extract::{Path, Query, State},
};

use super::json_body;
use crate::auth::AuthenticatedIdentity;
use crate::database::Row;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::notifications::{ListParams, NewNotification, NotificationError, NotificationService};
use crate::state::AppState;

fn notification_error(state: &AppState, public: &str, err: NotificationError) -> ApiError {
    match err {
        NotificationError::Invalid(msg) => ApiError::bad_request(msg),
        NotificationError::NotFound => ApiError::not_found(err.to_string()),
        NotificationError::Storage(e) => state.internal(public, e),
    }
}

/// POST /notifications/send - store a notification for the caller
pub async fn send(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    body: Bytes,
) -> ApiResult<Row> {
    let notification = NewNotification::parse(json_body(&body)?)
        .map_err(|e| notification_error(&state, "Failed to create notification", e))?;

    let row = NotificationService::new(state.store.as_ref())
        .send(&identity, notification)
        .await
        .map_err(|e| notification_error(&state, "Failed to create notification", e))?;
    Ok(ApiResponse::created(row))
}

/// GET /notifications?limit&offset&unread_only
pub async fn list(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Row>> {
    let query = params
        .into_query(&identity.subject, state.config.api.notification_page_limit)
        .map_err(|e| notification_error(&state, "Failed to fetch notifications", e))?;

    let rows = NotificationService::new(state.store.as_ref())
        .list(&query)
        .await
        .map_err(|e| notification_error(&state, "Failed to fetch notifications", e))?;
    Ok(ApiResponse::success(rows))
}

/// PATCH /notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    Path(id): Path<String>,
) -> ApiResult<Row> {
    let row = NotificationService::new(state.store.as_ref())
        .mark_read(&identity, &id)
        .await
        .map_err(|e| notification_error(&state, "Failed to update notification", e))?;
    Ok(ApiResponse::success(row))
}
