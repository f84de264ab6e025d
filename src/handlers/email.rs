use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::AuthenticatedIdentity;
use crate::email::{digest, templates, DigestStats};
use crate::error::ApiError;
use crate::state::AppState;

async fn recipient_for(state: &AppState, identity: &AuthenticatedIdentity, public: &str) -> Result<String, ApiError> {
    digest::recipient(state.store.as_ref(), &identity.subject)
        .await
        .map_err(|e| state.internal(public, e))?
        .ok_or_else(|| {
            tracing::warn!(subject = %identity.subject, "No email address on file");
            ApiError::not_found("User email not found")
        })
}

/// POST /email/daily-digest - today's activity summary for the caller
pub async fn daily_digest(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to send daily digest";
    let to = recipient_for(&state, &identity, FAILED).await?;

    let since = digest::start_of_day(Utc::now());
    let stats = digest::collect_stats(state.store.as_ref(), &identity.subject, since)
        .await
        .map_err(|e| state.internal(FAILED, e))?;

    state
        .mailer
        .send(templates::daily_digest(&to, &stats))
        .await
        .map_err(|e| state.internal(FAILED, e))?;

    tracing::info!(subject = %identity.subject, "Daily digest sent");
    Ok(Json(json!({
        "success": true,
        "message": "Daily digest sent",
        "stats": stats,
    })))
}

/// POST /email/test - digest with fixed sample figures
pub async fn test_email(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<Value>, ApiError> {
    const FAILED: &str = "Failed to send test email";
    let to = recipient_for(&state, &identity, FAILED).await?;

    state
        .mailer
        .send(templates::daily_digest(&to, &DigestStats::sample()))
        .await
        .map_err(|e| state.internal(FAILED, e))?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Test email sent to {}", to),
    })))
}
