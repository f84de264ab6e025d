use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;
use crate::webhooks::{DispatchError, DispatchOutcome, Dispatcher, WebhookError};

/// POST /webhooks/clerk - identity-provider events
///
/// The signature is checked over the raw bytes before anything is parsed.
/// A failed provisioning answers 500 so the provider redelivers; a failed
/// welcome email does not.
pub async fn identity_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(verifier) = state.webhooks.as_deref() else {
        tracing::error!("Webhook received but no signing secret is configured");
        return Err(ApiError::Internal("Webhook secret not configured".to_string()));
    };

    let event = verifier.verify(&headers, &body).map_err(|e| {
        tracing::warn!(error = %e, "Rejected webhook");
        match e {
            WebhookError::MissingHeaders => ApiError::bad_request("Missing svix verification headers"),
            WebhookError::InvalidPayload(_) => ApiError::bad_request("Invalid webhook payload"),
            _ => ApiError::bad_request("Invalid webhook signature"),
        }
    })?;

    let dispatcher = Dispatcher::new(state.store.as_ref(), state.mailer.as_ref());
    match dispatcher.dispatch(event).await {
        Ok(DispatchOutcome::Provisioned { user_id, welcome }) => {
            tracing::debug!(%user_id, ?welcome, "Webhook processed");
        }
        Ok(DispatchOutcome::Ignored { .. }) => {}
        Err(err @ DispatchError::Malformed { .. }) => {
            tracing::warn!(error = %err, "Malformed webhook event");
            return Err(ApiError::bad_request(err.to_string()));
        }
        Err(err @ DispatchError::Provisioning { .. }) => {
            return Err(state.internal("Failed to process user.created event", err));
        }
    }

    Ok(Json(json!({ "received": true })))
}
