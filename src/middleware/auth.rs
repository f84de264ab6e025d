use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::auth::{AuthenticatedIdentity, VerifyError};
use crate::error::ApiError;
use crate::state::AppState;

/// Session authentication middleware: validates the bearer token with the
/// identity-verification capability and attaches the caller's identity to
/// the request. Nothing downstream runs when this fails.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers()).map_err(ApiError::unauthorized)?;

    let identity = state.verifier.verify(token).await.map_err(|e| {
        tracing::warn!(error = %e, "Session token verification failed");
        match e {
            VerifyError::Expired => ApiError::unauthorized("Token has expired"),
            VerifyError::MissingSubject => ApiError::unauthorized("Invalid session token"),
            _ => ApiError::unauthorized("Invalid or expired token"),
        }
    })?;

    tracing::debug!(subject = %identity.subject, "Authenticated request");
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Extract the token from an `Authorization: Bearer <token>` header
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or("Missing or malformed Authorization header")?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Missing or malformed Authorization header")?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or("Missing or malformed Authorization header")?
        .trim();

    if token.is_empty() {
        return Err("No token provided");
    }
    Ok(token)
}

/// Handlers take the identity as an extractor; a route that forgot the
/// middleware answers 401 instead of running unscoped.
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
