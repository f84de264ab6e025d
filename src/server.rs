use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Extension, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::handlers;
use crate::middleware::session_auth_middleware;
use crate::registry::RestEntity;
use crate::state::AppState;

/// The full application router. Tests drive this directly with `oneshot`.
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.api.max_request_size_bytes;
    let cors = cors_layer(&state.config.security);

    Router::new()
        // Public
        .route("/health", get(handlers::health::health))
        .merge(webhook_routes())
        // Session-authenticated
        .merge(sync_routes(&state))
        .merge(api_routes(&state))
        .merge(notification_routes(&state))
        .merge(email_routes(&state))
        // Global middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn webhook_routes() -> Router<AppState> {
    use handlers::webhooks;

    Router::new().route("/webhooks/clerk", post(webhooks::identity_provider))
}

fn sync_routes(state: &AppState) -> Router<AppState> {
    use handlers::sync;

    Router::new()
        .route("/sync/:entity", get(sync::read))
        .route("/sync/:entity/sync", post(sync::upsert))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_auth_middleware))
}

/// One `/api/<entity>` router per REST entity, all sharing the same handlers.
fn api_routes(state: &AppState) -> Router<AppState> {
    use handlers::records;

    RestEntity::ALL.iter().fold(Router::new(), |router, entity| {
        let entity_router = Router::new()
            .route("/", get(records::list).post(records::create))
            .route(
                "/:id",
                get(records::get).put(records::update).delete(records::delete),
            )
            .route_layer(middleware::from_fn_with_state(state.clone(), session_auth_middleware))
            .layer(Extension(*entity));
        router.nest(&format!("/api/{}", entity.path()), entity_router)
    })
}

fn notification_routes(state: &AppState) -> Router<AppState> {
    use handlers::notifications;

    Router::new()
        .route("/notifications", get(notifications::list))
        .route("/notifications/send", post(notifications::send))
        .route("/notifications/:id/read", patch(notifications::mark_read))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_auth_middleware))
}

fn email_routes(state: &AppState) -> Router<AppState> {
    use handlers::email;

    Router::new()
        .route("/email/daily-digest", post(email::daily_digest))
        .route("/email/test", post(email::test_email))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_auth_middleware))
}

/// `*` mirrors the caller's origin so credentialed requests still work;
/// anything else is an explicit allow-list.
fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let origin = if security.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = security
            .cors_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}
