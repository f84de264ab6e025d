use std::sync::Arc;
use std::time::Instant;

use crate::auth::TokenVerifier;
use crate::config::AppConfig;
use crate::database::Store;
use crate::email::Mailer;
use crate::error::ApiError;
use crate::webhooks::WebhookVerifier;

/// Capabilities shared by every handler. Built once at startup; cloning is
/// a handful of reference-count bumps.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// `None` when no webhook secret is configured.
    pub webhooks: Option<Arc<WebhookVerifier>>,
    pub mailer: Arc<dyn Mailer>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        verifier: Arc<dyn TokenVerifier>,
        webhooks: Option<WebhookVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            verifier,
            webhooks: webhooks.map(Arc::new),
            mailer,
            started_at: Instant::now(),
        }
    }

    /// Shorthand for a logged 500 whose detail respects the environment.
    pub fn internal(&self, public: &str, detail: impl std::fmt::Display) -> ApiError {
        ApiError::internal(self.config.environment, public, detail)
    }
}
