#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

use mylife_gateway::auth::{issue_session_token, JwtVerifier, SessionClaims};
use mylife_gateway::config::AppConfig;
use mylife_gateway::database::{MemoryStore, Row};
use mylife_gateway::email::{EmailMessage, MailError, Mailer};
use mylife_gateway::registry::Collection;
use mylife_gateway::webhooks::{WebhookVerifier, HEADER_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use mylife_gateway::{app, AppState};

pub const SECRET: &str = "integration-test-secret";
pub const WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

/// Captures outgoing mail instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if self.failing {
            return Err(MailError::Rejected {
                status: 503,
                message: "provider unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub struct Builder {
    config: AppConfig,
    mailer: RecordingMailer,
    webhooks: bool,
}

impl Builder {
    pub fn production(mut self) -> Self {
        let security = self.config.security.clone();
        self.config = AppConfig::production();
        self.config.security = security;
        self
    }

    pub fn failing_mailer(mut self) -> Self {
        self.mailer = RecordingMailer::failing();
        self
    }

    pub fn without_webhook_secret(mut self) -> Self {
        self.webhooks = false;
        self
    }

    pub fn max_batch(mut self, max: usize) -> Self {
        self.config.sync.max_batch = max;
        self
    }

    pub fn build(self) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(self.mailer);
        let verifier = JwtVerifier::new(SECRET, None).expect("test verifier");
        let webhooks = self
            .webhooks
            .then(|| WebhookVerifier::new(WEBHOOK_SECRET).expect("test webhook secret"));

        let state = AppState::new(self.config, store.clone(), Arc::new(verifier), webhooks, mailer.clone());
        TestApp {
            router: app(state),
            store,
            mailer,
        }
    }
}

impl TestApp {
    pub fn builder() -> Builder {
        let mut config = AppConfig::development();
        config.security.auth_secret_key = SECRET.to_string();
        Builder {
            config,
            mailer: RecordingMailer::default(),
            webhooks: true,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Signed delivery as the identity provider would send it.
    pub async fn deliver_webhook(&self, payload: &Value) -> Result<(StatusCode, Value)> {
        let body = serde_json::to_vec(payload)?;
        let id = "msg_integration";
        let timestamp = Utc::now().timestamp().to_string();
        let signature = WebhookVerifier::new(WEBHOOK_SECRET)?.sign(id, &timestamp, &body);
        self.deliver_raw(id, &timestamp, &signature, body).await
    }

    pub async fn deliver_raw(
        &self,
        id: &str,
        timestamp: &str,
        signature: &str,
        body: Vec<u8>,
    ) -> Result<(StatusCode, Value)> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/clerk")
            .header(header::CONTENT_TYPE, "application/json")
            .header(HEADER_ID, id)
            .header(HEADER_TIMESTAMP, timestamp)
            .header(HEADER_SIGNATURE, signature)
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn seed(&self, collection: Collection, rows: Vec<Value>) {
        self.store
            .seed(collection, rows.into_iter().filter_map(|v| v.as_object().cloned()))
            .await;
    }

    pub async fn rows(&self, collection: Collection) -> Vec<Row> {
        self.store.rows(collection).await
    }
}

pub fn token(subject: &str) -> String {
    issue_session_token(SECRET, &SessionClaims::new(subject, None, 1)).expect("test token")
}
