use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use super::WebhookEvent;
use crate::database::{Row, Store, StoreError};
use crate::email::{templates, Mailer};
use crate::registry::Collection;

/// The only event kind with side effects.
pub const USER_CREATED: &str = "user.created";

/// Greeting used when the provider sent neither first nor last name.
const FALLBACK_NAME: &str = "there";

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event is signed but cannot be acted on; redelivery will not help.
    #[error("Malformed {kind} event: {reason}")]
    Malformed { kind: String, reason: String },

    /// The required phase failed; the provider should redeliver.
    #[error("Failed to provision user {user_id}: {source}")]
    Provisioning {
        user_id: String,
        #[source]
        source: StoreError,
    },
}

/// Outcome of the best-effort phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WelcomeStatus {
    Sent,
    SkippedNoEmail,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Provisioned { user_id: String, welcome: WelcomeStatus },
    Ignored { kind: String },
}

/// User record derived from a `user.created` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: String,
    pub email: Option<String>,
    pub name: String,
}

impl NewUser {
    pub fn from_event_data(data: &Map<String, Value>) -> Result<Self, DispatchError> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DispatchError::Malformed {
                kind: USER_CREATED.to_string(),
                reason: "missing user id".to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            email: primary_email(data),
            name: display_name(data),
        })
    }

    fn into_row(self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id));
        row.insert("email".into(), self.email.map(Value::String).unwrap_or(Value::Null));
        row.insert("name".into(), Value::String(self.name));
        row.insert(
            "created_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        row
    }
}

/// The address flagged as primary, else the first address listed.
fn primary_email(data: &Map<String, Value>) -> Option<String> {
    let addresses = data.get("email_addresses").and_then(Value::as_array)?;
    let address_of = |entry: &Value| {
        entry
            .get("email_address")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let primary_id = data.get("primary_email_address_id").and_then(Value::as_str);
    primary_id
        .and_then(|pid| {
            addresses
                .iter()
                .find(|entry| entry.get("id").and_then(Value::as_str) == Some(pid))
        })
        .and_then(address_of)
        .or_else(|| addresses.first().and_then(address_of))
}

fn display_name(data: &Map<String, Value>) -> String {
    let parts: Vec<&str> = ["first_name", "last_name"]
        .iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        parts.join(" ")
    }
}

/// Routes verified events to their side effects.
pub struct Dispatcher<'a> {
    store: &'a dyn Store,
    mailer: &'a dyn Mailer,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a dyn Store, mailer: &'a dyn Mailer) -> Self {
        Self { store, mailer }
    }

    pub async fn dispatch(&self, event: WebhookEvent) -> Result<DispatchOutcome, DispatchError> {
        match event.kind.as_str() {
            USER_CREATED => self.user_created(&event.data).await,
            _ => {
                info!(event_type = %event.kind, "Acknowledged webhook event without action");
                Ok(DispatchOutcome::Ignored { kind: event.kind })
            }
        }
    }

    /// Phase one (insert the user) is required; phase two (welcome email)
    /// is best effort and never fails the event.
    async fn user_created(&self, data: &Map<String, Value>) -> Result<DispatchOutcome, DispatchError> {
        let user = NewUser::from_event_data(data)?;
        let user_id = user.id.clone();
        let email = user.email.clone();
        let name = user.name.clone();

        self.store
            .insert(Collection::Users, user.into_row())
            .await
            .map_err(|source| DispatchError::Provisioning {
                user_id: user_id.clone(),
                source,
            })?;
        info!(user_id = %user_id, has_email = email.is_some(), "Provisioned user from webhook");

        let welcome = match email {
            None => WelcomeStatus::SkippedNoEmail,
            Some(address) => match self.mailer.send(templates::welcome(&address, &name)).await {
                Ok(()) => {
                    info!(user_id = %user_id, "Welcome email sent");
                    WelcomeStatus::Sent
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Failed to send welcome email (non-fatal)");
                    WelcomeStatus::Failed(e.to_string())
                }
            },
        };

        Ok(DispatchOutcome::Provisioned { user_id, welcome })
    }
}
