use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::AuthenticatedIdentity;
use crate::database::{Filter, Query, Row, Store, StoreError};
use crate::registry::{Collection, OWNER_FIELD};

pub const DEFAULT_KIND: &str = "general";
pub const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{0}")]
    Invalid(String),

    #[error("Notification not found")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Validated input of `POST /notifications/send`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub title: String,
    pub body: String,
    pub kind: String,
    pub metadata: Map<String, Value>,
}

impl NewNotification {
    pub fn parse(input: Value) -> Result<Self, NotificationError> {
        let mut input = match input {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let required = |field: &str, value: Option<Value>| match value {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Err(NotificationError::Invalid(format!(
                "\"{}\" is required and must be a string",
                field
            ))),
        };
        let title = required("title", input.remove("title"))?;
        let body = required("body", input.remove("body"))?;

        let kind = match input.remove("type") {
            None | Some(Value::Null) => DEFAULT_KIND.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::String(_)) => DEFAULT_KIND.to_string(),
            Some(_) => return Err(NotificationError::Invalid("\"type\" must be a string".into())),
        };
        let metadata = match input.remove("metadata") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(NotificationError::Invalid("\"metadata\" must be an object".into())),
        };

        Ok(Self {
            title,
            body,
            kind,
            metadata,
        })
    }

    fn into_row(self, owner: &str) -> Row {
        let mut row = Row::new();
        row.insert(OWNER_FIELD.into(), Value::String(owner.to_string()));
        row.insert("title".into(), Value::String(self.title));
        row.insert("body".into(), Value::String(self.body));
        row.insert("type".into(), Value::String(self.kind));
        row.insert("metadata".into(), Value::Object(self.metadata));
        row.insert("read".into(), Value::Bool(false));
        row.insert(
            "created_at".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        row
    }
}

/// Query string of `GET /notifications`. Kept as strings so that bad numbers
/// produce our own 400 message rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub unread_only: Option<String>,
}

impl ListParams {
    pub fn into_query(self, owner: &str, max_limit: u32) -> Result<Query, NotificationError> {
        let parse = |name: &str, raw: Option<String>, default: u32| match raw {
            None => Ok(default),
            Some(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| NotificationError::Invalid(format!("\"{}\" must be a non-negative integer", name))),
        };
        let limit = parse("limit", self.limit, DEFAULT_LIMIT)?.clamp(1, max_limit.max(1));
        let offset = parse("offset", self.offset, 0)?;

        let mut query = Query::owned_by(owner).newest_first("created_at").page(limit, offset);
        if self.unread_only.as_deref() == Some("true") {
            query = query.filter(Filter::eq("read", false));
        }
        Ok(query)
    }
}

pub struct NotificationService<'a> {
    store: &'a dyn Store,
}

impl<'a> NotificationService<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn send(
        &self,
        identity: &AuthenticatedIdentity,
        notification: NewNotification,
    ) -> Result<Row, NotificationError> {
        let row = notification.into_row(&identity.subject);
        let created = self.store.insert(Collection::Notifications, row).await?;
        tracing::info!(subject = %identity.subject, "Created notification");
        Ok(created)
    }

    pub async fn list(&self, query: &Query) -> Result<Vec<Row>, NotificationError> {
        Ok(self.store.select(Collection::Notifications, query).await?)
    }

    /// The read flag is the only field that changes after creation.
    pub async fn mark_read(&self, identity: &AuthenticatedIdentity, id: &str) -> Result<Row, NotificationError> {
        let owned = self
            .store
            .find_by_id(Collection::Notifications, id)
            .await?
            .filter(|row| row.get(OWNER_FIELD).and_then(Value::as_str) == Some(identity.subject.as_str()));
        if owned.is_none() {
            return Err(NotificationError::NotFound);
        }

        let mut patch = Row::new();
        patch.insert("read".into(), Value::Bool(true));
        self.store
            .update_by_id(Collection::Notifications, id, patch)
            .await?
            .ok_or(NotificationError::NotFound)
    }
}
