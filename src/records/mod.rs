//! Single-record CRUD for the `/api/<entity>` family.
//!
//! Every lookup by id checks the stored owner against the caller. A row
//! owned by someone else is reported exactly like a missing row, so callers
//! cannot probe for the existence of other users' ids.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthenticatedIdentity;
use crate::database::{Query, Row, Store, StoreError};
use crate::registry::{RestEntity, ID_FIELD, OWNER_FIELD};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{}", .0.not_found_message())]
    NotFound(RestEntity),

    #[error("{0}")]
    InvalidBody(String),

    /// The client-chosen id is taken. Reads the same whoever owns the row.
    #[error("{} with this id already exists", .0.singular())]
    DuplicateId(RestEntity),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub struct RecordService<'a> {
    store: &'a dyn Store,
    entity: RestEntity,
}

fn is_owned_by(row: &Row, subject: &str) -> bool {
    matches!(row.get(OWNER_FIELD), Some(Value::String(owner)) if owner == subject)
}

fn object_body(body: Value) -> Result<Row, RecordError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::InvalidBody("Request body must be a JSON object".to_string())),
    }
}

impl<'a> RecordService<'a> {
    pub fn new(store: &'a dyn Store, entity: RestEntity) -> Self {
        Self { store, entity }
    }

    pub async fn list(&self, identity: &AuthenticatedIdentity) -> Result<Vec<Row>, RecordError> {
        let query = Query::owned_by(&identity.subject).newest_first("updated_at");
        Ok(self.store.select(self.entity.collection(), &query).await?)
    }

    pub async fn get(&self, identity: &AuthenticatedIdentity, id: &str) -> Result<Row, RecordError> {
        match self.store.find_by_id(self.entity.collection(), id).await? {
            Some(row) if is_owned_by(&row, &identity.subject) => Ok(row),
            _ => Err(RecordError::NotFound(self.entity)),
        }
    }

    /// The owner is always the caller; an `id` is generated when absent.
    /// A client id that already exists is refused without saying whose it is.
    pub async fn create(&self, identity: &AuthenticatedIdentity, body: Value) -> Result<Row, RecordError> {
        let mut row = object_body(body)?;
        row.insert(OWNER_FIELD.to_string(), Value::String(identity.subject.clone()));
        let has_id = matches!(row.get(ID_FIELD), Some(Value::String(s)) if !s.is_empty())
            || matches!(row.get(ID_FIELD), Some(Value::Number(_)));
        if !has_id {
            row.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
        }

        let created = match self.store.insert(self.entity.collection(), row).await {
            Ok(created) => created,
            Err(StoreError::Conflict { .. }) => return Err(RecordError::DuplicateId(self.entity)),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(entity = %self.entity.path(), subject = %identity.subject, "Created record");
        Ok(created)
    }

    /// Ownership cannot be reassigned: `user_id` (and `id`) are stripped
    /// from the patch before it is applied.
    pub async fn update(
        &self,
        identity: &AuthenticatedIdentity,
        id: &str,
        body: Value,
    ) -> Result<Row, RecordError> {
        let mut patch = object_body(body)?;
        patch.remove(OWNER_FIELD);
        patch.remove(ID_FIELD);

        self.get(identity, id).await?;
        self.store
            .update_by_id(self.entity.collection(), id, patch)
            .await?
            .ok_or(RecordError::NotFound(self.entity))
    }

    pub async fn delete(&self, identity: &AuthenticatedIdentity, id: &str) -> Result<(), RecordError> {
        self.get(identity, id).await?;
        if self.store.delete_by_id(self.entity.collection(), id).await? {
            tracing::info!(entity = %self.entity.path(), subject = %identity.subject, "Deleted record");
            Ok(())
        } else {
            Err(RecordError::NotFound(self.entity))
        }
    }
}
