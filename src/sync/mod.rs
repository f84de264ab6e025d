//! Offline-sync protocol: full per-user reads and bounded batch upserts.
//!
//! Reads return every row the caller owns, most recently changed first, so a
//! client can apply "newest wins" locally. There is no pagination on this
//! path; the cost grows with the size of a user's collection.
//!
//! Upserts are last-write-wins keyed on `id`. Two devices writing the same
//! `id` concurrently may clobber each other; nothing here serializes them.

use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::AuthenticatedIdentity;
use crate::database::{Query, Row, Store, StoreError};
use crate::registry::{Entity, ID_FIELD, OWNER_FIELD};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("\"items\" must be an array")]
    ItemsNotArray,

    #[error("Batch size exceeds maximum of {max} items")]
    BatchTooLarge { max: usize, got: usize },

    #[error("items[{index}] {reason}")]
    InvalidItem { index: usize, reason: String },

    #[error("Failed to access {entity}: {source}")]
    Storage {
        entity: Entity,
        #[source]
        source: StoreError,
    },
}

/// One client-supplied record after scoping.
///
/// The owner is a separate, server-assigned field: whatever the client put
/// under `user_id` is dropped when the envelope is built, so a row can only
/// ever be written for the authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Natural key as sent by the client (string or number).
    pub id: Value,
    pub owner: String,
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    pub fn from_client(item: Value, owner: &str) -> Result<Self, String> {
        let Value::Object(mut fields) = item else {
            return Err("must be an object".to_string());
        };
        fields.remove(OWNER_FIELD);

        let id = fields.remove(ID_FIELD).unwrap_or(Value::Null);
        let valid_id = match &id {
            Value::String(s) => !s.trim().is_empty(),
            Value::Number(_) => true,
            _ => false,
        };
        if !valid_id {
            return Err("is missing a string or numeric \"id\"".to_string());
        }

        Ok(Self {
            id,
            owner: owner.to_string(),
            fields,
        })
    }

    pub fn key(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_row(self) -> Row {
        let mut row = self.fields;
        row.insert(ID_FIELD.to_string(), self.id);
        row.insert(OWNER_FIELD.to_string(), Value::String(self.owner));
        row
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub data: Vec<Row>,
    pub upserted: usize,
}

pub struct SyncEngine<'a> {
    store: &'a dyn Store,
    max_batch: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a dyn Store, max_batch: usize) -> Self {
        Self { store, max_batch }
    }

    pub async fn read(&self, entity: Entity, identity: &AuthenticatedIdentity) -> Result<Vec<Row>, SyncError> {
        let query = Query::owned_by(&identity.subject).newest_first("updated_at");
        let rows = self
            .store
            .select(entity.collection(), &query)
            .await
            .map_err(|source| SyncError::Storage { entity, source })?;
        debug!(%entity, subject = %identity.subject, rows = rows.len(), "Sync read");
        Ok(rows)
    }

    /// Validates the whole batch before the single storage call; any
    /// validation failure means nothing is written.
    pub async fn batch_upsert(
        &self,
        entity: Entity,
        identity: &AuthenticatedIdentity,
        items: Option<Value>,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(Value::Array(items)) = items else {
            return Err(SyncError::ItemsNotArray);
        };

        if items.is_empty() {
            return Ok(SyncOutcome {
                data: Vec::new(),
                upserted: 0,
            });
        }
        if items.len() > self.max_batch {
            return Err(SyncError::BatchTooLarge {
                max: self.max_batch,
                got: items.len(),
            });
        }

        let records = self.scope(items, &identity.subject)?;
        let rows: Vec<Row> = records.into_iter().map(SyncRecord::into_row).collect();

        let data = self
            .store
            .upsert(entity.collection(), rows)
            .await
            .map_err(|source| SyncError::Storage { entity, source })?;

        info!(%entity, subject = %identity.subject, upserted = data.len(), "Sync upsert");
        Ok(SyncOutcome {
            upserted: data.len(),
            data,
        })
    }

    fn scope(&self, items: Vec<Value>, owner: &str) -> Result<Vec<SyncRecord>, SyncError> {
        let mut seen = HashSet::with_capacity(items.len());
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let record = SyncRecord::from_client(item, owner)
                    .map_err(|reason| SyncError::InvalidItem { index, reason })?;
                if !seen.insert(record.key()) {
                    return Err(SyncError::InvalidItem {
                        index,
                        reason: format!("repeats id \"{}\" from earlier in the batch", record.key()),
                    });
                }
                Ok(record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use serde_json::json;

    fn identity(subject: &str) -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            subject: subject.to_string(),
            claims: Map::new(),
        }
    }

    #[test]
    fn envelope_replaces_client_owner() {
        let record = SyncRecord::from_client(json!({"id": "r1", "user_id": "u2", "title": "x"}), "u1").unwrap();
        assert_eq!(record.owner, "u1");
        assert!(!record.fields.contains_key("user_id"));
        let row = record.into_row();
        assert_eq!(row["user_id"], "u1");
        assert_eq!(row["id"], "r1");
        assert_eq!(row["title"], "x");
    }

    #[test]
    fn envelope_requires_object_with_id() {
        assert!(SyncRecord::from_client(json!("r1"), "u1").is_err());
        assert!(SyncRecord::from_client(json!({"title": "x"}), "u1").is_err());
        assert!(SyncRecord::from_client(json!({"id": "  "}), "u1").is_err());
        assert_eq!(SyncRecord::from_client(json!({"id": 7}), "u1").unwrap().key(), "7");
    }

    #[tokio::test]
    async fn missing_items_is_not_an_array() {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(&store, 500);
        let err = engine.batch_upsert(Entity::Tasks, &identity("u1"), None).await.unwrap_err();
        assert!(matches!(err, SyncError::ItemsNotArray));
        let err = engine
            .batch_upsert(Entity::Tasks, &identity("u1"), Some(json!({"id": "r1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ItemsNotArray));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_batch_touches_nothing() {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(&store, 500);
        let items: Vec<Value> = (0..501).map(|i| json!({"id": format!("r{i}")})).collect();
        let err = engine
            .batch_upsert(Entity::Habits, &identity("u1"), Some(Value::Array(items)))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BatchTooLarge { max: 500, got: 501 }));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn batch_of_exactly_max_is_accepted() {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(&store, 500);
        let items: Vec<Value> = (0..500).map(|i| json!({"id": format!("r{i}")})).collect();
        let outcome = engine
            .batch_upsert(Entity::Habits, &identity("u1"), Some(Value::Array(items)))
            .await
            .unwrap();
        assert_eq!(outcome.upserted, 500);
    }

    #[tokio::test]
    async fn one_bad_item_rejects_the_batch() {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(&store, 500);
        let items = json!([{"id": "r1"}, {"title": "no id"}]);
        let err = engine
            .batch_upsert(Entity::Goals, &identity("u1"), Some(items))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidItem { index: 1, .. }));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_are_rejected() {
        let store = MemoryStore::new();
        let engine = SyncEngine::new(&store, 500);
        let items = json!([{"id": "r1"}, {"id": "r1"}]);
        let err = engine
            .batch_upsert(Entity::Goals, &identity("u1"), Some(items))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidItem { index: 1, .. }));
    }

    #[tokio::test]
    async fn read_is_scoped_and_newest_first() {
        let store = MemoryStore::new();
        store
            .seed(
                Entity::Journal.collection(),
                [
                    json!({"id": "a", "user_id": "u1", "updated_at": "2024-01-01T00:00:00.000Z"}),
                    json!({"id": "b", "user_id": "u1", "updated_at": "2024-03-01T00:00:00.000Z"}),
                    json!({"id": "c", "user_id": "u2", "updated_at": "2024-02-01T00:00:00.000Z"}),
                ]
                .into_iter()
                .map(|v| v.as_object().cloned().unwrap()),
            )
            .await;

        let engine = SyncEngine::new(&store, 500);
        let rows = engine.read(Entity::Journal, &identity("u1")).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
