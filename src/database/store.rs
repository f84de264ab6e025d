use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

use crate::registry::{Collection, OWNER_FIELD};

/// A loosely typed row as stored and returned by the storage capability.
pub type Row = Map<String, Value>;

/// Errors from a `Store` implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Conflict on {collection}: {message}")]
    Conflict { collection: Collection, message: String },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Row predicate understood by every store
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn owner(subject: &str) -> Self {
        Filter::eq(OWNER_FIELD, subject)
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _) | Filter::Gte(field, _) => field,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Filter::Eq(_, value) | Filter::Gte(_, value) => value,
        }
    }

    /// In-process evaluation, shared by the memory store and tests.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, expected) => actual == expected,
            Filter::Gte(_, bound) => {
                !actual.is_null() && compare_values(actual, bound) != Ordering::Less
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Select specification: filters, one ordering column, optional page window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Query {
    pub fn owned_by(subject: &str) -> Self {
        Self {
            filters: vec![Filter::owner(subject)],
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn newest_first(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

/// Storage capability. Implementations must apply `upsert` batches
/// atomically: either every row is written or none is.
#[async_trait]
pub trait Store: Send + Sync {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Row>, StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError>;

    /// Insert-or-replace keyed on `id`. Last write wins; there is no
    /// field-level merge and no concurrency check.
    async fn upsert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        patch: Row,
    ) -> Result<Option<Row>, StoreError>;

    async fn delete_by_id(&self, collection: Collection, id: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Renders the `id` of a row (string or number) as the lookup key.
pub fn id_of(row: &Row) -> Option<String> {
    match row.get(crate::registry::ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fills `created_at`/`updated_at` on a row about to be inserted, keeping
/// client-supplied values. Offline clients merge on their own timestamps.
pub fn stamp_insert(row: &mut Row, now: &str) {
    for field in ["created_at", "updated_at"] {
        let missing = row.get(field).map_or(true, Value::is_null);
        if missing {
            row.insert(field.to_string(), Value::String(now.to_string()));
        }
    }
}

/// Server-side edits always move `updated_at` forward.
pub fn stamp_update(patch: &mut Row, now: &str) {
    patch.insert("updated_at".to_string(), Value::String(now.to_string()));
}

/// Total order over JSON scalars used for in-process sorting. Nulls sort
/// before everything else; mixed types fall back to their rendered form.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
