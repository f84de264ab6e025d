use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{compare_values, id_of, stamp_insert, stamp_update, Filter, Query, Row, Store, StoreError};
use crate::registry::{Collection, ID_FIELD, OWNER_FIELD};

/// Process-local store used when no database is configured in development,
/// and as the storage double in tests. Every call is counted, and the store
/// can be switched into a failing mode to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Collection, BTreeMap<String, Row>>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of store calls, reads and writes alike.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that could have written rows.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Direct read of a collection, bypassing call accounting.
    pub async fn rows(&self, collection: Collection) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Seeds rows without touching call counters.
    pub async fn seed(&self, collection: Collection, rows: impl IntoIterator<Item = Row>) {
        let now = now();
        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        for mut row in rows {
            stamp_insert(&mut row, &now);
            let id = ensure_id(&mut row);
            table.insert(id, row);
        }
    }

    fn enter(&self, write: bool) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if write {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is in failing mode".into()));
        }
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ensure_id(row: &mut Row) -> String {
    match id_of(row) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.enter(false)?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&collection)
            .map(|table| {
                table
                    .values()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let rows = rows.into_iter().skip(query.offset as usize);
        Ok(match query.limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<u64, StoreError> {
        self.enter(false)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(&collection)
            .map(|table| table.values().filter(|row| matches_all(row, filters)).count() as u64)
            .unwrap_or(0))
    }

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Row>, StoreError> {
        self.enter(false)?;
        let tables = self.tables.read().await;
        Ok(tables.get(&collection).and_then(|table| table.get(id)).cloned())
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> Result<Row, StoreError> {
        self.enter(true)?;
        stamp_insert(&mut row, &now());
        let id = ensure_id(&mut row);

        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        if table.contains_key(&id) {
            return Err(StoreError::Conflict {
                collection,
                message: format!("duplicate key {}", id),
            });
        }
        table.insert(id, row.clone());
        Ok(row)
    }

    async fn upsert(&self, collection: Collection, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        self.enter(true)?;
        let now = now();

        // Validate the whole batch before touching the table.
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let id = id_of(&row).ok_or_else(|| {
                StoreError::QueryError("upsert row is missing its id".to_string())
            })?;
            keyed.push((id, row));
        }

        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        let mut written = Vec::with_capacity(keyed.len());
        for (id, mut row) in keyed {
            if let Some(old) = table.get(&id) {
                if row.contains_key(OWNER_FIELD) && old.get(OWNER_FIELD) != row.get(OWNER_FIELD) {
                    continue;
                }
            }
            if let Some(created_at) = table.get(&id).and_then(|old| old.get("created_at")) {
                if row.get("created_at").map_or(true, Value::is_null) {
                    row.insert("created_at".to_string(), created_at.clone());
                }
            }
            stamp_insert(&mut row, &now);
            table.insert(id, row.clone());
            written.push(row);
        }
        Ok(written)
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        mut patch: Row,
    ) -> Result<Option<Row>, StoreError> {
        self.enter(true)?;
        stamp_update(&mut patch, &now());
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.get_mut(&collection).and_then(|t| t.get_mut(id)) else {
            return Ok(None);
        };
        for (key, value) in patch {
            existing.insert(key, value);
        }
        Ok(Some(existing.clone()))
    }

    async fn delete_by_id(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        self.enter(true)?;
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(&collection)
            .map(|table| table.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_rows_with_the_same_id() {
        let store = MemoryStore::new();
        let first = vec![row(json!({"id": "r1", "user_id": "u1", "title": "a"}))];
        let second = vec![row(json!({"id": "r1", "user_id": "u1", "title": "b"}))];

        store.upsert(Collection::Tasks, first).await.unwrap();
        store.upsert(Collection::Tasks, second).await.unwrap();

        let rows = store.rows(Collection::Tasks).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "b");
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn upsert_skips_rows_owned_by_someone_else() {
        let store = MemoryStore::new();
        store
            .upsert(Collection::Tasks, vec![row(json!({"id": "r1", "user_id": "u2", "title": "theirs"}))])
            .await
            .unwrap();
        let written = store
            .upsert(
                Collection::Tasks,
                vec![
                    row(json!({"id": "r1", "user_id": "u1", "title": "mine"})),
                    row(json!({"id": "r2", "user_id": "u1", "title": "new"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["id"], "r2");
        let rows = store.rows(Collection::Tasks).await;
        let r1 = rows.iter().find(|r| r["id"] == "r1").unwrap();
        assert_eq!(r1["user_id"], "u2");
        assert_eq!(r1["title"], "theirs");
    }

    #[tokio::test]
    async fn upsert_without_id_writes_nothing() {
        let store = MemoryStore::new();
        let batch = vec![
            row(json!({"id": "r1", "title": "ok"})),
            row(json!({"title": "missing id"})),
        ];
        assert!(store.upsert(Collection::Tasks, batch).await.is_err());
        assert!(store.rows(Collection::Tasks).await.is_empty());
    }

    #[tokio::test]
    async fn select_orders_and_pages() {
        let store = MemoryStore::new();
        store
            .seed(
                Collection::Notifications,
                (1..=5).map(|i| {
                    row(json!({
                        "id": format!("n{i}"),
                        "user_id": "u1",
                        "created_at": format!("2024-01-0{i}T00:00:00.000Z"),
                    }))
                }),
            )
            .await;

        let query = Query::owned_by("u1").newest_first("created_at").page(2, 1);
        let rows = store.select(Collection::Notifications, &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["n4", "n3"]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store.insert(Collection::Users, row(json!({"id": "user_1"}))).await.unwrap();
        let err = store.insert(Collection::Users, row(json!({"id": "user_1"}))).await;
        assert!(matches!(err, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn reads_are_not_counted_as_writes() {
        let store = MemoryStore::new();
        store.seed(Collection::Tasks, [row(json!({"id": "r1", "user_id": "u1"}))]).await;
        store.find_by_id(Collection::Tasks, "r1").await.unwrap();
        store.count(Collection::Tasks, &[]).await.unwrap();
        assert_eq!((store.calls(), store.writes()), (2, 0));

        store.delete_by_id(Collection::Tasks, "r1").await.unwrap();
        assert_eq!((store.calls(), store.writes()), (3, 1));
    }

    #[tokio::test]
    async fn failing_mode_surfaces_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.ping().await.is_err());
        assert_eq!(store.calls(), 1);
    }
}
