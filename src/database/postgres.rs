use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Row as _};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::store::{id_of, stamp_insert, stamp_update, Filter, Query, Row, Store, StoreError};
use crate::config::DatabaseConfig;
use crate::registry::{Collection, ID_FIELD, OWNER_FIELD};

/// Columns never rewritten by an upsert conflict.
const IMMUTABLE_ON_CONFLICT: [&str; 2] = [ID_FIELD, "created_at"];

/// Postgres-backed store. Rows travel as JSON and are mapped onto table
/// columns with `jsonb_populate_record(set)`, so column types are coerced by
/// the database rather than by this layer.
pub struct PgStore {
    pool: PgPool,
    columns: Arc<RwLock<HashMap<Collection, Arc<BTreeSet<String>>>>>,
}

impl PgStore {
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;
        info!(max_connections = config.max_connections, "Connected database pool");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            columns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Column names of a collection's table, loaded once and cached.
    async fn columns(&self, collection: Collection) -> Result<Arc<BTreeSet<String>>, StoreError> {
        // Fast path: try read lock
        {
            let columns = self.columns.read().await;
            if let Some(set) = columns.get(&collection) {
                return Ok(set.clone());
            }
        }

        let rows = sqlx::query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(collection.table_name())
        .fetch_all(&self.pool)
        .await?;

        let set: BTreeSet<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("column_name"))
            .filter(|name| is_valid_identifier(name))
            .collect();
        if set.is_empty() {
            return Err(StoreError::QueryError(format!(
                "table {} has no columns or does not exist",
                collection
            )));
        }

        let set = Arc::new(set);
        self.columns.write().await.insert(collection, set.clone());
        debug!(%collection, columns = set.len(), "Cached table columns");
        Ok(set)
    }

    /// Keys present in the given rows that are real columns, in a stable order.
    async fn writable_columns<'a>(
        &self,
        collection: Collection,
        rows: impl IntoIterator<Item = &'a Row>,
    ) -> Result<Vec<String>, StoreError> {
        let known = self.columns(collection).await?;
        let mut present = BTreeSet::new();
        for row in rows {
            for key in row.keys() {
                if known.contains(key) {
                    present.insert(key.clone());
                }
            }
        }
        Ok(present.into_iter().collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Quote SQL identifier to prevent injection
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names coming from clients are only ever used after being matched
/// against `information_schema`; this is a second gate on their shape.
fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders `WHERE` predicates. Every comparison value is coerced to the
/// column's own type by populating a one-field record of the table type.
fn where_clause(
    table: &str,
    filters: &[Filter],
    first_param: usize,
) -> Result<(String, Vec<Value>), StoreError> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());
    for (i, filter) in filters.iter().enumerate() {
        let field = filter.field();
        if !is_valid_identifier(field) {
            return Err(StoreError::InvalidIdentifier(field.to_string()));
        }
        let column = quote_identifier(field);
        let op = match filter {
            Filter::Eq(..) => "=",
            Filter::Gte(..) => ">=",
        };
        clauses.push(format!(
            "t.{column} {op} (jsonb_populate_record(NULL::{table}, ${n}::jsonb)).{column}",
            n = first_param + i
        ));
        let mut probe = serde_json::Map::new();
        probe.insert(field.to_string(), filter.value().clone());
        params.push(Value::Object(probe));
    }
    if clauses.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
    }
}

/// Batch upsert keyed on `id`. `id` and `created_at` never change on
/// conflict. When the batch carries an owner column, a conflicting row owned
/// by someone else is left untouched and drops out of RETURNING.
fn upsert_sql(table_name: &str, columns: &[String]) -> String {
    let table = quote_identifier(table_name);
    let column_list = columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ");
    let updates = columns
        .iter()
        .filter(|c| !IMMUTABLE_ON_CONFLICT.contains(&c.as_str()))
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_identifier(c)))
        .collect::<Vec<_>>();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else if columns.iter().any(|c| c == OWNER_FIELD) {
        format!(
            "DO UPDATE SET {} WHERE t.{owner} = EXCLUDED.{owner}",
            updates.join(", "),
            owner = quote_identifier(OWNER_FIELD)
        )
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    // One statement, so the batch commits or fails as a unit.
    format!(
        "INSERT INTO {table} AS t ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, $1::jsonb) \
         ON CONFLICT (\"id\") {conflict_action} \
         RETURNING row_to_json(t) AS row"
    )
}

fn row_from_json(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::QueryError(format!("unexpected row shape: {}", other))),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = quote_identifier(collection.table_name());
        let (where_sql, params) = where_clause(&table, &query.filters, 1)?;

        let mut sql = format!("SELECT row_to_json(t) AS row FROM {table} t{where_sql}");
        if let Some(order) = &query.order {
            if !is_valid_identifier(&order.column) {
                return Err(StoreError::InvalidIdentifier(order.column.clone()));
            }
            let direction = if order.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY t.{} {}", quote_identifier(&order.column), direction));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }

        let mut q = sqlx::query(&sql);
        for p in params {
            q = q.bind(Json(p));
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| row_from_json(row.try_get::<Value, _>("row")?))
            .collect()
    }

    async fn count(&self, collection: Collection, filters: &[Filter]) -> Result<u64, StoreError> {
        let table = quote_identifier(collection.table_name());
        let (where_sql, params) = where_clause(&table, filters, 1)?;
        let sql = format!("SELECT COUNT(*) AS count FROM {table} t{where_sql}");

        let mut q = sqlx::query(&sql);
        for p in params {
            q = q.bind(Json(p));
        }
        let row = q.fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Row>, StoreError> {
        let table = quote_identifier(collection.table_name());
        let sql = format!("SELECT row_to_json(t) AS row FROM {table} t WHERE t.\"id\"::text = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|row| row_from_json(row.try_get::<Value, _>("row")?))
            .transpose()
    }

    async fn insert(&self, collection: Collection, mut row: Row) -> Result<Row, StoreError> {
        stamp_insert(&mut row, &now());
        let columns = self.writable_columns(collection, [&row]).await?;
        let table = quote_identifier(collection.table_name());
        let column_list = columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", ");

        let sql = format!(
            "INSERT INTO {table} AS t ({column_list}) \
             SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1::jsonb) \
             RETURNING row_to_json(t) AS row"
        );
        let result = sqlx::query(&sql)
            .bind(Json(Value::Object(row)))
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => row_from_json(row.try_get::<Value, _>("row")?),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict {
                collection,
                message: db.message().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, collection: Collection, mut rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let now = now();
        for row in rows.iter_mut() {
            if id_of(row).is_none() {
                return Err(StoreError::QueryError("upsert row is missing its id".to_string()));
            }
            stamp_insert(row, &now);
        }

        let columns = self.writable_columns(collection, rows.iter()).await?;
        let sql = upsert_sql(collection.table_name(), &columns);
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());
        let written = sqlx::query(&sql).bind(Json(payload)).fetch_all(&self.pool).await?;
        written
            .into_iter()
            .map(|row| row_from_json(row.try_get::<Value, _>("row")?))
            .collect()
    }

    async fn update_by_id(
        &self,
        collection: Collection,
        id: &str,
        mut patch: Row,
    ) -> Result<Option<Row>, StoreError> {
        stamp_update(&mut patch, &now());
        let columns = self.writable_columns(collection, [&patch]).await?;
        let columns: Vec<_> = columns.into_iter().filter(|c| c != ID_FIELD).collect();
        if columns.is_empty() {
            return self.find_by_id(collection, id).await;
        }

        let table = quote_identifier(collection.table_name());
        let assignments = columns
            .iter()
            .map(|c| format!("{col} = p.{col}", col = quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} AS t SET {assignments} \
             FROM jsonb_populate_record(NULL::{table}, $2::jsonb) AS p \
             WHERE t.\"id\"::text = $1 \
             RETURNING row_to_json(t) AS row"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Json(Value::Object(patch)))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_from_json(row.try_get::<Value, _>("row")?))
            .transpose()
    }

    async fn delete_by_id(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let table = quote_identifier(collection.table_name());
        let sql = format!("DELETE FROM {table} WHERE \"id\"::text = $1");
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
