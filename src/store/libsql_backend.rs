//! libSQL implementation of the `Database` trait.
//!
//! Every logical table lives in one `records` table keyed on
//! `(table_name, record_key)` with the record body stored as JSON text.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Database, Filter, RecordKey, Table};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn fetch(&self, table: Table, key: &RecordKey) -> Result<Option<Value>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM records WHERE table_name = ?1 AND record_key = ?2",
                params![table.as_str(), key.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get {table}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_value(table, &row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get {table}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn encode(record: &Value) -> Result<String, DatabaseError> {
    serde_json::to_string(record).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_value(table: Table, row: &libsql::Row) -> Result<Value, DatabaseError> {
    let data: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("{table}.data: {e}")))?;
    serde_json::from_str(&data)
        .map_err(|e| DatabaseError::Serialization(format!("{table} row parse: {e}")))
}

/// Field names are spliced into the JSON path, so only plain identifiers pass.
fn is_plain_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !field.starts_with(|c: char| c.is_ascii_digit())
}

/// Map a JSON scalar to the value `json_extract` yields for it.
fn json_to_sql(value: &Value) -> Result<libsql::Value, DatabaseError> {
    match value {
        Value::String(s) => Ok(libsql::Value::Text(s.clone())),
        Value::Bool(b) => Ok(libsql::Value::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(libsql::Value::Integer(i)),
            None => Ok(libsql::Value::Real(n.as_f64().unwrap_or(0.0))),
        },
        Value::Null => Ok(libsql::Value::Null),
        Value::Array(_) | Value::Object(_) => Err(DatabaseError::Query(
            "filters only support scalar values".to_string(),
        )),
    }
}

/// Build the WHERE clause and positional parameters for a filter.
fn filter_sql(table: Table, filter: &Filter) -> Result<(String, Vec<libsql::Value>), DatabaseError> {
    let mut clause = String::from("table_name = ?1");
    let mut values = vec![libsql::Value::Text(table.as_str().to_string())];

    for (field, expected) in filter.conditions() {
        if !is_plain_field(field) {
            return Err(DatabaseError::Query(format!("invalid filter field '{field}'")));
        }
        if expected.is_null() {
            clause.push_str(&format!(" AND json_extract(data, '$.{field}') IS NULL"));
            continue;
        }
        values.push(json_to_sql(expected)?);
        clause.push_str(&format!(
            " AND json_extract(data, '$.{field}') = ?{}",
            values.len()
        ));
    }

    Ok((clause, values))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    async fn upsert(
        &self,
        table: Table,
        key: &RecordKey,
        record: &Value,
    ) -> Result<Value, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO records (table_name, record_key, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (table_name, record_key) DO UPDATE SET data = ?3, updated_at = ?4",
                params![table.as_str(), key.as_str(), encode(record)?, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert {table}: {e}")))?;

        debug!(table = %table, key = %key, "Record upserted");
        Ok(record.clone())
    }

    async fn insert_if_absent(
        &self,
        table: Table,
        key: &RecordKey,
        record: &Value,
    ) -> Result<(Value, bool), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO records (table_name, record_key, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (table_name, record_key) DO NOTHING",
                params![table.as_str(), key.as_str(), encode(record)?, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_if_absent {table}: {e}")))?
            > 0;

        let stored = self.fetch(table, key).await?.ok_or_else(|| {
            DatabaseError::Query(format!("insert_if_absent {table}: record {key} vanished"))
        })?;

        debug!(table = %table, key = %key, inserted, "Conditional insert");
        Ok((stored, inserted))
    }

    async fn upsert_if_newer(
        &self,
        table: Table,
        key: &RecordKey,
        record: &Value,
        field: &str,
    ) -> Result<bool, DatabaseError> {
        if !is_plain_field(field) {
            return Err(DatabaseError::Query(format!("invalid timestamp field '{field}'")));
        }
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO records (table_name, record_key, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (table_name, record_key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
             WHERE json_extract(records.data, '$.{field}') IS NULL
                OR julianday(json_extract(excluded.data, '$.{field}'))
                   > julianday(json_extract(records.data, '$.{field}'))"
        );
        let written = self
            .conn()
            .execute(&sql, params![table.as_str(), key.as_str(), encode(record)?, now])
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_if_newer {table}: {e}")))?
            > 0;

        debug!(table = %table, key = %key, written, "Conditional upsert");
        Ok(written)
    }

    async fn get(&self, table: Table, key: &RecordKey) -> Result<Option<Value>, DatabaseError> {
        self.fetch(table, key).await
    }

    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, DatabaseError> {
        let (clause, values) = filter_sql(table, filter)?;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT data FROM records WHERE {clause} ORDER BY rowid"),
                Params::Positional(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query {table}: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(row_to_value(table, &row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("query {table}: {e}"))),
            }
        }
        Ok(records)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
