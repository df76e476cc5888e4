//! Persistence layer: the adapter trait, its libSQL backend and typed helpers.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, Filter, RecordKey, Table};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DatabaseError;

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, DatabaseError> {
    serde_json::to_value(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_value<T: DeserializeOwned>(
    table: Table,
    value: serde_json::Value,
) -> Result<T, DatabaseError> {
    serde_json::from_value(value)
        .map_err(|e| DatabaseError::Serialization(format!("{table} record: {e}")))
}

/// Load and deserialize one record.
pub async fn load<T: DeserializeOwned>(
    db: &dyn Database,
    table: Table,
    key: &RecordKey,
) -> Result<Option<T>, DatabaseError> {
    match db.get(table, key).await? {
        Some(value) => Ok(Some(from_value(table, value)?)),
        None => Ok(None),
    }
}

/// Serialize and upsert one record.
pub async fn save<T: Serialize>(
    db: &dyn Database,
    table: Table,
    key: &RecordKey,
    record: &T,
) -> Result<(), DatabaseError> {
    db.upsert(table, key, &to_value(record)?).await?;
    Ok(())
}

/// Serialize and upsert one record unless the stored copy's `field`
/// timestamp is at least as new. Returns whether it was written.
pub async fn save_if_newer<T: Serialize>(
    db: &dyn Database,
    table: Table,
    key: &RecordKey,
    record: &T,
    field: &str,
) -> Result<bool, DatabaseError> {
    db.upsert_if_newer(table, key, &to_value(record)?, field).await
}

/// Query and deserialize every matching record.
pub async fn list<T: DeserializeOwned>(
    db: &dyn Database,
    table: Table,
    filter: &Filter,
) -> Result<Vec<T>, DatabaseError> {
    db.query(table, filter)
        .await?
        .into_iter()
        .map(|value| from_value(table, value))
        .collect()
}

/// Conditionally create a record, returning whichever record is stored
/// under `key` afterwards and whether this call created it.
pub async fn create_if_absent<T: Serialize + DeserializeOwned>(
    db: &dyn Database,
    table: Table,
    key: &RecordKey,
    record: &T,
) -> Result<(T, bool), DatabaseError> {
    let (stored, inserted) = db.insert_if_absent(table, key, &to_value(record)?).await?;
    Ok((from_value(table, stored)?, inserted))
}
