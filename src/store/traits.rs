//! Backend-agnostic persistence adapter.
//!
//! The engine only ever talks to storage through the primitives on
//! [`Database`]: keyed upsert, conditional create, newer-only upsert,
//! keyed get and equality query. Uniqueness of a key is enforced by the backend, not by locks in
//! the engine, so several engine instances can share one store.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DatabaseError;

/// Logical tables the engine stores records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Sessions,
    Progress,
    Achievements,
    Snapshots,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Progress => "progress",
            Self::Achievements => "achievements",
            Self::Snapshots => "snapshots",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a record within its table.
///
/// Composite keys are joined with `/`, so `(session, step)` pairs map to a
/// single unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn pair(first: &str, second: &str) -> Self {
        Self(format!("{first}/{second}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equality filter over top-level fields of stored records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// A filter that matches every record in the table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builder: require `field == value`.
    pub fn field_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Whether a record satisfies every condition.
    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| record.get(field).unwrap_or(&Value::Null) == expected)
    }
}

/// The persistence adapter contract.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create tables and run pending migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Insert or replace the record stored under `key`. Last write wins.
    async fn upsert(&self, table: Table, key: &RecordKey, record: &Value)
    -> Result<Value, DatabaseError>;

    /// Insert the record only if `key` is free.
    ///
    /// Returns the record now stored under `key` and whether this call
    /// inserted it.
    async fn insert_if_absent(
        &self,
        table: Table,
        key: &RecordKey,
        record: &Value,
    ) -> Result<(Value, bool), DatabaseError>;

    /// Write the record unless the stored copy is at least as new.
    ///
    /// `field` names a top-level RFC 3339 timestamp compared by the backend
    /// inside the write itself (millisecond resolution). A free key is
    /// always written. Returns whether this call wrote.
    async fn upsert_if_newer(
        &self,
        table: Table,
        key: &RecordKey,
        record: &Value,
        field: &str,
    ) -> Result<bool, DatabaseError>;

    /// Fetch the record stored under `key`.
    async fn get(&self, table: Table, key: &RecordKey) -> Result<Option<Value>, DatabaseError>;

    /// All records matching `filter`, in insertion order.
    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_are_distinct_per_pair() {
        assert_eq!(RecordKey::pair("s1", "a").as_str(), "s1/a");
        assert_ne!(RecordKey::pair("s1", "a"), RecordKey::pair("s1", "b"));
    }

    #[test]
    fn filter_matches_on_all_conditions() {
        let record = serde_json::json!({"session_id": "s1", "status": "completed"});
        assert!(Filter::all().matches(&record));
        assert!(Filter::all().field_eq("session_id", "s1").matches(&record));
        assert!(
            !Filter::all()
                .field_eq("session_id", "s1")
                .field_eq("status", "failed")
                .matches(&record)
        );
        assert!(!Filter::all().field_eq("missing", "x").matches(&record));
    }
}
