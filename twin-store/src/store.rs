use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use twin_core::TwinResult;

use crate::record::{FieldValue, NewRecord, Record, Row};
use crate::schema::{MigrationReport, TableSchema};

/// Sort direction for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Column-value changes applied in place by `update` / `update_row`.
pub type Changes = BTreeMap<String, FieldValue>;

/// The record store: per-component tables with date-ordered records,
/// plus free-form custom tables.
///
/// Range semantics are part of the contract:
/// - `records_in_range` is half-open `[start, end)`.
/// - `records_after` is strictly after (`date > after`), ascending.
/// - `records_before` is strictly before (`date < before`), returned
///   latest-first.
/// - Ties on `date` preserve insertion order (id order).
///
/// Updates are true in-place updates: the row id never changes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the table if absent, else additively add any missing
    /// columns (never drop, never narrow). Idempotent.
    async fn ensure_table(&self, schema: &TableSchema) -> TwinResult<MigrationReport>;

    async fn table_exists(&self, table: &str) -> TwinResult<bool>;

    /// Release backend resources. No-op for in-memory stores.
    async fn close(&self) -> TwinResult<()> {
        Ok(())
    }

    // ---- typed record operations (component tables) ----

    async fn insert(&self, table: &str, record: NewRecord) -> TwinResult<Record>;

    async fn get(&self, table: &str, id: i64) -> TwinResult<Option<Record>>;

    async fn latest(&self, table: &str) -> TwinResult<Option<Record>>;

    async fn first(&self, table: &str) -> TwinResult<Option<Record>>;

    async fn list(
        &self,
        table: &str,
        limit: Option<usize>,
        order: SortOrder,
    ) -> TwinResult<Vec<Record>>;

    async fn records_in_range(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
        order: SortOrder,
    ) -> TwinResult<Vec<Record>>;

    async fn records_after(
        &self,
        table: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> TwinResult<Vec<Record>>;

    async fn records_before(
        &self,
        table: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> TwinResult<Vec<Record>>;

    async fn update(&self, table: &str, id: i64, changes: Changes) -> TwinResult<Record>;

    async fn delete(&self, table: &str, id: i64) -> TwinResult<()>;

    async fn count(&self, table: &str) -> TwinResult<usize>;

    // ---- row operations (custom tables) ----

    async fn insert_row(&self, table: &str, values: Changes) -> TwinResult<Row>;

    async fn get_row(&self, table: &str, id: i64) -> TwinResult<Option<Row>>;

    async fn list_rows(&self, table: &str, limit: Option<usize>) -> TwinResult<Vec<Row>>;

    async fn update_row(&self, table: &str, id: i64, changes: Changes) -> TwinResult<Row>;

    async fn delete_row(&self, table: &str, id: i64) -> TwinResult<()>;
}
