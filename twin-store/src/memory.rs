use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use twin_core::{TwinError, TwinResult};

use crate::record::{FieldValue, NewRecord, Record, Row};
use crate::schema::{validate_column_name, validate_table_name, ColumnType, MigrationReport, TableSchema};
use crate::store::{Changes, RecordStore, SortOrder};
use crate::users::{User, UserStore};

struct TableData {
    schema: TableSchema,
    next_id: i64,
    rows: Vec<Row>,
}

#[derive(Debug, Clone)]
struct UserRow {
    id: i64,
    external_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RoleRow {
    id: i64,
    name: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct UserData {
    next_user_id: i64,
    next_role_id: i64,
    users: Vec<UserRow>,
    roles: Vec<RoleRow>,
    links: Vec<(i64, i64, DateTime<Utc>)>,
}

/// In-memory record store for testing and single-node development.
///
/// One write lock guards all tables; user reconciliation takes the user
/// lock for its whole read-modify-write, which is the transactional
/// boundary the trait requires.
pub struct MemoryRecordStore {
    tables: Arc<RwLock<HashMap<String, TableData>>>,
    users: Arc<RwLock<UserData>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(UserData::default())),
        }
    }

    fn check_values(schema: &TableSchema, values: &Changes, require_all: bool) -> TwinResult<()> {
        for (column, value) in values {
            let def = schema.column(column).ok_or_else(|| {
                TwinError::validation(format!(
                    "unknown column {:?} for table {:?}",
                    column, schema.name
                ))
                .into_anyhow()
            })?;

            let ok = match value {
                FieldValue::Null => def.nullable,
                FieldValue::Text(_) => def.column_type == ColumnType::Text,
                FieldValue::Integer(_) => def.column_type == ColumnType::Integer,
                FieldValue::Float(_) => def.column_type == ColumnType::Float,
                FieldValue::Boolean(_) => def.column_type == ColumnType::Boolean,
                FieldValue::Timestamp(_) => def.column_type == ColumnType::Timestamp,
                FieldValue::Json(_) => def.column_type == ColumnType::Json,
            };
            if !ok {
                return Err(TwinError::validation(format!(
                    "column {:?} of table {:?} does not accept {:?}",
                    column, schema.name, value
                ))
                .into_anyhow());
            }
        }

        if require_all {
            for def in &schema.columns {
                if !def.nullable && !values.contains_key(&def.name) {
                    return Err(TwinError::validation(format!(
                        "missing value for non-nullable column {:?} of table {:?}",
                        def.name, schema.name
                    ))
                    .into_anyhow());
                }
            }
        }

        Ok(())
    }

    fn record_from_row(table: &str, row: Row) -> TwinResult<Record> {
        Record::from_row(row).ok_or_else(|| {
            TwinError::database(format!("table {table:?} holds a row without record columns"))
                .into_anyhow()
        })
    }

    /// Rows of a table sorted ascending by `(date, id)`; the id
    /// tiebreak preserves insertion order on equal dates.
    fn sorted_records(table: &str, data: &TableData) -> TwinResult<Vec<Record>> {
        let mut records = data
            .rows
            .iter()
            .cloned()
            .map(|row| Self::record_from_row(table, row))
            .collect::<TwinResult<Vec<_>>>()?;
        records.sort_by_key(|r| (r.date, r.id));
        Ok(records)
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&TableData) -> TwinResult<T>,
    ) -> TwinResult<T> {
        let tables = self.tables.read();
        let data = tables
            .get(table)
            .ok_or_else(|| TwinError::database(format!("no such table: {table:?}")).into_anyhow())?;
        f(data)
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableData) -> TwinResult<T>,
    ) -> TwinResult<T> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| TwinError::database(format!("no such table: {table:?}")).into_anyhow())?;
        f(data)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure_table(&self, schema: &TableSchema) -> TwinResult<MigrationReport> {
        validate_table_name(&schema.name)?;
        for column in &schema.columns {
            validate_column_name(&column.name)?;
        }

        let mut tables = self.tables.write();
        match tables.get_mut(&schema.name) {
            None => {
                tables.insert(
                    schema.name.clone(),
                    TableData {
                        schema: schema.clone(),
                        next_id: 1,
                        rows: Vec::new(),
                    },
                );
                debug!(table = %schema.name, "created table");
                Ok(MigrationReport {
                    table: schema.name.clone(),
                    created: true,
                    added_columns: Vec::new(),
                })
            }
            Some(existing) => {
                let mut added = Vec::new();
                for column in &schema.columns {
                    if existing.schema.column(&column.name).is_none() {
                        // Additive migration: new columns arrive nullable
                        // so existing rows stay valid.
                        let mut column = column.clone();
                        column.nullable = true;
                        existing.schema.columns.push(column.clone());
                        added.push(column.name);
                    }
                }
                if !added.is_empty() {
                    debug!(table = %schema.name, columns = ?added, "migrated table");
                }
                Ok(MigrationReport {
                    table: schema.name.clone(),
                    created: false,
                    added_columns: added,
                })
            }
        }
    }

    async fn table_exists(&self, table: &str) -> TwinResult<bool> {
        Ok(self.tables.read().contains_key(table))
    }

    async fn insert(&self, table: &str, record: NewRecord) -> TwinResult<Record> {
        let values = record.into_values();
        let row = self.insert_row(table, values).await?;
        Self::record_from_row(table, row)
    }

    async fn get(&self, table: &str, id: i64) -> TwinResult<Option<Record>> {
        match self.get_row(table, id).await? {
            Some(row) => Ok(Some(Self::record_from_row(table, row)?)),
            None => Ok(None),
        }
    }

    async fn latest(&self, table: &str) -> TwinResult<Option<Record>> {
        self.with_table(table, |data| {
            Ok(Self::sorted_records(table, data)?.into_iter().next_back())
        })
    }

    async fn first(&self, table: &str) -> TwinResult<Option<Record>> {
        self.with_table(table, |data| {
            Ok(Self::sorted_records(table, data)?.into_iter().next())
        })
    }

    async fn list(
        &self,
        table: &str,
        limit: Option<usize>,
        order: SortOrder,
    ) -> TwinResult<Vec<Record>> {
        self.with_table(table, |data| {
            let mut records = Self::sorted_records(table, data)?;
            if order == SortOrder::Desc {
                records.reverse();
            }
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            Ok(records)
        })
    }

    async fn records_in_range(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
        order: SortOrder,
    ) -> TwinResult<Vec<Record>> {
        self.with_table(table, |data| {
            let mut records: Vec<Record> = Self::sorted_records(table, data)?
                .into_iter()
                .filter(|r| r.date >= start && r.date < end)
                .collect();
            if order == SortOrder::Desc {
                records.reverse();
            }
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            Ok(records)
        })
    }

    async fn records_after(
        &self,
        table: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> TwinResult<Vec<Record>> {
        self.with_table(table, |data| {
            let mut records: Vec<Record> = Self::sorted_records(table, data)?
                .into_iter()
                .filter(|r| r.date > after)
                .collect();
            records.truncate(limit);
            Ok(records)
        })
    }

    async fn records_before(
        &self,
        table: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> TwinResult<Vec<Record>> {
        self.with_table(table, |data| {
            let mut records: Vec<Record> = Self::sorted_records(table, data)?
                .into_iter()
                .filter(|r| r.date < before)
                .collect();
            records.reverse();
            records.truncate(limit);
            Ok(records)
        })
    }

    async fn update(&self, table: &str, id: i64, changes: Changes) -> TwinResult<Record> {
        let row = self.update_row(table, id, changes).await?;
        Self::record_from_row(table, row)
    }

    async fn delete(&self, table: &str, id: i64) -> TwinResult<()> {
        self.delete_row(table, id).await
    }

    async fn count(&self, table: &str) -> TwinResult<usize> {
        self.with_table(table, |data| Ok(data.rows.len()))
    }

    async fn insert_row(&self, table: &str, values: Changes) -> TwinResult<Row> {
        self.with_table_mut(table, |data| {
            Self::check_values(&data.schema, &values, true)?;
            let row = Row {
                id: data.next_id,
                values,
            };
            data.next_id += 1;
            data.rows.push(row.clone());
            Ok(row)
        })
    }

    async fn get_row(&self, table: &str, id: i64) -> TwinResult<Option<Row>> {
        self.with_table(table, |data| {
            Ok(data.rows.iter().find(|r| r.id == id).cloned())
        })
    }

    async fn list_rows(&self, table: &str, limit: Option<usize>) -> TwinResult<Vec<Row>> {
        self.with_table(table, |data| {
            let mut rows = data.rows.clone();
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }

    async fn update_row(&self, table: &str, id: i64, changes: Changes) -> TwinResult<Row> {
        self.with_table_mut(table, |data| {
            Self::check_values(&data.schema, &changes, false)?;
            let row = data
                .rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| {
                    TwinError::not_found(format!("no row {id} in table {table:?}")).into_anyhow()
                })?;
            // In-place update: the id and insertion position are kept.
            for (column, value) in changes {
                row.values.insert(column, value);
            }
            Ok(row.clone())
        })
    }

    async fn delete_row(&self, table: &str, id: i64) -> TwinResult<()> {
        self.with_table_mut(table, |data| {
            let before = data.rows.len();
            data.rows.retain(|r| r.id != id);
            if data.rows.len() == before {
                return Err(
                    TwinError::not_found(format!("no row {id} in table {table:?}")).into_anyhow(),
                );
            }
            Ok(())
        })
    }
}

#[async_trait]
impl UserStore for MemoryRecordStore {
    async fn find_by_external_id(&self, external_id: &str) -> TwinResult<Option<User>> {
        let data = self.users.read();
        Ok(data
            .users
            .iter()
            .find(|u| u.external_id == external_id)
            .map(|u| materialize(&data, u)))
    }

    async fn reconcile(&self, external_id: &str, roles: &[String]) -> TwinResult<User> {
        let now = Utc::now();
        // The whole read-modify-write happens under one write lock:
        // the in-memory equivalent of the SQL transaction.
        let mut data = self.users.write();

        let user_id = match data.users.iter().position(|u| u.external_id == external_id) {
            Some(pos) => data.users[pos].id,
            None => {
                data.next_user_id += 1;
                let id = data.next_user_id;
                data.users.push(UserRow {
                    id,
                    external_id: external_id.to_string(),
                    created_at: now,
                    updated_at: now,
                });
                debug!(external_id, "created user");
                id
            }
        };

        // (a) insert absent roles into the master list
        for role in roles {
            if !data.roles.iter().any(|r| &r.name == role) {
                data.next_role_id += 1;
                let id = data.next_role_id;
                data.roles.push(RoleRow {
                    id,
                    name: role.clone(),
                    created_at: now,
                });
            }
        }

        // (b) delete the user's existing links
        data.links.retain(|(uid, _, _)| *uid != user_id);

        // (c) insert one link per current role
        let role_ids: Vec<i64> = roles
            .iter()
            .filter_map(|role| data.roles.iter().find(|r| &r.name == role).map(|r| r.id))
            .collect();
        for role_id in role_ids {
            data.links.push((user_id, role_id, now));
        }

        // (d) bump updated_at
        let user = data
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .expect("user row inserted above");
        user.updated_at = now;
        let user = user.clone();

        Ok(materialize(&data, &user))
    }
}

fn materialize(data: &UserData, user: &UserRow) -> User {
    let roles = data
        .links
        .iter()
        .filter(|(uid, _, _)| *uid == user.id)
        .filter_map(|(_, rid, _)| data.roles.iter().find(|r| r.id == *rid))
        .map(|r| r.name.clone())
        .collect();
    User {
        id: user.id,
        external_id: user.external_id.clone(),
        created_at: user.created_at,
        updated_at: user.updated_at,
        roles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::columns;
    use crate::schema::ColumnDef;
    use chrono::Duration;

    async fn seeded_store() -> (MemoryRecordStore, DateTime<Utc>) {
        let store = MemoryRecordStore::new();
        store
            .ensure_table(&TableSchema::records("weather"))
            .await
            .unwrap();

        let t0 = Utc::now();
        for i in 0..3 {
            store
                .insert(
                    "weather",
                    NewRecord::new(
                        "weather",
                        "application/json",
                        format!("weather/{i}"),
                        t0 + Duration::seconds(i),
                    ),
                )
                .await
                .unwrap();
        }
        (store, t0)
    }

    #[tokio::test]
    async fn range_is_half_open_and_descending_when_asked() {
        let (store, t0) = seeded_store().await;

        let records = store
            .records_in_range(
                "weather",
                t0,
                t0 + Duration::seconds(2),
                None,
                SortOrder::Desc,
            )
            .await
            .unwrap();

        // [t0, t0+2s) excludes the record at t0+2s.
        assert_eq!(records.len(), 2);
        assert!(records[0].date > records[1].date);
    }

    #[tokio::test]
    async fn records_after_is_strict() {
        let (store, t0) = seeded_store().await;

        let records = store
            .records_after("weather", t0 + Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, t0 + Duration::seconds(2));
    }

    #[tokio::test]
    async fn ties_on_date_preserve_insertion_order() {
        let store = MemoryRecordStore::new();
        store
            .ensure_table(&TableSchema::records("ticks"))
            .await
            .unwrap();

        let t = Utc::now();
        for i in 0..3 {
            store
                .insert(
                    "ticks",
                    NewRecord::new("ticks", "text/plain", format!("ticks/{i}"), t),
                )
                .await
                .unwrap();
        }

        let records = store.list("ticks", None, SortOrder::Asc).await.unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let latest = store.latest("ticks").await.unwrap().unwrap();
        assert_eq!(latest.id, 3);
    }

    #[tokio::test]
    async fn migration_is_additive_and_idempotent() {
        let store = MemoryRecordStore::new();
        store
            .ensure_table(&TableSchema::records("gltf"))
            .await
            .unwrap();

        // Second startup with the richer schema adds only the new
        // columns, nullable.
        let report = store.ensure_table(&TableSchema::assets("gltf")).await.unwrap();
        assert!(!report.created);
        assert!(report
            .added_columns
            .contains(&columns::IS_PUBLIC.to_string()));

        // Third startup reports no changes.
        let report = store.ensure_table(&TableSchema::assets("gltf")).await.unwrap();
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn invalid_table_name_fails_before_touching_the_store() {
        let store = MemoryRecordStore::new();
        let err = store
            .ensure_table(&TableSchema::records("users; DROP TABLE x--"))
            .await
            .unwrap_err();
        let twin = TwinError::from_anyhow(&err).unwrap();
        assert_eq!(twin.kind, twin_core::ErrorKind::Configuration);
        assert!(!store.table_exists("users; DROP TABLE x--").await.unwrap());
    }

    #[tokio::test]
    async fn update_is_in_place() {
        let (store, _) = seeded_store().await;

        let mut changes = Changes::new();
        changes.insert(columns::URL.to_string(), FieldValue::from("weather/new"));
        let updated = store.update("weather", 2, changes).await.unwrap();

        assert_eq!(updated.id, 2);
        assert_eq!(updated.url, "weather/new");
        assert_eq!(store.count("weather").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn rejects_values_of_the_wrong_type() {
        let (store, _) = seeded_store().await;

        let mut changes = Changes::new();
        changes.insert(columns::URL.to_string(), FieldValue::Integer(9));
        let err = store.update("weather", 1, changes).await.unwrap_err();
        let twin = TwinError::from_anyhow(&err).unwrap();
        assert_eq!(twin.kind, twin_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn custom_table_rows_crud() {
        let store = MemoryRecordStore::new();
        let schema = TableSchema::new(
            "sensors",
            vec![
                ColumnDef::new("label", ColumnType::Text),
                ColumnDef::new("height_m", ColumnType::Float).nullable(),
            ],
        );
        store.ensure_table(&schema).await.unwrap();

        let mut values = Changes::new();
        values.insert("label".to_string(), FieldValue::from("north-mast"));
        let row = store.insert_row("sensors", values).await.unwrap();
        assert_eq!(row.id, 1);

        let mut changes = Changes::new();
        changes.insert("height_m".to_string(), FieldValue::Float(12.5));
        let row = store.update_row("sensors", 1, changes).await.unwrap();
        assert_eq!(row.get("height_m"), Some(&FieldValue::Float(12.5)));

        store.delete_row("sensors", 1).await.unwrap();
        assert!(store.get_row("sensors", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_replaces_the_role_set() {
        let store = MemoryRecordStore::new();

        let user = store
            .reconcile("kc-123", &["editor".to_string(), "viewer".to_string()])
            .await
            .unwrap();
        assert_eq!(user.roles.len(), 2);

        // Any prior state is replaced, not merged.
        let user = store
            .reconcile("kc-123", &["admin".to_string()])
            .await
            .unwrap();
        assert_eq!(user.roles, vec!["admin".to_string()]);

        // Same user row, bumped timestamps.
        let found = store.find_by_external_id("kc-123").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(found.updated_at >= found.created_at);
    }

    #[tokio::test]
    async fn reconcile_creates_users_lazily() {
        let store = MemoryRecordStore::new();
        assert!(store.find_by_external_id("ghost").await.unwrap().is_none());

        let user = store.reconcile("ghost", &[]).await.unwrap();
        assert!(user.roles.is_empty());
        assert!(store.find_by_external_id("ghost").await.unwrap().is_some());
    }
}
