//! Caller-declared tables with CRUD endpoints. No blobs involved: rows
//! are pure column data validated against the declared schema.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use twin_core::{TwinError, TwinResult};
use twin_store::{Changes, ColumnDef, ColumnType, FieldValue, RecordStore, Row, TableSchema};

use crate::component::ComponentContext;
use crate::config::ComponentConfig;
use crate::endpoint::{EndpointRequest, EndpointResponse, EndpointSpec};

/// Framework-provided component owning one custom table.
pub struct CustomTableManager {
    config: ComponentConfig,
    columns: Vec<ColumnDef>,
}

impl CustomTableManager {
    pub fn new(config: ComponentConfig, columns: Vec<ColumnDef>) -> Self {
        Self { config, columns }
    }

    pub fn configuration(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(&self.config.name, self.columns.clone())
    }

    pub fn endpoints(&self, ctx: &ComponentContext) -> Vec<EndpointSpec> {
        let state = Arc::new(TableState {
            table: self.config.name.clone(),
            columns: self.columns.clone(),
            records: ctx.records.clone(),
        });

        vec![
            {
                let state = state.clone();
                EndpointSpec::post("/", move |req| {
                    let state = state.clone();
                    async move { state.insert(req).await }
                })
            },
            {
                let state = state.clone();
                EndpointSpec::get("/", move |req| {
                    let state = state.clone();
                    async move { state.list(req).await }
                })
            },
            {
                let state = state.clone();
                EndpointSpec::get("/{id}", move |req| {
                    let state = state.clone();
                    async move { state.get_one(req).await }
                })
            },
            {
                let state = state.clone();
                EndpointSpec::patch("/{id}", move |req| {
                    let state = state.clone();
                    async move { state.update(req).await }
                })
            },
            {
                let state = state.clone();
                EndpointSpec::delete("/{id}", move |req| {
                    let state = state.clone();
                    async move { state.delete(req).await }
                })
            },
        ]
    }
}

struct TableState {
    table: String,
    columns: Vec<ColumnDef>,
    records: Arc<dyn RecordStore>,
}

/// Convert one JSON field into the declared column type.
fn field_from_json(def: &ColumnDef, value: &serde_json::Value) -> TwinResult<FieldValue> {
    use serde_json::Value;

    let mismatch = || {
        TwinError::validation(format!(
            "column {:?} expects {:?}, got {value}",
            def.name, def.column_type
        ))
        .into_anyhow()
    };

    Ok(match (def.column_type, value) {
        (_, Value::Null) => FieldValue::Null,
        (ColumnType::Text, Value::String(s)) => FieldValue::Text(s.clone()),
        (ColumnType::Integer, Value::Number(n)) => {
            FieldValue::Integer(n.as_i64().ok_or_else(mismatch)?)
        }
        (ColumnType::Float, Value::Number(n)) => {
            FieldValue::Float(n.as_f64().ok_or_else(mismatch)?)
        }
        (ColumnType::Boolean, Value::Bool(b)) => FieldValue::Boolean(*b),
        (ColumnType::Timestamp, Value::String(s)) => FieldValue::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|_| mismatch())?
                .with_timezone(&Utc),
        ),
        (ColumnType::Json, v) => FieldValue::Json(v.clone()),
        _ => return Err(mismatch()),
    })
}

impl TableState {
    fn changes_from_body(&self, req: &EndpointRequest) -> TwinResult<Changes> {
        let body: serde_json::Map<String, serde_json::Value> = req.json_body()?;
        let mut changes = Changes::new();
        for (key, value) in &body {
            let def = self.columns.iter().find(|c| &c.name == key).ok_or_else(|| {
                TwinError::validation(format!(
                    "unknown column {key:?} for table {:?}",
                    self.table
                ))
                .into_anyhow()
            })?;
            changes.insert(key.clone(), field_from_json(def, value)?);
        }
        Ok(changes)
    }

    fn parse_id(req: &EndpointRequest) -> TwinResult<i64> {
        let raw = req
            .param("id")
            .ok_or_else(|| TwinError::validation("missing id parameter").into_anyhow())?;
        raw.parse::<i64>()
            .map_err(|_| TwinError::validation(format!("invalid row id {raw:?}")).into_anyhow())
    }

    async fn insert(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let values = self.changes_from_body(&req)?;
        let row = self.records.insert_row(&self.table, values).await?;
        Ok(EndpointResponse::created(row.to_json()))
    }

    async fn list(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let limit = match req.query_value("limit") {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                TwinError::validation(format!("invalid limit {raw:?}")).into_anyhow()
            })?),
            None => None,
        };
        let rows = self.records.list_rows(&self.table, limit).await?;
        let items: Vec<serde_json::Value> = rows.iter().map(Row::to_json).collect();
        Ok(EndpointResponse::ok_json(json!(items)))
    }

    async fn get_one(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let id = Self::parse_id(&req)?;
        let row = self.records.get_row(&self.table, id).await?.ok_or_else(|| {
            TwinError::not_found(format!("no row {id} in {:?}", self.table)).into_anyhow()
        })?;
        Ok(EndpointResponse::ok_json(row.to_json()))
    }

    async fn update(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let id = Self::parse_id(&req)?;
        let changes = self.changes_from_body(&req)?;
        if changes.is_empty() {
            return Err(TwinError::validation("empty update").into_anyhow());
        }
        let row = self.records.update_row(&self.table, id, changes).await?;
        Ok(EndpointResponse::ok_json(row.to_json()))
    }

    async fn delete(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let id = Self::parse_id(&req)?;
        self.records.delete_row(&self.table, id).await?;
        Ok(EndpointResponse::ok_json(json!({"deleted": id})))
    }
}
