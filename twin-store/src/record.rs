use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::schema::columns;

/// A single column value. The record store is dynamically typed at the
/// edges (custom tables declare their own schemas), so values travel
/// as this enum and are checked against the table schema on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// JSON view for HTTP responses.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Text(s) => json!(s),
            FieldValue::Integer(n) => json!(n),
            FieldValue::Float(f) => json!(f),
            FieldValue::Boolean(b) => json!(b),
            FieldValue::Timestamp(t) => json!(t.to_rfc3339()),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(t)
    }
}

/// One stored row: a stable id plus the column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub values: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.get(column)
    }

    pub fn str_value(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(FieldValue::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), json!(self.id));
        for (k, v) in &self.values {
            map.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Async-upload state carried on tileset records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UploadStatus::Pending),
            "processing" => Some(UploadStatus::Processing),
            "completed" => Some(UploadStatus::Completed),
            "failed" => Some(UploadStatus::Failed),
            _ => None,
        }
    }
}

/// A record of a component table: the typed view over [`Row`] with the
/// standard columns pulled out and everything else in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub date: DateTime<Utc>,
    pub extra: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn from_row(row: Row) -> Option<Record> {
        let mut values = row.values;
        let name = values.remove(columns::NAME)?.as_str()?.to_string();
        let content_type = values.remove(columns::CONTENT_TYPE)?.as_str()?.to_string();
        let url = values.remove(columns::URL)?.as_str()?.to_string();
        let date = values.remove(columns::DATE)?.as_timestamp()?;
        Some(Record {
            id: row.id,
            name,
            content_type,
            url,
            date,
            extra: values,
        })
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.extra.get(columns::OWNER_ID).and_then(FieldValue::as_i64)
    }

    pub fn is_public(&self) -> bool {
        self.extra
            .get(columns::IS_PUBLIC)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn upload_status(&self) -> Option<UploadStatus> {
        self.extra
            .get(columns::UPLOAD_STATUS)
            .and_then(FieldValue::as_str)
            .and_then(UploadStatus::parse)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), json!(self.id));
        map.insert("name".to_string(), json!(self.name));
        map.insert("content_type".to_string(), json!(self.content_type));
        map.insert("url".to_string(), json!(self.url));
        map.insert("date".to_string(), json!(self.date.to_rfc3339()));
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Insert payload for a component table.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub date: DateTime<Utc>,
    pub extra: BTreeMap<String, FieldValue>,
}

impl NewRecord {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        url: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            url: url.into(),
            date,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: FieldValue) -> Self {
        self.extra.insert(column.into(), value);
        self
    }

    pub(crate) fn into_values(self) -> BTreeMap<String, FieldValue> {
        let mut values = self.extra;
        values.insert(columns::NAME.to_string(), FieldValue::Text(self.name));
        values.insert(
            columns::CONTENT_TYPE.to_string(),
            FieldValue::Text(self.content_type),
        );
        values.insert(columns::URL.to_string(), FieldValue::Text(self.url));
        values.insert(columns::DATE.to_string(), FieldValue::Timestamp(self.date));
        values
    }
}
