use serde::{Deserialize, Serialize};

use twin_core::TwinError;

/// Standard column names shared by the framework's table shapes.
pub mod columns {
    pub const NAME: &str = "name";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const URL: &str = "url";
    pub const DATE: &str = "date";

    pub const DESCRIPTION: &str = "description";
    pub const SOURCE: &str = "source";
    pub const OWNER_ID: &str = "owner_id";
    pub const FILENAME: &str = "filename";
    pub const IS_PUBLIC: &str = "is_public";

    pub const TILESET_URL: &str = "tileset_url";
    pub const UPLOAD_STATUS: &str = "upload_status";
    pub const UPLOAD_ERROR: &str = "upload_error";
    pub const UPLOAD_JOB_ID: &str = "upload_job_id";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Declarative table shape. `id` is implicit on every table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Index column sets, advisory for SQL backends.
    pub indexes: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, columns: &[&str]) -> Self {
        self.indexes
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The base shape every record-bearing component owns.
    pub fn records(name: impl Into<String>) -> Self {
        Self::new(
            name,
            vec![
                ColumnDef::new(columns::NAME, ColumnType::Text),
                ColumnDef::new(columns::CONTENT_TYPE, ColumnType::Text),
                ColumnDef::new(columns::URL, ColumnType::Text),
                ColumnDef::new(columns::DATE, ColumnType::Timestamp),
            ],
        )
        .with_index(&[columns::NAME, columns::DATE])
    }

    /// Asset tables add ownership and visibility on top of the base
    /// shape.
    pub fn assets(name: impl Into<String>) -> Self {
        let mut schema = Self::records(name);
        schema.columns.extend([
            ColumnDef::new(columns::DESCRIPTION, ColumnType::Text).nullable(),
            ColumnDef::new(columns::SOURCE, ColumnType::Text).nullable(),
            ColumnDef::new(columns::OWNER_ID, ColumnType::Integer).nullable(),
            ColumnDef::new(columns::FILENAME, ColumnType::Text).nullable(),
            ColumnDef::new(columns::IS_PUBLIC, ColumnType::Boolean).nullable(),
        ]);
        schema.with_index(&[columns::OWNER_ID])
    }

    /// Tileset tables carry the async-upload columns as well.
    pub fn tilesets(name: impl Into<String>) -> Self {
        let mut schema = Self::assets(name);
        schema.columns.extend([
            ColumnDef::new(columns::TILESET_URL, ColumnType::Text).nullable(),
            ColumnDef::new(columns::UPLOAD_STATUS, ColumnType::Text).nullable(),
            ColumnDef::new(columns::UPLOAD_ERROR, ColumnType::Text).nullable(),
            ColumnDef::new(columns::UPLOAD_JOB_ID, ColumnType::Text).nullable(),
        ]);
        schema
    }
}

/// Result of `ensure_table`: what the migration actually did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub table: String,
    pub created: bool,
    pub added_columns: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        !self.created && self.added_columns.is_empty()
    }
}

/// Table names double as identifiers in SQL backends, so they are
/// gated before any store call: `^[A-Za-z_][A-Za-z0-9_]{0,62}$`.
pub fn validate_table_name(name: &str) -> twin_core::TwinResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(TwinError::configuration(format!(
            "invalid table name: {name:?} (expected ^[A-Za-z_][A-Za-z0-9_]{{0,62}}$)"
        ))
        .into_anyhow())
    }
}

/// Column names obey the same identifier rule as table names.
pub fn validate_column_name(name: &str) -> twin_core::TwinResult<()> {
    validate_table_name(name).map_err(|_| {
        TwinError::configuration(format!("invalid column name: {name:?}")).into_anyhow()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_core::ErrorKind;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_table_name("weather").is_ok());
        assert!(validate_table_name("_tileset_2024").is_ok());
        assert!(validate_table_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_injection_shaped_names() {
        for bad in ["users; DROP TABLE x--", "", "1abc", "a-b", "a b", "a\"b"] {
            let err = validate_table_name(bad).unwrap_err();
            let twin = TwinError::from_anyhow(&err).unwrap();
            assert_eq!(twin.kind, ErrorKind::Configuration, "for {bad:?}");
        }
        assert!(validate_table_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn tileset_schema_includes_all_layers() {
        let schema = TableSchema::tilesets("gltf");
        for col in [
            columns::NAME,
            columns::DATE,
            columns::OWNER_ID,
            columns::IS_PUBLIC,
            columns::TILESET_URL,
            columns::UPLOAD_JOB_ID,
        ] {
            assert!(schema.column(col).is_some(), "missing {col}");
        }
        assert!(schema.column(columns::OWNER_ID).unwrap().nullable);
    }
}
