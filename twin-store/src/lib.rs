//! # twin-store: the record store for TwinRS
//!
//! Every record-bearing component owns one table named after itself.
//! Records are date-ordered metadata rows pointing at blobs; asset
//! tables add ownership and visibility columns, tileset tables add the
//! async-upload columns, and custom tables carry caller-declared
//! schemas.
//!
//! The store is abstract ([`RecordStore`] + [`UserStore`]); the crate
//! ships the in-memory backend. SQL backends implement the same traits
//! out of tree and get the table-name gate, additive migration
//! semantics, and range contracts from here.

pub mod memory;
pub mod record;
pub mod schema;
pub mod store;
pub mod users;

pub use memory::MemoryRecordStore;
pub use record::{FieldValue, NewRecord, Record, Row, UploadStatus};
pub use schema::{
    columns, validate_table_name, ColumnDef, ColumnType, MigrationReport, TableSchema,
};
pub use store::{Changes, RecordStore, SortOrder};
pub use users::{User, UserStore};
