//! # twin-blob: blob storage for TwinRS
//!
//! Components persist opaque payloads here and keep only the returned
//! handle on their records. The store is deliberately byte-vec based:
//! artifacts in a digital twin are small-to-medium documents, and the
//! record store owns all their metadata.
//!
//! Two adapters ship with the crate: [`MemoryBlobStore`] for tests and
//! development, [`LocalBlobStore`] for single-node deployments. Object
//! stores (S3 and friends) implement [`BlobStore`] out of tree.

mod error;
mod local;
mod memory;
pub mod store;

pub use error::{BlobError, BlobResult};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use store::BlobStore;
