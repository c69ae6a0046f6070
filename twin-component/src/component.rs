use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use twin_blob::BlobStore;
use twin_core::{TwinError, TwinResult};
use twin_queue::JobQueue;
use twin_store::{Record, RecordStore, TableSchema};

use crate::assets::AssetsManager;
use crate::config::{ComponentConfig, HarvesterConfig};
use crate::custom_table::CustomTableManager;
use crate::endpoint::EndpointSpec;
use crate::records_api;

/// Shared dependencies handed to components when the engine builds
/// their endpoints and run wrappers.
#[derive(Clone)]
pub struct ComponentContext {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Present only when the engine runs an upload queue; components
    /// with async upload paths require it.
    pub uploads: Option<Arc<dyn JobQueue>>,
}

impl ComponentContext {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            records,
            blobs,
            uploads: None,
        }
    }

    pub fn with_uploads(mut self, uploads: Arc<dyn JobQueue>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn fetcher(&self) -> DataFetcher {
        DataFetcher {
            blobs: self.blobs.clone(),
        }
    }
}

/// Lazy access to record payloads: records carry only the blob handle,
/// and the fetcher turns a handle into bytes on demand.
#[derive(Clone)]
pub struct DataFetcher {
    blobs: Arc<dyn BlobStore>,
}

impl DataFetcher {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub async fn fetch(&self, record: &Record) -> TwinResult<Bytes> {
        self.blobs.retrieve(&record.url).await.map_err(|e| {
            TwinError::storage(format!("blob {} unavailable: {e}", record.url)).into_anyhow()
        })
    }
}

/// Source records handed to `harvest`: a single record when the run is
/// count-mode with limit 1, the full slice otherwise.
#[derive(Debug, Clone)]
pub enum SourceData {
    One(Record),
    Many(Vec<Record>),
}

impl SourceData {
    pub fn records(&self) -> &[Record] {
        match self {
            SourceData::One(record) => std::slice::from_ref(record),
            SourceData::Many(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records().last()
    }
}

/// Dependency records keyed by component name, latest-first.
#[derive(Debug, Clone, Default)]
pub struct DepsData {
    map: BTreeMap<String, Vec<Record>>,
}

impl DepsData {
    pub fn new(map: BTreeMap<String, Vec<Record>>) -> Self {
        Self { map }
    }

    pub fn get(&self, name: &str) -> &[Record] {
        self.map.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single latest dependency record, if any.
    pub fn latest(&self, name: &str) -> Option<&Record> {
        self.get(name).first()
    }
}

/// What `harvest` returns: one payload, or one payload per source
/// record when the harvester declares `multiple_results`.
#[derive(Debug, Clone)]
pub enum HarvestOutput {
    One(Bytes),
    Many(Vec<Bytes>),
}

impl From<Bytes> for HarvestOutput {
    fn from(bytes: Bytes) -> Self {
        HarvestOutput::One(bytes)
    }
}

impl From<Vec<Bytes>> for HarvestOutput {
    fn from(items: Vec<Bytes>) -> Self {
        HarvestOutput::Many(items)
    }
}

/// Periodic producer: `collect` returns the newly collected payload
/// and the framework persists it.
#[async_trait]
pub trait Collector: Send + Sync {
    fn configuration(&self) -> &ComponentConfig;

    /// Cron pattern the scheduler registers for this collector.
    fn cron_pattern(&self) -> &str;

    async fn collect(&self) -> TwinResult<Bytes>;
}

/// Derivation: turns a slice of source records (plus optional
/// dependency records) into new payloads.
#[async_trait]
pub trait Harvester: Send + Sync {
    fn configuration(&self) -> &ComponentConfig;

    fn harvester_config(&self) -> &HarvesterConfig;

    async fn harvest(
        &self,
        source: &SourceData,
        deps: &DepsData,
        fetcher: &DataFetcher,
    ) -> TwinResult<HarvestOutput>;
}

/// Stateless HTTP component: contributes endpoints, owns no table.
pub trait Handler: Send + Sync {
    fn configuration(&self) -> &ComponentConfig;

    fn endpoints(&self) -> Vec<EndpointSpec>;
}

/// The five component variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentVariant {
    Collector,
    Harvester,
    Handler,
    Assets,
    CustomTable,
}

impl ComponentVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentVariant::Collector => "collector",
            ComponentVariant::Harvester => "harvester",
            ComponentVariant::Handler => "handler",
            ComponentVariant::Assets => "assets",
            ComponentVariant::CustomTable => "custom-table",
        }
    }
}

/// Tagged union over the variants. Capability checks are ordinary
/// methods here instead of downcasts or marker traits.
#[derive(Clone)]
pub enum ComponentHandle {
    Collector(Arc<dyn Collector>),
    Harvester(Arc<dyn Harvester>),
    Handler(Arc<dyn Handler>),
    Assets(Arc<AssetsManager>),
    CustomTable(Arc<CustomTableManager>),
}

impl ComponentHandle {
    pub fn variant(&self) -> ComponentVariant {
        match self {
            ComponentHandle::Collector(_) => ComponentVariant::Collector,
            ComponentHandle::Harvester(_) => ComponentVariant::Harvester,
            ComponentHandle::Handler(_) => ComponentVariant::Handler,
            ComponentHandle::Assets(_) => ComponentVariant::Assets,
            ComponentHandle::CustomTable(_) => ComponentVariant::CustomTable,
        }
    }

    pub fn configuration(&self) -> &ComponentConfig {
        match self {
            ComponentHandle::Collector(c) => c.configuration(),
            ComponentHandle::Harvester(h) => h.configuration(),
            ComponentHandle::Handler(h) => h.configuration(),
            ComponentHandle::Assets(a) => a.configuration(),
            ComponentHandle::CustomTable(t) => t.configuration(),
        }
    }

    pub fn name(&self) -> &str {
        &self.configuration().name
    }

    /// The table this component owns, None for stateless handlers.
    pub fn table_schema(&self) -> Option<TableSchema> {
        match self {
            ComponentHandle::Collector(c) => {
                Some(TableSchema::records(&c.configuration().name))
            }
            ComponentHandle::Harvester(h) => {
                Some(TableSchema::records(&h.configuration().name))
            }
            ComponentHandle::Handler(_) => None,
            ComponentHandle::Assets(a) => Some(a.table_schema()),
            ComponentHandle::CustomTable(t) => Some(t.table_schema()),
        }
    }

    /// Whether this component's startup requires the upload queue.
    pub fn wants_upload_queue(&self) -> bool {
        matches!(self, ComponentHandle::Assets(a) if a.is_async_upload())
    }

    /// The endpoints this component contributes, built against the
    /// injected dependencies.
    pub fn endpoints(&self, ctx: &ComponentContext) -> TwinResult<Vec<EndpointSpec>> {
        Ok(match self {
            ComponentHandle::Collector(c) => records_api::endpoints(c.configuration(), ctx),
            ComponentHandle::Harvester(h) => records_api::endpoints(h.configuration(), ctx),
            ComponentHandle::Handler(h) => h.endpoints(),
            ComponentHandle::Assets(a) => a.endpoints(ctx)?,
            ComponentHandle::CustomTable(t) => t.endpoints(ctx),
        })
    }

    pub fn as_collector(&self) -> Option<&Arc<dyn Collector>> {
        match self {
            ComponentHandle::Collector(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_harvester(&self) -> Option<&Arc<dyn Harvester>> {
        match self {
            ComponentHandle::Harvester(h) => Some(h),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("variant", &self.variant().as_str())
            .field("name", &self.name())
            .finish()
    }
}
