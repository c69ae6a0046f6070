//! # twin-component: the TwinRS component model
//!
//! Hosts supply business logic as components of five variants:
//! [`Collector`] (periodic producer), [`Harvester`] (derivation),
//! [`Handler`] (stateless HTTP), [`AssetsManager`] (user-owned binary
//! assets, including the map and tileset flavors), and
//! [`CustomTableManager`] (caller-declared table CRUD). The engine
//! sees them through the [`ComponentHandle`] tagged union and the
//! capability methods on it.
//!
//! Endpoints are built, not declared: each variant constructs its
//! [`EndpointSpec`] list against the injected [`ComponentContext`],
//! so there is no route metadata or reflection anywhere.

pub mod assets;
pub mod component;
pub mod config;
pub mod custom_table;
pub mod endpoint;
pub mod records_api;
pub mod registry;

pub use assets::{AssetFlavor, AssetsManager, TilesetUploadJob, TILESET_UPLOAD_JOB};
pub use component::{
    Collector, ComponentContext, ComponentHandle, ComponentVariant, DataFetcher, DepsData,
    Handler, Harvester, HarvestOutput, SourceData,
};
pub use config::{ComponentConfig, HarvesterConfig, RangeUnit, SourceRange, TriggerMode};
pub use custom_table::CustomTableManager;
pub use endpoint::{
    Caller, EndpointHandler, EndpointRequest, EndpointResponse, EndpointSpec, Method, ResponseBody,
};
pub use registry::ComponentRegistry;
