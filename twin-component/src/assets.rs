//! User-owned binary assets: upload, list, fetch, download, update,
//! delete, with the ownership gate applied on every operation. The
//! tileset flavor swaps the synchronous upload for the async ZIP path
//! on the upload queue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use twin_blob::BlobStore;
use twin_core::{safe, TwinError, TwinResult};
use twin_queue::{EnqueueOpts, JobQueue, QueueName};
use twin_store::{columns, Changes, FieldValue, NewRecord, Record, RecordStore, TableSchema, UploadStatus};

use crate::component::ComponentContext;
use crate::config::ComponentConfig;
use crate::endpoint::{Caller, EndpointRequest, EndpointResponse, EndpointSpec};

/// Job name for async tileset uploads on the uploads queue.
pub const TILESET_UPLOAD_JOB: &str = "tileset-upload";

/// Payload of an async tileset upload job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesetUploadJob {
    pub component: String,
    pub record_id: i64,
    pub temp_path: String,
    /// Blob-store prefix the extracted files land under.
    pub base_path: String,
}

/// The asset component flavors: plain assets, map assets, and
/// tilesets with the async upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFlavor {
    Generic,
    Map,
    Tileset,
}

/// Framework-provided component serving user-owned assets from one
/// record table.
pub struct AssetsManager {
    config: ComponentConfig,
    flavor: AssetFlavor,
}

impl AssetsManager {
    pub fn new(config: ComponentConfig) -> Self {
        Self {
            config,
            flavor: AssetFlavor::Generic,
        }
    }

    /// Map assets: the generic surface with map-appropriate defaults.
    pub fn maps(mut config: ComponentConfig) -> Self {
        if config.content_type.is_empty() {
            config.content_type = "application/geo+json".to_string();
        }
        Self {
            config,
            flavor: AssetFlavor::Map,
        }
    }

    /// Tilesets: ZIP archives unpacked asynchronously by the upload
    /// worker.
    pub fn tilesets(config: ComponentConfig) -> Self {
        Self {
            config,
            flavor: AssetFlavor::Tileset,
        }
    }

    pub fn configuration(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn flavor(&self) -> AssetFlavor {
        self.flavor
    }

    pub fn is_async_upload(&self) -> bool {
        self.flavor == AssetFlavor::Tileset
    }

    pub fn table_schema(&self) -> TableSchema {
        match self.flavor {
            AssetFlavor::Tileset => TableSchema::tilesets(&self.config.name),
            _ => TableSchema::assets(&self.config.name),
        }
    }

    pub fn endpoints(&self, ctx: &ComponentContext) -> TwinResult<Vec<EndpointSpec>> {
        let uploads = if self.is_async_upload() {
            Some(ctx.uploads.clone().ok_or_else(|| {
                TwinError::configuration(format!(
                    "component {:?} needs the upload queue, but none is configured",
                    self.config.name
                ))
                .into_anyhow()
            })?)
        } else {
            None
        };

        let state = Arc::new(AssetsState {
            table: self.config.name.clone(),
            content_type: self.config.content_type.clone(),
            flavor: self.flavor,
            records: ctx.records.clone(),
            blobs: ctx.blobs.clone(),
            uploads,
        });

        let mut endpoints = vec![
            {
                let state = state.clone();
                EndpointSpec::post("/", move |req| {
                    let state = state.clone();
                    async move { state.upload(req).await }
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
                EndpointSpec::get("/{id}/download", move |req| {
                    let state = state.clone();
                    async move { state.download(req).await }
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
        ];

        if self.is_async_upload() {
            let state = state.clone();
            endpoints.push(EndpointSpec::get("/{id}/status", move |req| {
                let state = state.clone();
                async move { state.upload_status(req).await }
            }));
        }

        Ok(endpoints)
    }
}

struct AssetsState {
    table: String,
    content_type: String,
    flavor: AssetFlavor,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    uploads: Option<Arc<dyn JobQueue>>,
}

fn require_caller(req: &EndpointRequest) -> TwinResult<&Caller> {
    req.caller
        .as_ref()
        .ok_or_else(|| TwinError::authentication("authentication required").into_anyhow())
}

fn can_read(record: &Record, caller: Option<&Caller>) -> bool {
    if record.is_public() {
        return true;
    }
    match caller {
        Some(caller) => caller.is_admin || record.owner_id() == Some(caller.user.id),
        None => false,
    }
}

fn can_mutate(record: &Record, caller: &Caller) -> bool {
    caller.is_admin || record.owner_id() == Some(caller.user.id)
}

/// `source` must parse as an absolute URL or the insert fails.
fn validate_source(source: &str) -> TwinResult<()> {
    url::Url::parse(source).map(|_| ()).map_err(|_| {
        TwinError::validation(format!("source {source:?} is not an absolute URL")).into_anyhow()
    })
}

impl AssetsState {
    async fn fetch_record(&self, req: &EndpointRequest) -> TwinResult<Record> {
        let raw = req
            .param("id")
            .ok_or_else(|| TwinError::validation("missing id parameter").into_anyhow())?;
        let id = raw
            .parse::<i64>()
            .map_err(|_| TwinError::validation(format!("invalid asset id {raw:?}")).into_anyhow())?;
        self.records.get(&self.table, id).await?.ok_or_else(|| {
            TwinError::not_found(format!("no asset {id} in {:?}", self.table)).into_anyhow()
        })
    }

    fn metadata_fields(&self, req: &EndpointRequest, caller: &Caller) -> TwinResult<Changes> {
        let mut extra = Changes::new();
        if let Some(description) = req.query_value("description") {
            extra.insert(columns::DESCRIPTION.to_string(), FieldValue::from(description));
        }
        if let Some(source) = req.query_value("source") {
            validate_source(source)?;
            extra.insert(columns::SOURCE.to_string(), FieldValue::from(source));
        }
        let filename = req
            .query_value("filename")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}", self.table, Uuid::new_v4()));
        extra.insert(columns::FILENAME.to_string(), FieldValue::from(filename));
        let is_public = req.query_value("is_public") == Some("true");
        extra.insert(columns::IS_PUBLIC.to_string(), FieldValue::Boolean(is_public));
        extra.insert(
            columns::OWNER_ID.to_string(),
            FieldValue::Integer(caller.user.id),
        );
        Ok(extra)
    }

    async fn upload(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let caller = require_caller(&req)?.clone();
        if req.body.is_empty() {
            return Err(TwinError::validation("empty upload body").into_anyhow());
        }
        let extra = self.metadata_fields(&req, &caller)?;

        match self.flavor {
            AssetFlavor::Tileset => self.upload_async(req, extra).await,
            _ => self.upload_sync(req, extra).await,
        }
    }

    /// Synchronous path: blob first, then the record, so a record can
    /// never point at a missing blob.
    async fn upload_sync(
        &self,
        req: EndpointRequest,
        extra: Changes,
    ) -> TwinResult<EndpointResponse> {
        let ext = extra
            .get(columns::FILENAME)
            .and_then(FieldValue::as_str)
            .and_then(|f| f.rsplit_once('.').map(|(_, ext)| ext.to_string()));

        let handle = self
            .blobs
            .save(req.body.clone(), &self.table, ext.as_deref())
            .await
            .map_err(|e| TwinError::storage(format!("blob save failed: {e}")).into_anyhow())?;

        let mut record = NewRecord::new(
            self.table.clone(),
            self.content_type.clone(),
            handle.clone(),
            chrono::Utc::now(),
        );
        record.extra = extra;

        let inserted = match self.records.insert(&self.table, record).await {
            Ok(inserted) => inserted,
            Err(e) => {
                // Reclaim the orphaned blob before surfacing the error.
                safe("delete orphaned blob", async {
                    self.blobs
                        .delete(&handle)
                        .await
                        .map_err(anyhow::Error::from)
                })
                .await;
                return Err(e);
            }
        };

        info!(table = %self.table, id = inserted.id, "asset uploaded");
        Ok(EndpointResponse::created(inserted.to_json()))
    }

    /// Tileset path: spool the archive to disk, insert a pending
    /// record, and hand the rest to the upload worker.
    async fn upload_async(
        &self,
        req: EndpointRequest,
        mut extra: Changes,
    ) -> TwinResult<EndpointResponse> {
        let uploads = self
            .uploads
            .as_ref()
            .expect("endpoints() checked the upload queue");

        let job_id = Uuid::new_v4().to_string();
        let temp_path = std::env::temp_dir().join(format!("twin-upload-{job_id}.zip"));
        tokio::fs::write(&temp_path, &req.body).await.map_err(|e| {
            TwinError::file_operation(format!("failed to spool upload: {e}")).into_anyhow()
        })?;

        extra.insert(
            columns::UPLOAD_STATUS.to_string(),
            FieldValue::from(UploadStatus::Pending.as_str()),
        );
        extra.insert(columns::UPLOAD_JOB_ID.to_string(), FieldValue::from(job_id.as_str()));

        let mut record = NewRecord::new(
            self.table.clone(),
            self.content_type.clone(),
            String::new(),
            chrono::Utc::now(),
        );
        record.extra = extra;

        let inserted = match self.records.insert(&self.table, record).await {
            Ok(inserted) => inserted,
            Err(e) => {
                safe("unlink spooled upload", async {
                    tokio::fs::remove_file(&temp_path)
                        .await
                        .map_err(anyhow::Error::from)
                })
                .await;
                return Err(e);
            }
        };

        let payload = TilesetUploadJob {
            component: self.table.clone(),
            record_id: inserted.id,
            temp_path: temp_path.to_string_lossy().into_owned(),
            base_path: format!("{}/{}", self.table, job_id),
        };
        uploads
            .enqueue(
                QueueName::Uploads,
                TILESET_UPLOAD_JOB,
                serde_json::to_value(&payload)
                    .map_err(|e| TwinError::queue(e.to_string()).into_anyhow())?,
                EnqueueOpts::default(),
            )
            .await
            .map_err(|e| TwinError::queue(format!("enqueue failed: {e}")).into_anyhow())?;

        info!(table = %self.table, id = inserted.id, job_id, "tileset upload queued");
        Ok(EndpointResponse::json(202, inserted.to_json()))
    }

    async fn list(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let all = self
            .records
            .list(&self.table, None, twin_store::SortOrder::Desc)
            .await?;
        let caller = req.caller.as_ref();
        let visible: Vec<serde_json::Value> = all
            .iter()
            .filter(|r| can_read(r, caller))
            .map(Record::to_json)
            .collect();
        Ok(EndpointResponse::ok_json(json!(visible)))
    }

    async fn get_one(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let record = self.fetch_record(&req).await?;
        if !can_read(&record, req.caller.as_ref()) {
            return Err(TwinError::authorization("asset is not accessible").into_anyhow());
        }
        Ok(EndpointResponse::ok_json(record.to_json()))
    }

    async fn download(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let record = self.fetch_record(&req).await?;
        if !can_read(&record, req.caller.as_ref()) {
            return Err(TwinError::authorization("asset is not accessible").into_anyhow());
        }
        if record.url.is_empty() {
            return Err(
                TwinError::unprocessable("asset payload is not available yet").into_anyhow()
            );
        }

        let bytes = self.blobs.retrieve(&record.url).await.map_err(|e| {
            TwinError::storage(format!("blob {} unavailable: {e}", record.url)).into_anyhow()
        })?;

        let filename = record
            .extra
            .get(columns::FILENAME)
            .and_then(FieldValue::as_str)
            .unwrap_or("asset");
        Ok(
            EndpointResponse::bytes(200, record.content_type.clone(), bytes).with_header(
                "content-disposition",
                format!("attachment; filename=\"{filename}\""),
            ),
        )
    }

    async fn update(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let caller = require_caller(&req)?.clone();
        let record = self.fetch_record(&req).await?;
        if !can_mutate(&record, &caller) {
            return Err(TwinError::authorization("not the asset owner").into_anyhow());
        }

        #[derive(Deserialize)]
        struct Patch {
            description: Option<String>,
            filename: Option<String>,
            source: Option<String>,
            is_public: Option<bool>,
        }
        let patch: Patch = req.json_body()?;

        let mut changes = Changes::new();
        if let Some(description) = patch.description {
            changes.insert(columns::DESCRIPTION.to_string(), FieldValue::from(description));
        }
        if let Some(filename) = patch.filename {
            changes.insert(columns::FILENAME.to_string(), FieldValue::from(filename));
        }
        if let Some(source) = patch.source {
            validate_source(&source)?;
            changes.insert(columns::SOURCE.to_string(), FieldValue::from(source));
        }
        if let Some(is_public) = patch.is_public {
            changes.insert(columns::IS_PUBLIC.to_string(), FieldValue::Boolean(is_public));
        }
        if changes.is_empty() {
            return Err(TwinError::validation("empty update").into_anyhow());
        }

        let updated = self.records.update(&self.table, record.id, changes).await?;
        Ok(EndpointResponse::ok_json(updated.to_json()))
    }

    async fn delete(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let caller = require_caller(&req)?.clone();
        let record = self.fetch_record(&req).await?;
        if !can_mutate(&record, &caller) {
            return Err(TwinError::authorization("not the asset owner").into_anyhow());
        }

        // Record first, then blob; a failed blob delete leaves an
        // orphan for the cleanup paths, never a dangling record.
        self.records.delete(&self.table, record.id).await?;
        if !record.url.is_empty() {
            let blobs = self.blobs.clone();
            let url = record.url.clone();
            let is_prefix = self.flavor == AssetFlavor::Tileset;
            safe("delete asset blob", async move {
                if is_prefix {
                    blobs
                        .delete_by_prefix(&format!("{url}/"))
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                } else {
                    blobs.delete(&url).await.map_err(anyhow::Error::from)
                }
            })
            .await;
        }

        info!(table = %self.table, id = record.id, "asset deleted");
        Ok(EndpointResponse::ok_json(json!({"deleted": record.id})))
    }

    async fn upload_status(&self, req: EndpointRequest) -> TwinResult<EndpointResponse> {
        let record = self.fetch_record(&req).await?;
        if !can_read(&record, req.caller.as_ref()) {
            return Err(TwinError::authorization("asset is not accessible").into_anyhow());
        }
        let status = record
            .upload_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let error = record
            .extra
            .get(columns::UPLOAD_ERROR)
            .map(FieldValue::to_json)
            .unwrap_or(serde_json::Value::Null);
        Ok(EndpointResponse::ok_json(json!({
            "upload_status": status,
            "upload_error": error,
        })))
    }
}
