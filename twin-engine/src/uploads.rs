//! The upload worker: unpacks spooled tileset archives into the blob
//! store and settles the pending record either way.

use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use twin_component::{ComponentContext, TilesetUploadJob, TILESET_UPLOAD_JOB};
use twin_core::{safe, TwinError, TwinResult};
use twin_queue::{Job, JobHandler, JobQueue, QueueName, QueuePolicy, Worker, WorkerHandle};
use twin_store::{columns, Changes, FieldValue, UploadStatus};

/// Start the upload worker pool on the uploads queue.
pub fn start_upload_worker(
    queue: Arc<dyn JobQueue>,
    ctx: ComponentContext,
    concurrency: usize,
) -> WorkerHandle {
    let handler: JobHandler = Arc::new(move |job| {
        let ctx = ctx.clone();
        Box::pin(async move { process(ctx, job).await })
    });

    Worker::start(
        queue,
        QueueName::Uploads,
        QueuePolicy::defaults_for(QueueName::Uploads).with_concurrency(concurrency),
        handler,
    )
}

async fn process(ctx: ComponentContext, job: Job) -> anyhow::Result<()> {
    if job.job_name != TILESET_UPLOAD_JOB {
        return Ok(());
    }
    let payload: TilesetUploadJob = serde_json::from_value(job.payload)
        .map_err(|e| TwinError::queue(format!("malformed upload job: {e}")).into_anyhow())?;

    let mut status = Changes::new();
    status.insert(
        columns::UPLOAD_STATUS.to_string(),
        FieldValue::from(UploadStatus::Processing.as_str()),
    );
    ctx.records
        .update(&payload.component, payload.record_id, status)
        .await?;

    match extract_and_upload(&ctx, &payload).await {
        Ok(manifest) => {
            let mut changes = Changes::new();
            changes.insert(columns::URL.to_string(), FieldValue::from(payload.base_path.as_str()));
            changes.insert(
                columns::TILESET_URL.to_string(),
                FieldValue::from(ctx.blobs.public_url(&manifest)),
            );
            changes.insert(
                columns::UPLOAD_STATUS.to_string(),
                FieldValue::from(UploadStatus::Completed.as_str()),
            );
            ctx.records
                .update(&payload.component, payload.record_id, changes)
                .await?;

            safe("unlink upload temp file", async {
                tokio::fs::remove_file(&payload.temp_path)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await;

            info!(
                component = %payload.component,
                record = payload.record_id,
                "tileset upload completed"
            );
            Ok(())
        }
        Err(e) => {
            warn!(
                component = %payload.component,
                record = payload.record_id,
                error = %e,
                "tileset upload failed"
            );

            // The record is preserved for debugging; only the partial
            // uploads and the temp file are reclaimed.
            let mut changes = Changes::new();
            changes.insert(
                columns::UPLOAD_STATUS.to_string(),
                FieldValue::from(UploadStatus::Failed.as_str()),
            );
            changes.insert(
                columns::UPLOAD_ERROR.to_string(),
                FieldValue::from(e.to_string()),
            );
            safe("mark upload failed", async {
                ctx.records
                    .update(&payload.component, payload.record_id, changes)
                    .await
                    .map(|_| ())
            })
            .await;

            let blobs = ctx.blobs.clone();
            let prefix = format!("{}/", payload.base_path);
            safe("reclaim partial tileset upload", async move {
                blobs
                    .delete_by_prefix(&prefix)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            })
            .await;
            safe("unlink upload temp file", async {
                tokio::fs::remove_file(&payload.temp_path)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await;

            Err(e)
        }
    }
}

/// Unpack the archive under the job's base path. Returns the handle of
/// the root manifest.
async fn extract_and_upload(ctx: &ComponentContext, job: &TilesetUploadJob) -> TwinResult<String> {
    let data = tokio::fs::read(&job.temp_path).await.map_err(|e| {
        TwinError::file_operation(format!("cannot read spooled archive: {e}")).into_anyhow()
    })?;

    // ZIP decoding is synchronous CPU work; keep it off the runtime.
    let entries = tokio::task::spawn_blocking(move || read_archive(data))
        .await
        .map_err(|e| TwinError::file_operation(format!("archive task failed: {e}")).into_anyhow())??;

    if entries.is_empty() {
        return Err(TwinError::unprocessable("archive contains no files").into_anyhow());
    }

    let mut manifest: Option<String> = None;
    for (name, bytes) in entries {
        let handle = format!("{}/{}", job.base_path, name);
        ctx.blobs
            .save_at_path(bytes, &handle)
            .await
            .map_err(|e| TwinError::storage(format!("tile upload failed: {e}")).into_anyhow())?;

        // The root manifest is the top-level tileset.json, or failing
        // that the first top-level JSON file.
        let top_level = !name.contains('/');
        if top_level && name == "tileset.json" {
            manifest = Some(handle);
        } else if top_level && name.ends_with(".json") && manifest.is_none() {
            manifest = Some(handle);
        }
    }

    manifest.ok_or_else(|| {
        TwinError::unprocessable("archive has no root manifest (expected a top-level JSON file)")
            .into_anyhow()
    })
}

fn read_archive(data: Vec<u8>) -> TwinResult<Vec<(String, Bytes)>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| TwinError::unprocessable(format!("not a ZIP archive: {e}")).into_anyhow())?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| TwinError::unprocessable(format!("corrupt archive entry: {e}")).into_anyhow())?;
        if file.is_dir() {
            continue;
        }
        // enclosed_name refuses traversal and absolute paths.
        let Some(path) = file.enclosed_name() else {
            continue;
        };
        let name = path.to_string_lossy().replace('\\', "/");

        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| TwinError::unprocessable(format!("corrupt archive entry: {e}")).into_anyhow())?;
        entries.push((name, Bytes::from(bytes)));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use twin_blob::{BlobStore, MemoryBlobStore};
    use twin_component::ComponentContext;
    use twin_queue::{EnqueueOpts, MemoryJobQueue};
    use twin_store::{MemoryRecordStore, NewRecord, RecordStore, TableSchema};
    use zip::write::SimpleFileOptions;

    fn make_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in files {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    async fn pending_record(ctx: &ComponentContext) -> i64 {
        ctx.records
            .ensure_table(&TableSchema::tilesets("tiles"))
            .await
            .unwrap();
        let mut record = NewRecord::new("tiles", "application/zip", "", chrono::Utc::now());
        record.extra.insert(
            columns::UPLOAD_STATUS.to_string(),
            FieldValue::from(UploadStatus::Pending.as_str()),
        );
        ctx.records.insert("tiles", record).await.unwrap().id
    }

    async fn run_job(ctx: ComponentContext, payload: TilesetUploadJob) -> anyhow::Result<()> {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(
                QueueName::Uploads,
                TILESET_UPLOAD_JOB,
                serde_json::to_value(&payload).unwrap(),
                EnqueueOpts::default(),
            )
            .await
            .unwrap();
        let job = queue.dequeue(QueueName::Uploads).await.unwrap().unwrap();
        process(ctx, job).await
    }

    #[tokio::test]
    async fn successful_upload_settles_the_record() {
        let ctx = ComponentContext::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let record_id = pending_record(&ctx).await;

        let archive = make_zip(&[
            ("tileset.json", br#"{"asset":{"version":"1.1"}}"#),
            ("tiles/0/0/0.b3dm", b"tile-bytes"),
        ]);
        let temp = std::env::temp_dir().join(format!("twin-test-{}.zip", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, &archive).await.unwrap();

        let payload = TilesetUploadJob {
            component: "tiles".to_string(),
            record_id,
            temp_path: temp.to_string_lossy().into_owned(),
            base_path: "tiles/job-1".to_string(),
        };
        run_job(ctx.clone(), payload).await.unwrap();

        let record = ctx.records.get("tiles", record_id).await.unwrap().unwrap();
        assert_eq!(record.upload_status(), Some(UploadStatus::Completed));
        assert_eq!(record.url, "tiles/job-1");
        assert!(record
            .extra
            .get(columns::TILESET_URL)
            .and_then(FieldValue::as_str)
            .unwrap()
            .ends_with("tiles/job-1/tileset.json"));

        // Files landed under the base path; the temp file is gone.
        assert!(ctx
            .blobs
            .retrieve("tiles/job-1/tiles/0/0/0.b3dm")
            .await
            .is_ok());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn failed_upload_marks_the_record_and_cleans_up() {
        let ctx = ComponentContext::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let record_id = pending_record(&ctx).await;

        let temp = std::env::temp_dir().join(format!("twin-test-{}.zip", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, b"this is not a zip").await.unwrap();

        let payload = TilesetUploadJob {
            component: "tiles".to_string(),
            record_id,
            temp_path: temp.to_string_lossy().into_owned(),
            base_path: "tiles/job-2".to_string(),
        };
        assert!(run_job(ctx.clone(), payload).await.is_err());

        // The record survives with the failure recorded.
        let record = ctx.records.get("tiles", record_id).await.unwrap().unwrap();
        assert_eq!(record.upload_status(), Some(UploadStatus::Failed));
        assert!(record
            .extra
            .get(columns::UPLOAD_ERROR)
            .and_then(FieldValue::as_str)
            .is_some());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn archive_without_a_manifest_fails() {
        let ctx = ComponentContext::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let record_id = pending_record(&ctx).await;

        let archive = make_zip(&[("tiles/0.b3dm", b"tile")]);
        let temp = std::env::temp_dir().join(format!("twin-test-{}.zip", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, &archive).await.unwrap();

        let payload = TilesetUploadJob {
            component: "tiles".to_string(),
            record_id,
            temp_path: temp.to_string_lossy().into_owned(),
            base_path: "tiles/job-3".to_string(),
        };
        assert!(run_job(ctx.clone(), payload).await.is_err());

        // Partial uploads were reclaimed.
        assert!(ctx.blobs.retrieve("tiles/job-3/tiles/0.b3dm").await.is_err());
    }
}
