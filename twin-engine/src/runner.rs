//! Run wrappers around host components: the framework side of
//! `collect` and `harvest`.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use twin_component::{
    Collector, ComponentContext, DepsData, Harvester, HarvestOutput, SourceData, SourceRange,
};
use twin_core::{safe, ComponentEvent, EventBus, TwinError, TwinResult};
use twin_store::{NewRecord, Record, SortOrder};

/// Persist one payload as a blob + record pair. The blob is written
/// first so a record can never point at a missing payload; a failed
/// insert reclaims the blob.
async fn persist(
    ctx: &ComponentContext,
    name: &str,
    content_type: &str,
    bytes: Bytes,
    date: DateTime<Utc>,
) -> TwinResult<Record> {
    let handle = ctx
        .blobs
        .save(bytes, name, None)
        .await
        .map_err(|e| TwinError::storage(format!("blob save failed: {e}")).into_anyhow())?;

    match ctx
        .records
        .insert(name, NewRecord::new(name, content_type, handle.clone(), date))
        .await
    {
        Ok(record) => Ok(record),
        Err(e) => {
            let blobs = ctx.blobs.clone();
            safe("reclaim orphaned blob", async move {
                blobs.delete(&handle).await.map_err(anyhow::Error::from)
            })
            .await;
            Err(e)
        }
    }
}

/// Run a collector: `collect`, persist, emit `collector:completed`.
pub async fn run_collector(
    collector: &Arc<dyn Collector>,
    ctx: &ComponentContext,
    events: &EventBus,
) -> TwinResult<()> {
    let config = collector.configuration().clone();
    let bytes = collector.collect().await?;
    let record = persist(ctx, &config.name, &config.content_type, bytes, Utc::now()).await?;

    info!(component = %config.name, record = record.id, "collector run stored a record");
    events
        .emit(ComponentEvent::collector_completed(&config.name))
        .await;
    Ok(())
}

/// Run a harvester. Returns false when there was nothing to derive.
pub async fn run_harvester(
    harvester: &Arc<dyn Harvester>,
    ctx: &ComponentContext,
    events: &EventBus,
) -> TwinResult<bool> {
    let config = harvester.configuration().clone();
    let hc = harvester.harvester_config().clone();

    let source = hc.source.clone().ok_or_else(|| {
        TwinError::configuration(format!("harvester {:?} has no source", config.name)).into_anyhow()
    })?;
    let range = hc.parsed_source_range()?;

    // Cursor: our latest derivation, else one second before the
    // source's first record so the bootstrap run covers it.
    let cursor = match ctx.records.latest(&config.name).await? {
        Some(own) => own.date,
        None => match ctx.records.first(&source).await? {
            Some(first) => first.date - Duration::seconds(1),
            None => {
                debug!(component = %config.name, "source has no records yet");
                return Ok(false);
            }
        },
    };

    // Select the source slice.
    let (source_records, end_date, limit) = match range {
        SourceRange::Count(n) => {
            let records = ctx.records.records_after(&source, cursor, n).await?;
            (records, None, Some(n))
        }
        SourceRange::Window { .. } => {
            let end = cursor + range.window().expect("window mode");
            // With the minimum gate on, a window that has not fully
            // elapsed yet is not derived from.
            if hc.source_range_min && end > Utc::now() {
                debug!(component = %config.name, %end, "source window not complete yet");
                return Ok(false);
            }
            let records = ctx
                .records
                .records_in_range(&source, cursor, end, None, SortOrder::Asc)
                .await?;
            (records, Some(end), None)
        }
    };

    if source_records.is_empty() {
        debug!(component = %config.name, "no new source records");
        return Ok(false);
    }
    if let Some(limit) = limit {
        if hc.source_range_min && source_records.len() < limit {
            debug!(
                component = %config.name,
                have = source_records.len(),
                want = limit,
                "below configured source minimum"
            );
            return Ok(false);
        }
    }

    // Derived records are stored at the window end, or at the last
    // source record's date in count mode.
    let storage_date = end_date.unwrap_or_else(|| {
        source_records
            .last()
            .expect("checked non-empty above")
            .date
    });

    // Dependencies: the latest N records strictly before the storage
    // date, per declared pair.
    let mut deps = BTreeMap::new();
    for (dep_name, dep_limit) in hc.dependency_pairs() {
        let records = ctx
            .records
            .records_before(&dep_name, storage_date, dep_limit.max(1))
            .await?;
        deps.insert(dep_name, records);
    }
    let deps = DepsData::new(deps);

    // A single-latest run hands one record to `harvest`; anything else
    // hands the slice.
    let single = limit == Some(1) && end_date.is_none();
    let source_data = if single {
        SourceData::One(source_records[0].clone())
    } else {
        SourceData::Many(source_records.clone())
    };

    let output = harvester
        .harvest(&source_data, &deps, &ctx.fetcher())
        .await?;

    match output {
        HarvestOutput::Many(items) if hc.multiple_results && !single => {
            // Pair each result with its source record's date.
            for (item, record) in items.into_iter().zip(source_records.iter()) {
                persist(ctx, &config.name, &config.content_type, item, record.date).await?;
            }
        }
        HarvestOutput::Many(items) => {
            let first = items.into_iter().next().ok_or_else(|| {
                TwinError::unprocessable(format!("harvester {:?} returned no payloads", config.name))
                    .into_anyhow()
            })?;
            persist(ctx, &config.name, &config.content_type, first, storage_date).await?;
        }
        HarvestOutput::One(item) => {
            persist(ctx, &config.name, &config.content_type, item, storage_date).await?;
        }
    }

    info!(component = %config.name, %storage_date, "harvester run stored derived records");
    events
        .emit(ComponentEvent::harvester_completed(&config.name))
        .await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use twin_blob::{BlobStore, MemoryBlobStore};
    use twin_component::{ComponentConfig, DataFetcher, HarvesterConfig};
    use twin_store::{MemoryRecordStore, RecordStore, TableSchema};

    struct AvgHarvester {
        config: ComponentConfig,
        hc: HarvesterConfig,
    }

    #[async_trait]
    impl Harvester for AvgHarvester {
        fn configuration(&self) -> &ComponentConfig {
            &self.config
        }
        fn harvester_config(&self) -> &HarvesterConfig {
            &self.hc
        }
        async fn harvest(
            &self,
            source: &SourceData,
            _deps: &DepsData,
            fetcher: &DataFetcher,
        ) -> TwinResult<HarvestOutput> {
            let mut total = 0i64;
            for record in source.records() {
                let bytes = fetcher.fetch(record).await?;
                let value: serde_json::Value = serde_json::from_slice(&bytes)?;
                total += value["t"].as_i64().unwrap_or(0);
            }
            let avg = total / source.len() as i64;
            Ok(HarvestOutput::One(Bytes::from(
                json!({"avg": avg}).to_string(),
            )))
        }
    }

    async fn seeded_ctx(source_dates: &[DateTime<Utc>]) -> ComponentContext {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        records
            .ensure_table(&TableSchema::records("weather"))
            .await
            .unwrap();
        records
            .ensure_table(&TableSchema::records("avg"))
            .await
            .unwrap();

        for (i, date) in source_dates.iter().enumerate() {
            let handle = blobs
                .save(
                    Bytes::from(json!({"t": 20 + i as i64}).to_string()),
                    "weather",
                    Some("json"),
                )
                .await
                .unwrap();
            records
                .insert(
                    "weather",
                    NewRecord::new("weather", "application/json", handle, *date),
                )
                .await
                .unwrap();
        }

        ComponentContext::new(records, blobs)
    }

    fn avg_harvester(hc: HarvesterConfig) -> Arc<dyn Harvester> {
        Arc::new(AvgHarvester {
            config: ComponentConfig::new("avg", "application/json"),
            hc,
        })
    }

    #[tokio::test]
    async fn count_mode_stores_at_the_last_source_date() {
        let t0 = Utc::now();
        let dates: Vec<_> = (0..3).map(|i| t0 + Duration::seconds(i)).collect();
        let ctx = seeded_ctx(&dates).await;
        let events = EventBus::new();

        let harvester = avg_harvester(
            HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!(3)),
        );

        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
        let derived = ctx.records.latest("avg").await.unwrap().unwrap();
        assert_eq!(derived.date, t0 + Duration::seconds(2));

        let bytes = ctx.fetcher().fetch(&derived).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["avg"], 21);
    }

    #[tokio::test]
    async fn idempotent_when_no_new_source_arrives() {
        let t0 = Utc::now();
        let dates: Vec<_> = (0..3).map(|i| t0 + Duration::seconds(i)).collect();
        let ctx = seeded_ctx(&dates).await;
        let events = EventBus::new();

        let harvester = avg_harvester(
            HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!(3)),
        );

        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
        // Cursor advanced to the last source date; nothing new to do.
        assert!(!run_harvester(&harvester, &ctx, &events).await.unwrap());
        assert_eq!(ctx.records.count("avg").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn source_range_min_skips_short_slices() {
        let t0 = Utc::now();
        let ctx = seeded_ctx(&[t0, t0 + Duration::seconds(1)]).await;
        let events = EventBus::new();

        let harvester = avg_harvester(
            HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!(5))
                .with_source_range_min(),
        );

        assert!(!run_harvester(&harvester, &ctx, &events).await.unwrap());
        assert_eq!(ctx.records.count("avg").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn source_range_min_waits_for_the_full_window() {
        let t0 = Utc::now() - Duration::minutes(30);
        // Only half an hour of data against a one-hour window.
        let dates: Vec<_> = (0..10).map(|i| t0 + Duration::minutes(3 * i)).collect();
        let ctx = seeded_ctx(&dates).await;
        let events = EventBus::new();

        let harvester = avg_harvester(
            HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!("1h"))
                .with_source_range_min(),
        );

        assert!(!run_harvester(&harvester, &ctx, &events).await.unwrap());
        assert_eq!(ctx.records.count("avg").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_source_returns_false() {
        let ctx = seeded_ctx(&[]).await;
        let events = EventBus::new();

        let harvester = avg_harvester(HarvesterConfig::default().with_source("weather"));
        assert!(!run_harvester(&harvester, &ctx, &events).await.unwrap());
    }

    #[tokio::test]
    async fn missing_source_is_a_configuration_error() {
        let ctx = seeded_ctx(&[]).await;
        let events = EventBus::new();

        let harvester = avg_harvester(HarvesterConfig::default());
        let err = run_harvester(&harvester, &ctx, &events).await.unwrap_err();
        let twin = TwinError::from_anyhow(&err).unwrap();
        assert_eq!(twin.kind, twin_core::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn time_mode_window_advances_without_gaps() {
        let t0 = Utc::now();
        // Records every 20 minutes over one hour.
        let dates: Vec<_> = (0..4).map(|i| t0 + Duration::minutes(20 * i)).collect();
        let ctx = seeded_ctx(&dates).await;
        let events = EventBus::new();

        let harvester = avg_harvester(
            HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!("1h")),
        );

        // Bootstrap window starts 1s before the first record, so it
        // covers records at t0, t0+20m, t0+40m but not t0+60m.
        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
        let derived = ctx.records.latest("avg").await.unwrap().unwrap();
        assert_eq!(derived.date, t0 - Duration::seconds(1) + Duration::hours(1));

        // The next window picks up the record at t0+60m.
        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
        assert_eq!(ctx.records.count("avg").await.unwrap(), 2);
    }

    struct EchoHarvester {
        config: ComponentConfig,
        hc: HarvesterConfig,
    }

    #[async_trait]
    impl Harvester for EchoHarvester {
        fn configuration(&self) -> &ComponentConfig {
            &self.config
        }
        fn harvester_config(&self) -> &HarvesterConfig {
            &self.hc
        }
        async fn harvest(
            &self,
            source: &SourceData,
            _deps: &DepsData,
            fetcher: &DataFetcher,
        ) -> TwinResult<HarvestOutput> {
            let mut out = Vec::new();
            for record in source.records() {
                out.push(fetcher.fetch(record).await?);
            }
            Ok(HarvestOutput::Many(out))
        }
    }

    #[tokio::test]
    async fn multiple_results_pair_with_source_dates() {
        let t0 = Utc::now();
        let dates: Vec<_> = (0..3).map(|i| t0 + Duration::seconds(i)).collect();
        let ctx = seeded_ctx(&dates).await;
        let events = EventBus::new();

        let harvester: Arc<dyn Harvester> = Arc::new(EchoHarvester {
            config: ComponentConfig::new("avg", "application/json"),
            hc: HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!(3))
                .with_multiple_results(),
        });

        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
        let derived = ctx
            .records
            .list("avg", None, SortOrder::Asc)
            .await
            .unwrap();
        assert_eq!(derived.len(), 3);
        for (record, date) in derived.iter().zip(dates.iter()) {
            assert_eq!(record.date, *date);
        }
    }

    #[tokio::test]
    async fn dependencies_are_fetched_strictly_before_storage_date() {
        let t0 = Utc::now();
        let ctx = seeded_ctx(&[t0, t0 + Duration::seconds(1)]).await;
        let events = EventBus::new();

        // A dependency table with one record before and one at the
        // storage date.
        ctx.records
            .ensure_table(&TableSchema::records("calib"))
            .await
            .unwrap();
        for offset in [-5i64, 1] {
            let handle = ctx
                .blobs
                .save(Bytes::from_static(b"{}"), "calib", None)
                .await
                .unwrap();
            ctx.records
                .insert(
                    "calib",
                    NewRecord::new(
                        "calib",
                        "application/json",
                        handle,
                        t0 + Duration::seconds(offset),
                    ),
                )
                .await
                .unwrap();
        }

        struct DepAssertingHarvester {
            config: ComponentConfig,
            hc: HarvesterConfig,
            expected_before: DateTime<Utc>,
        }

        #[async_trait]
        impl Harvester for DepAssertingHarvester {
            fn configuration(&self) -> &ComponentConfig {
                &self.config
            }
            fn harvester_config(&self) -> &HarvesterConfig {
                &self.hc
            }
            async fn harvest(
                &self,
                _source: &SourceData,
                deps: &DepsData,
                _fetcher: &DataFetcher,
            ) -> TwinResult<HarvestOutput> {
                let calib = deps.get("calib");
                assert_eq!(calib.len(), 1);
                assert!(calib[0].date < self.expected_before);
                Ok(HarvestOutput::One(Bytes::from_static(b"{}")))
            }
        }

        let harvester: Arc<dyn Harvester> = Arc::new(DepAssertingHarvester {
            config: ComponentConfig::new("avg", "application/json"),
            hc: HarvesterConfig::default()
                .with_source("weather")
                .with_source_range(json!(2))
                .with_dependency("calib", 1),
            expected_before: t0 + Duration::seconds(1),
        });

        assert!(run_harvester(&harvester, &ctx, &events).await.unwrap());
    }
}
