//! Built-in read endpoints for record-bearing components. Collectors
//! and harvesters expose their raw and derived artifacts through
//! these; payload bytes stay in the blob store until `/{id}/data` asks
//! for them.

use chrono::{DateTime, Utc};
use serde_json::json;

use twin_core::{TwinError, TwinResult};
use twin_store::SortOrder;

use crate::component::ComponentContext;
use crate::config::ComponentConfig;
use crate::endpoint::{EndpointRequest, EndpointResponse, EndpointSpec};

const DEFAULT_LIST_LIMIT: usize = 100;

fn parse_date(value: &str, name: &str) -> TwinResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            TwinError::validation(format!("invalid {name} timestamp {value:?}: {e}")).into_anyhow()
        })
}

fn parse_id(req: &EndpointRequest) -> TwinResult<i64> {
    let raw = req
        .param("id")
        .ok_or_else(|| TwinError::validation("missing id parameter").into_anyhow())?;
    raw.parse::<i64>()
        .map_err(|_| TwinError::validation(format!("invalid record id {raw:?}")).into_anyhow())
}

/// `GET /`, `GET /latest`, `GET /{id}`, `GET /{id}/data`.
pub fn endpoints(config: &ComponentConfig, ctx: &ComponentContext) -> Vec<EndpointSpec> {
    let table = config.name.clone();

    let list = {
        let records = ctx.records.clone();
        let table = table.clone();
        EndpointSpec::get("/", move |req: EndpointRequest| {
            let records = records.clone();
            let table = table.clone();
            async move {
                let limit = match req.query_value("limit") {
                    Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                        TwinError::validation(format!("invalid limit {raw:?}")).into_anyhow()
                    })?),
                    None => Some(DEFAULT_LIST_LIMIT),
                };

                let from = req.query_value("from").map(|v| parse_date(v, "from")).transpose()?;
                let to = req.query_value("to").map(|v| parse_date(v, "to")).transpose()?;

                let items = match (from, to) {
                    (None, None) => records.list(&table, limit, SortOrder::Desc).await?,
                    (from, to) => {
                        let start = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
                        let end = to.unwrap_or(DateTime::<Utc>::MAX_UTC);
                        records
                            .records_in_range(&table, start, end, limit, SortOrder::Desc)
                            .await?
                    }
                };

                let items: Vec<serde_json::Value> = items.iter().map(|r| r.to_json()).collect();
                Ok(EndpointResponse::ok_json(json!(items)))
            }
        })
    };

    let latest = {
        let records = ctx.records.clone();
        let table = table.clone();
        EndpointSpec::get("/latest", move |_req: EndpointRequest| {
            let records = records.clone();
            let table = table.clone();
            async move {
                let record = records.latest(&table).await?.ok_or_else(|| {
                    TwinError::not_found(format!("no records for {table:?}")).into_anyhow()
                })?;
                Ok(EndpointResponse::ok_json(record.to_json()))
            }
        })
    };

    let get_one = {
        let records = ctx.records.clone();
        let table = table.clone();
        EndpointSpec::get("/{id}", move |req: EndpointRequest| {
            let records = records.clone();
            let table = table.clone();
            async move {
                let id = parse_id(&req)?;
                let record = records.get(&table, id).await?.ok_or_else(|| {
                    TwinError::not_found(format!("no record {id} for {table:?}")).into_anyhow()
                })?;
                Ok(EndpointResponse::ok_json(record.to_json()))
            }
        })
    };

    let data = {
        let records = ctx.records.clone();
        let fetcher = ctx.fetcher();
        let table = table.clone();
        EndpointSpec::get("/{id}/data", move |req: EndpointRequest| {
            let records = records.clone();
            let fetcher = fetcher.clone();
            let table = table.clone();
            async move {
                let id = parse_id(&req)?;
                let record = records.get(&table, id).await?.ok_or_else(|| {
                    TwinError::not_found(format!("no record {id} for {table:?}")).into_anyhow()
                })?;
                let bytes = fetcher.fetch(&record).await?;
                Ok(EndpointResponse::bytes(200, record.content_type.clone(), bytes))
            }
        })
    };

    vec![list, latest, get_one, data]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::test_support::request;
    use crate::endpoint::Method;
    use bytes::Bytes;
    use std::sync::Arc;
    use twin_blob::{BlobStore, MemoryBlobStore};
    use twin_store::{MemoryRecordStore, NewRecord, RecordStore, TableSchema};

    async fn seeded() -> (ComponentContext, ComponentConfig) {
        let records = Arc::new(MemoryRecordStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        records
            .ensure_table(&TableSchema::records("weather"))
            .await
            .unwrap();

        let handle = blobs
            .save(Bytes::from_static(b"{\"t\":22}"), "weather", Some("json"))
            .await
            .unwrap();
        records
            .insert(
                "weather",
                NewRecord::new("weather", "application/json", handle, Utc::now()),
            )
            .await
            .unwrap();

        let ctx = ComponentContext::new(records, blobs);
        (ctx, ComponentConfig::new("weather", "application/json"))
    }

    #[tokio::test]
    async fn latest_and_data_round_trip() {
        let (ctx, config) = seeded().await;
        let endpoints = endpoints(&config, &ctx);

        let latest = endpoints.iter().find(|e| e.path == "/latest").unwrap();
        let response = (latest.handler)(request(Method::Get, "/latest")).await.unwrap();
        assert_eq!(response.status, 200);

        let data = endpoints.iter().find(|e| e.path == "/{id}/data").unwrap();
        let mut req = request(Method::Get, "/1/data");
        req.params.insert("id".to_string(), "1".to_string());
        let response = (data.handler)(req).await.unwrap();
        match response.body {
            crate::endpoint::ResponseBody::Bytes { content_type, data } => {
                assert_eq!(content_type, "application/json");
                assert_eq!(data, Bytes::from_static(b"{\"t\":22}"));
            }
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (ctx, config) = seeded().await;
        let endpoints = endpoints(&config, &ctx);

        let get_one = endpoints.iter().find(|e| e.path == "/{id}").unwrap();
        let mut req = request(Method::Get, "/99");
        req.params.insert("id".to_string(), "99".to_string());
        let err = (get_one.handler)(req).await.unwrap_err();
        let twin = TwinError::from_anyhow(&err).unwrap();
        assert_eq!(twin.kind, twin_core::ErrorKind::NotFound);
    }
}
