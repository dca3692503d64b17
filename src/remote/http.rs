// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! REST + integrity client over `reqwest`.
//!
//! | Call | Request |
//! |---|---|
//! | list | `GET {endpoint}?page=N&pageSize=M[&sort=..][&filters..]` |
//! | fetch by IDs | `GET {endpoint}?ids=1,2,3` |
//! | batch fetch | `POST {endpoint}/batch-fetch {"ids": [..]}` |
//! | global | `GET /integrity/global?table=T` |
//! | ID ranges | `GET /integrity/id-ranges?table=T` |
//! | blocks | `GET /integrity/blocks?table=T` |
//! | block rows | `GET /integrity/blocks/{id}/rows?table=T` |
//! | debug | `GET /integrity/debug/{row,block,global}?table=T[&id=N][&blockId=N]` |
//!
//! Transient failures (5xx, transport) are retried with the `query` preset;
//! client errors come back immediately so the validator can degrade.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::traits::{
    AuthorityGlobal, DebugHash, IdRange, IntegrityAuthority, ListParams, Page, RemoteError,
    RemoteSource,
};
use crate::merkle::{BlockHash, RowHash};
use crate::resilience::retry::{retry_when, RetryConfig};
use crate::schema::Record;

/// HTTP implementation of [`RemoteSource`] and [`IntegrityAuthority`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    integrity_prefix: String,
    retry: RetryConfig,
}

impl HttpRemote {
    /// Client for `base_url` with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured client (auth headers, proxies, TLS).
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            integrity_prefix: "/integrity".into(),
            retry: RetryConfig::query(),
        }
    }

    #[must_use]
    pub fn integrity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.integrity_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn integrity_url(&self, path: &str) -> String {
        self.url(&format!("{}{}", self.integrity_prefix, path))
    }

    /// Send with retry, decode the body as `T`.
    async fn call<T, F>(&self, operation: &str, build: F) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let value = retry_when(
            operation,
            &self.retry,
            || Self::send(build()),
            RemoteError::is_transient,
        )
        .await
        .inspect_err(|e| crate::metrics::record_remote_error(operation, e.class()))?;

        serde_json::from_value(value).map_err(|e| {
            crate::metrics::record_remote_error(operation, "decode");
            RemoteError::Decode(format!("{}: {}", operation, e))
        })
    }

    async fn send(request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), message));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn ids_param(ids: &[i64]) -> String {
        ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
    }
}

/// Accepts a bare array (single page) or `{items|data, page, totalPages|hasMore}`.
fn parse_page(value: Value, requested_page: u32) -> Result<Page, RemoteError> {
    match value {
        Value::Array(items) => Ok(Page {
            items: records(items)?,
            has_more: false,
        }),
        Value::Object(mut obj) => {
            let items = match obj.remove("items").or_else(|| obj.remove("data")) {
                Some(Value::Array(items)) => records(items)?,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(RemoteError::Decode(format!("list items is not an array: {}", other)))
                }
            };
            let has_more = match (obj.get("hasMore"), obj.get("totalPages")) {
                (Some(Value::Bool(more)), _) => *more,
                (_, Some(total)) => {
                    let page = obj
                        .get("page")
                        .and_then(Value::as_u64)
                        .unwrap_or(u64::from(requested_page));
                    total.as_u64().is_some_and(|total| page < total)
                }
                _ => false,
            };
            Ok(Page { items, has_more })
        }
        other => Err(RemoteError::Decode(format!("unexpected list response: {}", other))),
    }
}

/// Accepts a bare array or `{items|data: [...]}`.
fn record_list(value: Value) -> Result<Vec<Record>, RemoteError> {
    parse_page(value, 1).map(|page| page.items)
}

fn records(items: Vec<Value>) -> Result<Vec<Record>, RemoteError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(RemoteError::Decode(format!("record is not an object: {}", other))),
        })
        .collect()
}

fn single_record(value: Value) -> Result<Record, RemoteError> {
    match value {
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                obj.insert("data".into(), other);
                Ok(obj)
            }
            None => Ok(obj),
        },
        other => Err(RemoteError::Decode(format!("record is not an object: {}", other))),
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn list(&self, endpoint: &str, params: &ListParams) -> Result<Page, RemoteError> {
        let url = self.url(endpoint);
        let mut query: Vec<(String, String)> = vec![
            ("page".into(), params.page.to_string()),
            ("pageSize".into(), params.page_size.to_string()),
        ];
        if let Some(ref sort) = params.sort {
            query.push(("sort".into(), sort.clone()));
        }
        query.extend(params.filters.iter().cloned());

        debug!(endpoint, page = params.page, "Listing remote page");
        let value: Value = self
            .call("list", || self.client.get(&url).query(&query))
            .await?;
        parse_page(value, params.page)
    }

    async fn fetch_by_ids(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        let url = self.url(endpoint);
        let ids = Self::ids_param(ids);
        let value: Value = self
            .call("fetch_by_ids", || self.client.get(&url).query(&[("ids", &ids)]))
            .await?;
        record_list(value)
    }

    async fn batch_fetch(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        let url = self.url(&format!("{}/batch-fetch", endpoint.trim_end_matches('/')));
        let body = json!({ "ids": ids });
        let value: Value = self
            .call("batch_fetch", || self.client.post(&url).json(&body))
            .await?;
        record_list(value)
    }

    async fn create(&self, endpoint: &str, record: &Record) -> Result<Record, RemoteError> {
        let url = self.url(endpoint);
        let value: Value = self
            .call("create", || self.client.post(&url).json(record))
            .await?;
        single_record(value)
    }

    async fn update(&self, endpoint: &str, id: i64, record: &Record) -> Result<Record, RemoteError> {
        let url = self.url(&format!("{}/{}", endpoint.trim_end_matches('/'), id));
        let value: Value = self
            .call("update", || self.client.request(Method::PUT, &url).json(record))
            .await?;
        single_record(value)
    }

    async fn delete(&self, endpoint: &str, id: i64) -> Result<(), RemoteError> {
        let url = self.url(&format!("{}/{}", endpoint.trim_end_matches('/'), id));
        let _: Value = self.call("delete", || self.client.delete(&url)).await?;
        Ok(())
    }
}

#[async_trait]
impl IntegrityAuthority for HttpRemote {
    async fn global(&self, table: &str) -> Result<AuthorityGlobal, RemoteError> {
        let url = self.integrity_url("/global");
        self.call("integrity_global", || self.client.get(&url).query(&[("table", table)]))
            .await
    }

    async fn id_ranges(&self, table: &str) -> Result<Vec<IdRange>, RemoteError> {
        let url = self.integrity_url("/id-ranges");
        self.call("integrity_id_ranges", || self.client.get(&url).query(&[("table", table)]))
            .await
    }

    async fn blocks(&self, table: &str) -> Result<Vec<BlockHash>, RemoteError> {
        let url = self.integrity_url("/blocks");
        self.call("integrity_blocks", || self.client.get(&url).query(&[("table", table)]))
            .await
    }

    async fn block_rows(&self, table: &str, block_id: i64) -> Result<Vec<RowHash>, RemoteError> {
        let url = self.integrity_url(&format!("/blocks/{}/rows", block_id));
        self.call("integrity_block_rows", || self.client.get(&url).query(&[("table", table)]))
            .await
    }

    async fn debug_row(&self, table: &str, id: i64) -> Result<DebugHash, RemoteError> {
        let url = self.integrity_url("/debug/row");
        let id = id.to_string();
        self.call("integrity_debug_row", || {
            self.client.get(&url).query(&[("table", table), ("id", id.as_str())])
        })
        .await
    }

    async fn debug_block(&self, table: &str, block_id: i64) -> Result<DebugHash, RemoteError> {
        let url = self.integrity_url("/debug/block");
        let block_id = block_id.to_string();
        self.call("integrity_debug_block", || {
            self.client.get(&url).query(&[("table", table), ("blockId", block_id.as_str())])
        })
        .await
    }

    async fn debug_global(&self, table: &str) -> Result<DebugHash, RemoteError> {
        let url = self.integrity_url("/debug/global");
        self.call("integrity_debug_global", || self.client.get(&url).query(&[("table", table)]))
            .await
    }
}
