// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::merkle::{BlockHash, RowHash};
use crate::schema::Record;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote rejected request ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("Remote server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Remote unreachable: {0}")]
    Network(String),
    #[error("Malformed remote response: {0}")]
    Decode(String),
    #[error("Remote does not support {0}")]
    Unsupported(String),
    /// The list endpoint still reported more pages after `pages` requests.
    #[error("Listing incomplete after {pages} pages")]
    Truncated { pages: usize },
}

impl RemoteError {
    /// 4xx or an operation the remote doesn't offer. Not worth retrying.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. } | Self::Unsupported(_))
    }

    /// 5xx or transport failure. Worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Client { .. } => "client",
            Self::Server { .. } => "server",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::Unsupported(_) => "unsupported",
            Self::Truncated { .. } => "truncated",
        }
    }

    /// Map an HTTP status to the error taxonomy.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            Self::Client { status, message }
        } else {
            Self::Server { status, message }
        }
    }
}

/// Query parameters for the paginated list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// 1-based page number.
    pub page: u32,
    pub page_size: usize,
    /// Extra filter parameters passed through verbatim.
    pub filters: Vec<(String, String)>,
    pub sort: Option<String>,
}

impl ListParams {
    #[must_use]
    pub fn first_page(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Same filters, next page.
    #[must_use]
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Record>,
    pub has_more: bool,
}

/// Inclusive span of IDs present on the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start: i64,
    pub end: i64,
}

impl IdRange {
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.start <= id && id <= self.end
    }

    /// Collapse sorted, deduplicated IDs into contiguous ranges.
    #[must_use]
    pub fn from_sorted_ids(ids: &[i64]) -> Vec<IdRange> {
        let mut ranges: Vec<IdRange> = Vec::new();
        for &id in ids {
            match ranges.last_mut() {
                Some(last) if last.end.checked_add(1) == Some(id) => last.end = id,
                _ => ranges.push(IdRange { start: id, end: id }),
            }
        }
        ranges
    }
}

/// `{globalHash, rowCount}`. A missing hash means the authority doesn't
/// compute integrity for this table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityGlobal {
    #[serde(default)]
    pub global_hash: Option<String>,
    #[serde(default)]
    pub row_count: u64,
}

/// Response of the debug endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugHash {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// REST resource surface for one entity endpoint.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list(&self, endpoint: &str, params: &ListParams) -> Result<Page, RemoteError>;

    /// `GET {endpoint}?ids=a,b,c`
    async fn fetch_by_ids(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError>;

    /// `POST {endpoint}/batch-fetch`. Remotes without it report `Unsupported`.
    async fn batch_fetch(&self, endpoint: &str, ids: &[i64]) -> Result<Vec<Record>, RemoteError> {
        let _ = (endpoint, ids);
        Err(RemoteError::Unsupported("batch-fetch".into()))
    }

    async fn create(&self, endpoint: &str, record: &Record) -> Result<Record, RemoteError>;
    async fn update(&self, endpoint: &str, id: i64, record: &Record) -> Result<Record, RemoteError>;
    async fn delete(&self, endpoint: &str, id: i64) -> Result<(), RemoteError>;
}

/// Integrity endpoints, keyed by the authority's table name.
#[async_trait]
pub trait IntegrityAuthority: Send + Sync {
    async fn global(&self, table: &str) -> Result<AuthorityGlobal, RemoteError>;
    async fn id_ranges(&self, table: &str) -> Result<Vec<IdRange>, RemoteError>;
    async fn blocks(&self, table: &str) -> Result<Vec<BlockHash>, RemoteError>;
    async fn block_rows(&self, table: &str, block_id: i64) -> Result<Vec<RowHash>, RemoteError>;

    async fn debug_row(&self, table: &str, id: i64) -> Result<DebugHash, RemoteError>;
    async fn debug_block(&self, table: &str, block_id: i64) -> Result<DebugHash, RemoteError>;
    async fn debug_global(&self, table: &str) -> Result<DebugHash, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(RemoteError::from_status(404, "nope").is_client_error());
        assert!(RemoteError::from_status(503, "down").is_transient());
        assert!(RemoteError::Network("timeout".into()).is_transient());
        assert!(!RemoteError::Decode("bad json".into()).is_transient());
        assert!(RemoteError::Unsupported("batch-fetch".into()).is_client_error());
    }

    #[test]
    fn test_ranges_from_ids() {
        let ranges = IdRange::from_sorted_ids(&[1, 2, 3, 7, 9, 10]);
        assert_eq!(
            ranges,
            vec![
                IdRange { start: 1, end: 3 },
                IdRange { start: 7, end: 7 },
                IdRange { start: 9, end: 10 },
            ]
        );
        assert!(IdRange::from_sorted_ids(&[]).is_empty());
        assert!(ranges[0].contains(2));
        assert!(!ranges[0].contains(4));
    }

    #[test]
    fn test_authority_global_without_hash() {
        let global: AuthorityGlobal = serde_json::from_str(r#"{"rowCount": 5}"#).unwrap();
        assert_eq!(global.global_hash, None);
        assert_eq!(global.row_count, 5);
    }

    #[test]
    fn test_list_params_paging() {
        let params = ListParams::first_page(50).filter("archived", "false").sort("id");
        let next = params.next_page();
        assert_eq!(next.page, 2);
        assert_eq!(next.filters, params.filters);
        assert_eq!(next.sort.as_deref(), Some("id"));
    }
}
