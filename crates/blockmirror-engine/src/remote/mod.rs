//! Contract with the remote content service.
//!
//! Implementations:
//! - `InMemoryRemote` - complete in-process service for tests and offline use
//! - an HTTP client owning authentication and rate limiting lives outside the engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::RemoteRecord;

mod memory;
mod pull;

pub use memory::{CallKind, InMemoryRemote, RemoteCall};
pub use pull::pull_tree;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. } | RemoteError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Page-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub last_edited_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where new records go among a parent's existing children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<'a> {
    /// Before the first child
    Start,
    /// Directly after the named child
    After(&'a str),
    /// After the last child
    End,
}

impl<'a> Position<'a> {
    /// After the nearest preceding sibling, or at the start when there is none
    pub fn following(sibling: Option<&'a str>) -> Self {
        sibling.map_or(Position::Start, Position::After)
    }

    pub fn after(&self) -> Option<&'a str> {
        match *self {
            Position::After(id) => Some(id),
            Position::Start | Position::End => None,
        }
    }
}

/// One page of a paginated children listing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChildrenPage {
    pub records: Vec<RemoteRecord>,
    pub next_cursor: Option<String>,
}

/// The remote content service, as the sync engine needs it.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn fetch_metadata(&self, page_id: &str) -> Result<PageMeta>;

    /// Direct children of a page or block, `page_size` at a time
    async fn fetch_children(
        &self,
        id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage>;

    /// Insert `records` under `parent` in order, starting at `position`.
    /// Returns the created records carrying real ids.
    ///
    /// Services whose append call only knows "after a child" or "at the end"
    /// must implement [`Position::Start`] themselves.
    async fn append_children(
        &self,
        parent: &str,
        position: Position<'_>,
        records: Vec<RemoteRecord>,
    ) -> Result<Vec<RemoteRecord>>;

    async fn update_block(&self, id: &str, record: RemoteRecord) -> Result<RemoteRecord>;

    /// Delete a block; its descendants go with it
    async fn delete_block(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<T: RemoteService + ?Sized> RemoteService for Arc<T> {
    async fn fetch_metadata(&self, page_id: &str) -> Result<PageMeta> {
        (**self).fetch_metadata(page_id).await
    }

    async fn fetch_children(
        &self,
        id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage> {
        (**self).fetch_children(id, cursor, page_size).await
    }

    async fn append_children(
        &self,
        parent: &str,
        position: Position<'_>,
        records: Vec<RemoteRecord>,
    ) -> Result<Vec<RemoteRecord>> {
        (**self).append_children(parent, position, records).await
    }

    async fn update_block(&self, id: &str, record: RemoteRecord) -> Result<RemoteRecord> {
        (**self).update_block(id, record).await
    }

    async fn delete_block(&self, id: &str) -> Result<()> {
        (**self).delete_block(id).await
    }
}
