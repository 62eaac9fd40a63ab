use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod io;
pub mod json_metadata;
pub mod manager;
pub mod object_store;
pub mod record;

pub use io::*;
pub use json_metadata::{JsonMetadataConfig, JsonMetadataStore};
pub use manager::{StorageManager, StoragesStatus};
pub use object_store::{FsObjectStore, ObjectStore};
pub use record::{
    DocStatus, DocumentRecord, DocumentType, FieldUpdates, StorageLocation, apply_updates,
};

pub type StorageResult<T> = Result<T>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("document {0} already exists")]
    AlreadyExists(String),

    #[error("invalid status transition for {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: String,
        from: DocStatus,
        to: DocStatus,
    },

    #[error("invalid update for {document_id}: {reason}")]
    InvalidUpdate { document_id: String, reason: String },

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Only transport-level failures are worth retrying; everything else is a
    /// decision the store has already made about the record.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
}

/// One mutation notification from the metadata store's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventName")]
    pub event_name: ChangeKind,
    #[serde(rename = "NewImage")]
    pub new_image: BTreeMap<String, String>,
}

impl ChangeEvent {
    pub fn insert(record: &DocumentRecord) -> Self {
        Self {
            event_name: ChangeKind::Insert,
            new_image: record.to_attributes(),
        }
    }

    pub fn modify(record: &DocumentRecord) -> Self {
        Self {
            event_name: ChangeKind::Modify,
            new_image: record.to_attributes(),
        }
    }
}

pub type ChangeFeed = BoxStream<'static, Vec<ChangeEvent>>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn create(&self, record: DocumentRecord) -> Result<(), StoreError>;

    /// Inserts every record or none of them.
    async fn create_all(&self, records: Vec<DocumentRecord>) -> Result<(), StoreError>;

    /// Conditional partial update. Returns the record as stored afterwards.
    async fn update(
        &self,
        document_id: &str,
        updates: FieldUpdates,
    ) -> Result<DocumentRecord, StoreError>;

    async fn read(&self, document_id: &str) -> Result<DocumentRecord, StoreError>;

    async fn list_by_status(&self, status: DocStatus) -> Result<Vec<DocumentRecord>, StoreError>;
    async fn status_counts(&self) -> Result<HashMap<DocStatus, usize>, StoreError>;

    /// Batches of mutation events, in commit order.
    fn change_feed(&self) -> ChangeFeed;
}
