use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use super::{
    ChangeEvent, ChangeFeed, DocStatus, DocumentRecord, FieldUpdates, MetadataStore, StoreError,
    apply_updates,
};
use crate::bus::batching::{BatchConfig, batched};

#[derive(Clone, Debug)]
pub struct JsonMetadataConfig {
    pub working_dir: PathBuf,
    pub table_name: String,
    pub workspace: Option<String>,
    pub feed: BatchConfig,
}

/// Metadata table persisted as a single JSON document.
///
/// Every committed write is flushed to disk before it is acknowledged and
/// before its change event is emitted; a failed flush rolls the in-memory
/// table back so callers never observe a write that is not durable.
pub struct JsonMetadataStore {
    final_namespace: String,
    file_path: PathBuf,
    data: Arc<RwLock<HashMap<String, DocumentRecord>>>,
    dirty: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>,
    feed_config: BatchConfig,
}

impl JsonMetadataStore {
    pub fn new(config: JsonMetadataConfig) -> Self {
        let JsonMetadataConfig {
            working_dir,
            table_name,
            workspace,
            feed,
        } = config;

        let (workspace_prefix, workspace_dir) = match workspace.as_deref() {
            Some(ws) if !ws.is_empty() => (ws.to_string(), working_dir.join(ws)),
            _ => ("_".to_string(), working_dir.clone()),
        };

        let final_namespace = format!("{}_{}", workspace_prefix, table_name);
        let file_path = workspace_dir.join(format!("metadata_{}.json", table_name));

        Self {
            final_namespace,
            file_path,
            data: Arc::new(RwLock::new(HashMap::new())),
            dirty: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            feed_config: feed,
        }
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }

    async fn flush(&self, snapshot: &HashMap<String, DocumentRecord>) -> Result<()> {
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        write_json_file(&self.file_path, snapshot)
            .await
            .with_context(|| format!("failed to write metadata table {}", self.final_namespace))
    }

    fn emit(&self, event: ChangeEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn unavailable(err: anyhow::Error) -> StoreError {
        StoreError::Unavailable(format!("{err:#}"))
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn initialize(&self) -> Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data: HashMap<String, DocumentRecord> = load_or_default(&self.file_path)
            .await
            .with_context(|| format!("failed to load metadata table {}", self.final_namespace))?;
        *self.data.write().await = data;
        self.dirty.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let guard = self.data.read().await;
        self.flush(&guard).await
    }

    async fn create(&self, record: DocumentRecord) -> Result<(), StoreError> {
        self.create_all(vec![record]).await
    }

    async fn create_all(&self, records: Vec<DocumentRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut guard = self.data.write().await;
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if guard.contains_key(&record.document_id) || !seen.insert(&record.document_id) {
                return Err(StoreError::AlreadyExists(record.document_id.clone()));
            }
        }

        for record in &records {
            guard.insert(record.document_id.clone(), record.clone());
        }
        self.dirty.store(true, AtomicOrdering::SeqCst);

        if let Err(err) = self.flush(&guard).await {
            for record in &records {
                guard.remove(&record.document_id);
            }
            return Err(Self::unavailable(err));
        }

        // emitted under the write guard so the feed follows commit order
        for record in &records {
            debug!(doc_id = %record.document_id, "metadata record created");
            self.emit(ChangeEvent::insert(record));
        }
        Ok(())
    }

    async fn update(
        &self,
        document_id: &str,
        updates: FieldUpdates,
    ) -> Result<DocumentRecord, StoreError> {
        let mut guard = self.data.write().await;
        let current = guard
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;

        let now = chrono::Utc::now().to_rfc3339();
        let Some(next) = apply_updates(&current, &updates, &now)? else {
            return Ok(current);
        };

        guard.insert(document_id.to_string(), next.clone());
        self.dirty.store(true, AtomicOrdering::SeqCst);

        if let Err(err) = self.flush(&guard).await {
            guard.insert(document_id.to_string(), current);
            return Err(Self::unavailable(err));
        }

        debug!(doc_id = %document_id, status = %next.status, "metadata record updated");
        self.emit(ChangeEvent::modify(&next));
        Ok(next)
    }

    async fn read(&self, document_id: &str) -> Result<DocumentRecord, StoreError> {
        let guard = self.data.read().await;
        guard
            .get(document_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }

    async fn list_by_status(&self, status: DocStatus) -> Result<Vec<DocumentRecord>, StoreError> {
        let guard = self.data.read().await;
        let mut records: Vec<DocumentRecord> = guard
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn status_counts(&self) -> Result<HashMap<DocStatus, usize>, StoreError> {
        let guard = self.data.read().await;
        let mut counts: HashMap<DocStatus, usize> = HashMap::new();
        for record in guard.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn change_feed(&self) -> ChangeFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        batched(rx, self.feed_config)
    }
}
