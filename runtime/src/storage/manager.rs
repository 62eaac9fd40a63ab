use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use super::{MetadataStore, ObjectStore, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoragesStatus {
    #[default]
    Created,
    Initialized,
    Finalized,
}

enum Backend {
    Metadata(Arc<dyn MetadataStore>),
    Objects(Arc<dyn ObjectStore>),
}

struct Registered {
    name: String,
    backend: Backend,
}

/// Owns the startup and shutdown order of the storage backends.
///
/// Backends are initialized one after another in registration order and
/// finalized in reverse.
#[derive(Default)]
pub struct StorageManager {
    status: StoragesStatus,
    storages: Vec<Registered>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StoragesStatus {
        self.status
    }

    pub fn register_metadata<T>(&mut self, name: impl Into<String>, storage: Arc<T>)
    where
        T: MetadataStore + 'static,
    {
        self.storages.push(Registered {
            name: name.into(),
            backend: Backend::Metadata(storage),
        });
    }

    pub fn register_objects<T>(&mut self, name: impl Into<String>, storage: Arc<T>)
    where
        T: ObjectStore + 'static,
    {
        self.storages.push(Registered {
            name: name.into(),
            backend: Backend::Objects(storage),
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.storages.iter().map(|s| s.name.as_str()).collect()
    }

    pub async fn initialize_all(&mut self) -> StorageResult<()> {
        if self.status == StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            let result = match &storage.backend {
                Backend::Metadata(store) => store.initialize().await,
                Backend::Objects(store) => store.initialize().await,
            };
            result.with_context(|| format!("failed to initialize storage {}", storage.name))?;
            info!(storage = %storage.name, "storage initialized");
        }

        self.status = StoragesStatus::Initialized;
        Ok(())
    }

    /// Flushes every backend, even when an earlier one fails; the first
    /// failure is returned.
    pub async fn finalize_all(&mut self) -> StorageResult<()> {
        let mut first_error = None;

        for storage in self.storages.iter().rev() {
            let result = match &storage.backend {
                Backend::Metadata(store) => store.finalize().await,
                // object writes are durable on return
                Backend::Objects(_) => Ok(()),
            };
            if let Err(err) = result {
                warn!(storage = %storage.name, error = %err, "storage finalize failed");
                first_error.get_or_insert(
                    err.context(format!("failed to finalize storage {}", storage.name)),
                );
            }
        }

        self.status = StoragesStatus::Finalized;
        first_error.map_or(Ok(()), Err)
    }
}
