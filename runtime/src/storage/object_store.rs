use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

use super::io::write_file_atomic;
use super::record::StorageLocation;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>>;
    async fn put(&self, location: &StorageLocation, bytes: Vec<u8>) -> Result<()>;
}

/// Buckets as directories under a root, keys as relative paths.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, location: &StorageLocation) -> Result<PathBuf> {
        let bucket = sanitize_segment(&location.bucket)?;
        let key = Path::new(&location.key);
        if location.key.trim().is_empty()
            || key
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(anyhow!("invalid object key {:?}", location.key));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create object root {}", self.root.display()))
    }

    async fn get(&self, location: &StorageLocation) -> Result<Vec<u8>> {
        let path = self.path_for(location)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object {location}"))
    }

    async fn put(&self, location: &StorageLocation, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(location)?;
        write_file_atomic(&path, &bytes)
            .await
            .with_context(|| format!("failed to write object {location}"))
    }
}

fn sanitize_segment(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("bucket name cannot be empty"));
    }

    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(anyhow!("invalid bucket name {raw:?}"));
    }

    Ok(trimmed)
}
