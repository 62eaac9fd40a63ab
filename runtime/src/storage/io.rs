use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StorageResult;

pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    Ok(())
}

/// `None` when nothing has been written yet.
pub async fn read_json_file<T>(path: &Path) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(serde_json::from_slice::<T>(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Atomically replace `path` with `bytes` using a temp file + rename.
///
/// The write is fsync'd before the rename.
pub async fn write_file_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    ensure_parent_dir(path).await?;

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn write_json_file<T>(path: &Path, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value)?;
    write_file_atomic(path, &json).await
}

/// Table contents at `path`; an absent or zero-length file is an empty table.
pub async fn load_or_default<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    Ok(read_json_file::<T>(path).await?.unwrap_or_default())
}

/// Sibling of `path` so the final rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let name = match path.file_name() {
        Some(name) => format!("{}.tmp", name.to_string_lossy()),
        None => "table.tmp".to_string(),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_or_absent_table_loads_as_default() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("metadata_documents.json");

        let absent: HashMap<String, u32> = load_or_default(&path).await?;
        assert!(absent.is_empty());

        ensure_parent_dir(&path).await?;
        fs::write(&path, b"").await?;
        let empty: HashMap<String, u32> = load_or_default(&path).await?;
        assert!(empty.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("metadata_documents.json");

        write_json_file(&path, &HashMap::from([("doc-1", 3u32)])).await?;
        let loaded: HashMap<String, u32> = load_or_default(&path).await?;
        assert_eq!(loaded.get("doc-1"), Some(&3));
        assert!(!temp_path(&path).exists());
        assert!(temp_path(&path).ends_with("metadata_documents.json.tmp"));
        Ok(())
    }
}
