use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::storage::{ObjectStore, StorageLocation};

/// Text-extraction capability: storage coordinates in, ordered text lines out.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_lines(&self, source: &StorageLocation) -> Result<Vec<String>>;
}

/// Reads the object as UTF-8 and returns its non-blank lines.
///
/// Stands in for an OCR engine when running locally; binary sources such as
/// scanned images are rejected as not valid UTF-8.
#[derive(Clone)]
pub struct PlainTextExtractor {
    objects: Arc<dyn ObjectStore>,
}

impl PlainTextExtractor {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_lines(&self, source: &StorageLocation) -> Result<Vec<String>> {
        let bytes = self.objects.get(source).await?;
        if bytes.is_empty() {
            return Err(anyhow!("document {source} is empty"));
        }

        let text =
            String::from_utf8(bytes).map_err(|_| anyhow!("document {source} is not valid UTF-8"))?;

        Ok(text
            .lines()
            .map(|line| line.trim_end_matches('\r').trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Joins extracted lines into one blob, one line per row, each terminated by
/// a newline.
pub fn join_lines(lines: &[String]) -> String {
    lines.iter().fold(String::new(), |mut blob, line| {
        blob.push_str(line);
        blob.push('\n');
        blob
    })
}
