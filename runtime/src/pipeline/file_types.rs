use std::{collections::HashSet, path::Path};

use percent_encoding::percent_decode_str;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".pdf"];

/// Allow-list of source extensions the extraction capability accepts.
#[derive(Debug, Clone)]
pub struct SupportedTypes {
    extensions: HashSet<String>,
}

impl SupportedTypes {
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|ext| normalize_extension(ext)).collect(),
        }
    }

    pub fn is_supported(&self, key: &str) -> bool {
        Path::new(key)
            .extension()
            .and_then(|os| os.to_str())
            .map(normalize_extension)
            .is_some_and(|ext| self.extensions.contains(&ext))
    }
}

impl Default for SupportedTypes {
    fn default() -> Self {
        Self::new(SUPPORTED_EXTENSIONS)
    }
}

pub fn normalize_extension(ext: &str) -> String {
    if let Some(stripped) = ext.strip_prefix('.') {
        stripped.to_ascii_lowercase()
    } else {
        ext.to_ascii_lowercase()
    }
}

/// Reverses the form encoding object storage applies to keys in upload
/// notifications: `+` stands for a space and everything else is
/// percent-encoded.
pub fn decode_object_key(raw: &str) -> Result<String, String> {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|err| format!("object key is not valid UTF-8 after decoding: {err}"))
}

pub fn file_name_of(key: &str) -> String {
    Path::new(key)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(key)
        .to_string()
}

/// Deterministic location of a document's extracted text.
pub fn text_key_for(document_id: &str) -> String {
    format!("{document_id}.txt")
}
