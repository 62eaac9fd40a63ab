use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::StoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    Received,
    TextExtracted,
    Classified,
    Failed,
}

impl DocStatus {
    pub const ALL: [DocStatus; 4] = [
        DocStatus::Received,
        DocStatus::TextExtracted,
        DocStatus::Classified,
        DocStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Received => "RECEIVED",
            DocStatus::TextExtracted => "TEXT_EXTRACTED",
            DocStatus::Classified => "CLASSIFIED",
            DocStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocStatus::Classified | DocStatus::Failed)
    }

    /// Edges of the lifecycle graph. Self-edges are not listed here; they are
    /// handled as idempotent re-applications by [`DocStatus::transition`].
    pub fn can_transition_to(&self, next: DocStatus) -> bool {
        matches!(
            (self, next),
            (DocStatus::Received, DocStatus::TextExtracted)
                | (DocStatus::TextExtracted, DocStatus::Classified)
                | (DocStatus::Received, DocStatus::Failed)
                | (DocStatus::TextExtracted, DocStatus::Failed)
        )
    }

    pub fn transition(self, next: DocStatus) -> Result<DocStatus, InvalidTransition> {
        if self == next || self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown status {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: DocStatus,
    pub to: DocStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Invoice,
    Receipt,
    Contract,
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "INVOICE",
            DocumentType::Receipt => "RECEIPT",
            DocumentType::Contract => "CONTRACT",
            DocumentType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INVOICE" => Ok(DocumentType::Invoice),
            "RECEIPT" => Ok(DocumentType::Receipt),
            "CONTRACT" => Ok(DocumentType::Contract),
            "UNKNOWN" => Ok(DocumentType::Unknown),
            other => Err(format!("unknown document type {other}")),
        }
    }
}

/// Bucket/key coordinates of an object in external storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

pub mod attr {
    pub const DOCUMENT_ID: &str = "DocumentId";
    pub const STATUS: &str = "Status";
    pub const S3_BUCKET: &str = "S3Bucket";
    pub const S3_KEY: &str = "S3Key";
    pub const ORIGINAL_FILE_NAME: &str = "OriginalFileName";
    pub const CREATED_AT: &str = "CreatedAt";
    pub const FILE_SIZE: &str = "FileSize";
    pub const TEXT_S3_KEY: &str = "TextS3Key";
    pub const DOCUMENT_TYPE: &str = "DocumentType";
    pub const FAILURE_REASON: &str = "FailureReason";
    pub const UPDATED_AT: &str = "UpdatedAt";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "DocumentId")]
    pub document_id: String,
    #[serde(rename = "Status")]
    pub status: DocStatus,
    #[serde(rename = "S3Bucket")]
    pub source_bucket: String,
    #[serde(rename = "S3Key")]
    pub source_key: String,
    #[serde(rename = "OriginalFileName")]
    pub original_name: String,
    #[serde(rename = "CreatedAt")]
    pub created_at: String,
    #[serde(rename = "FileSize")]
    pub size: u64,
    #[serde(rename = "TextS3Key", default, skip_serializing_if = "Option::is_none")]
    pub extracted_text_location: Option<String>,
    #[serde(rename = "DocumentType", default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    #[serde(rename = "FailureReason", default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(rename = "UpdatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DocumentRecord {
    pub fn source_location(&self) -> StorageLocation {
        StorageLocation::new(&self.source_bucket, &self.source_key)
    }

    /// String-typed attribute image, as carried by change-feed events.
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut image = BTreeMap::new();
        image.insert(attr::DOCUMENT_ID.into(), self.document_id.clone());
        image.insert(attr::STATUS.into(), self.status.as_str().into());
        image.insert(attr::S3_BUCKET.into(), self.source_bucket.clone());
        image.insert(attr::S3_KEY.into(), self.source_key.clone());
        image.insert(attr::ORIGINAL_FILE_NAME.into(), self.original_name.clone());
        image.insert(attr::CREATED_AT.into(), self.created_at.clone());
        image.insert(attr::FILE_SIZE.into(), self.size.to_string());
        if let Some(location) = &self.extracted_text_location {
            image.insert(attr::TEXT_S3_KEY.into(), location.clone());
        }
        if let Some(doc_type) = &self.document_type {
            image.insert(attr::DOCUMENT_TYPE.into(), doc_type.as_str().into());
        }
        if let Some(reason) = &self.failure_reason {
            image.insert(attr::FAILURE_REASON.into(), reason.clone());
        }
        if let Some(updated_at) = &self.updated_at {
            image.insert(attr::UPDATED_AT.into(), updated_at.clone());
        }
        image
    }
}

/// Partial update of the stage-owned fields of a record.
///
/// A `None` field is left untouched. When `status` is `None` the update is
/// checked against the record's current status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdates {
    pub status: Option<DocStatus>,
    pub extracted_text_location: Option<String>,
    pub document_type: Option<DocumentType>,
    pub failure_reason: Option<String>,
}

impl FieldUpdates {
    pub fn text_extracted(location: impl Into<String>) -> Self {
        Self {
            status: Some(DocStatus::TextExtracted),
            extracted_text_location: Some(location.into()),
            ..Default::default()
        }
    }

    pub fn classified(document_type: DocumentType) -> Self {
        Self {
            status: Some(DocStatus::Classified),
            document_type: Some(document_type),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(DocStatus::Failed),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Validates `updates` against `current` and returns the new record, or
/// `None` when the update re-applies what is already stored.
///
/// Every metadata store implementation routes its conditional update through
/// here so the lifecycle graph and field ownership rules hold regardless of
/// the backing engine.
pub fn apply_updates(
    current: &DocumentRecord,
    updates: &FieldUpdates,
    now: &str,
) -> Result<Option<DocumentRecord>, StoreError> {
    let id = &current.document_id;
    let target = updates.status.unwrap_or(current.status);

    current
        .status
        .transition(target)
        .map_err(|err| StoreError::InvalidTransition {
            document_id: id.clone(),
            from: err.from,
            to: err.to,
        })?;

    let invalid = |reason: &str| StoreError::InvalidUpdate {
        document_id: id.clone(),
        reason: reason.to_string(),
    };

    if updates.extracted_text_location.is_some() && target != DocStatus::TextExtracted {
        return Err(invalid("TextS3Key may only be set with status TEXT_EXTRACTED"));
    }
    if updates.document_type.is_some() && target != DocStatus::Classified {
        return Err(invalid("DocumentType may only be set with status CLASSIFIED"));
    }
    if updates.failure_reason.is_some() && target != DocStatus::Failed {
        return Err(invalid("FailureReason may only be set with status FAILED"));
    }

    if target == current.status {
        let same = updates
            .extracted_text_location
            .as_ref()
            .is_none_or(|v| current.extracted_text_location.as_ref() == Some(v))
            && updates
                .document_type
                .is_none_or(|v| current.document_type == Some(v))
            && updates
                .failure_reason
                .as_ref()
                .is_none_or(|v| current.failure_reason.as_ref() == Some(v));

        return if same {
            Ok(None)
        } else {
            Err(invalid("conflicting re-application of the current status"))
        };
    }

    let mut next = current.clone();
    next.status = target;
    next.updated_at = Some(now.to_string());

    match target {
        DocStatus::TextExtracted => {
            next.extracted_text_location = Some(
                updates
                    .extracted_text_location
                    .clone()
                    .ok_or_else(|| invalid("TEXT_EXTRACTED requires TextS3Key"))?,
            );
        }
        DocStatus::Classified => {
            next.document_type = Some(
                updates
                    .document_type
                    .ok_or_else(|| invalid("CLASSIFIED requires DocumentType"))?,
            );
        }
        DocStatus::Failed => {
            next.failure_reason = Some(
                updates
                    .failure_reason
                    .clone()
                    .ok_or_else(|| invalid("FAILED requires FailureReason"))?,
            );
        }
        DocStatus::Received => {}
    }

    Ok(Some(next))
}
