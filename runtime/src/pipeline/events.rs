//! Typed payloads for every event that crosses a stage boundary.
//!
//! Parsing fails closed: a payload missing a required field is rejected with
//! a [`PayloadError`] instead of being carried forward with defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    bus::{Envelope, Message},
    storage::{ChangeEvent, ChangeKind, DocStatus, DocumentType, record::attr},
};

use super::file_types::{decode_object_key, file_name_of};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload is missing required field {0}")]
    MissingField(&'static str),

    #[error("payload field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Upload-completed notification as delivered by object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadNotification {
    #[serde(rename = "Records")]
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub s3: UploadEntity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEntity {
    pub bucket: UploadBucket,
    pub object: UploadObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadObjectRef {
    /// Key as sent by the transport, possibly percent/plus-encoded.
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

/// One uploaded object after the key has been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

impl UploadedObject {
    pub fn original_name(&self) -> String {
        file_name_of(&self.key)
    }
}

impl UploadNotification {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(raw).map_err(|err| PayloadError::Malformed(err.to_string()))
    }

    pub fn objects(&self) -> Result<Vec<UploadedObject>, PayloadError> {
        if self.records.is_empty() {
            return Err(PayloadError::MissingField("Records"));
        }

        self.records
            .iter()
            .map(|record| {
                let bucket = record.s3.bucket.name.trim();
                if bucket.is_empty() {
                    return Err(PayloadError::MissingField("s3.bucket.name"));
                }
                let key = decode_object_key(&record.s3.object.key).map_err(|reason| {
                    PayloadError::InvalidField {
                        field: "s3.object.key",
                        reason,
                    }
                })?;
                if key.is_empty() {
                    return Err(PayloadError::MissingField("s3.object.key"));
                }
                Ok(UploadedObject {
                    bucket: bucket.to_string(),
                    key,
                    size: record.s3.object.size,
                })
            })
            .collect()
    }
}

/// The fields the extraction stage needs from an inserted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedDocument {
    pub document_id: String,
    pub status: DocStatus,
    pub bucket: String,
    pub key: String,
    pub original_name: String,
}

impl InsertedDocument {
    /// `Ok(None)` for change events that are not insertions.
    pub fn from_change(event: &ChangeEvent) -> Result<Option<Self>, PayloadError> {
        if event.event_name != ChangeKind::Insert {
            return Ok(None);
        }

        let image = &event.new_image;
        let required = |field: &'static str| -> Result<String, PayloadError> {
            image
                .get(field)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or(PayloadError::MissingField(field))
        };

        let status = required(attr::STATUS)?
            .parse::<DocStatus>()
            .map_err(|reason| PayloadError::InvalidField {
                field: attr::STATUS,
                reason,
            })?;

        Ok(Some(Self {
            document_id: required(attr::DOCUMENT_ID)?,
            status,
            bucket: required(attr::S3_BUCKET)?,
            key: required(attr::S3_KEY)?,
            original_name: required(attr::ORIGINAL_FILE_NAME)?,
        }))
    }
}

/// Published by extraction, consumed by classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextReadyEvent {
    #[serde(rename = "DocumentId")]
    pub document_id: String,
    #[serde(rename = "TextS3Key")]
    pub extracted_text_location: String,
    #[serde(rename = "OriginalFileName")]
    pub original_name: String,
}

impl TextReadyEvent {
    pub fn parse(body: &str) -> Result<Self, PayloadError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "DocumentId")]
            document_id: Option<String>,
            #[serde(rename = "TextS3Key")]
            text_key: Option<String>,
            #[serde(rename = "OriginalFileName")]
            original_name: Option<String>,
        }

        let raw: Raw =
            serde_json::from_str(body).map_err(|err| PayloadError::Malformed(err.to_string()))?;

        let present = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or(PayloadError::MissingField(field))
        };

        Ok(Self {
            document_id: present(raw.document_id, attr::DOCUMENT_ID)?,
            extracted_text_location: present(raw.text_key, attr::TEXT_S3_KEY)?,
            original_name: present(raw.original_name, attr::ORIGINAL_FILE_NAME)?,
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, PayloadError> {
        Self::parse(&envelope.body)
    }
}

/// User-facing summary of a classified document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotification {
    pub subject: String,
    pub body: String,
}

impl UserNotification {
    pub fn classified(original_name: &str, document_id: &str, doc_type: DocumentType) -> Self {
        Self {
            subject: format!("Document Classified: {original_name}"),
            body: format!(
                "Document processing complete for: {original_name}\n\n\
                 Document ID: {document_id}\n\
                 Detected Type: {doc_type}"
            ),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, PayloadError> {
        let subject = envelope
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(PayloadError::MissingField("subject"))?;
        if envelope.body.trim().is_empty() {
            return Err(PayloadError::MissingField("body"));
        }
        Ok(Self {
            subject,
            body: envelope.body.clone(),
        })
    }
}

/// Every event kind a stage may emit, one variant per topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    TextReady(TextReadyEvent),
    DocumentClassified(UserNotification),
}

impl PipelineEvent {
    pub fn into_message(self) -> Message {
        match self {
            PipelineEvent::TextReady(event) => {
                let subject = Some(format!("Text extracted for {}", event.document_id));
                let mut body = Map::new();
                body.insert(attr::DOCUMENT_ID.into(), Value::String(event.document_id));
                body.insert(
                    attr::TEXT_S3_KEY.into(),
                    Value::String(event.extracted_text_location),
                );
                body.insert(
                    attr::ORIGINAL_FILE_NAME.into(),
                    Value::String(event.original_name),
                );
                Message {
                    subject,
                    body: Value::Object(body).to_string(),
                }
            }
            PipelineEvent::DocumentClassified(notification) => Message {
                subject: Some(notification.subject),
                body: notification.body,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn upload_notification_decodes_keys() {
        let raw = r#"{"Records":[{"s3":{"bucket":{"name":"uploads"},
            "object":{"key":"Invoices/Q1+report.pdf","size":2048}}}]}"#;
        let objects = UploadNotification::parse(raw).unwrap().objects().unwrap();
        assert_eq!(
            objects,
            vec![UploadedObject {
                bucket: "uploads".into(),
                key: "Invoices/Q1 report.pdf".into(),
                size: 2048,
            }]
        );
        assert_eq!(objects[0].original_name(), "Q1 report.pdf");
    }

    #[test]
    fn upload_size_defaults_to_zero() {
        let raw = r#"{"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"a.png"}}}]}"#;
        let objects = UploadNotification::parse(raw).unwrap().objects().unwrap();
        assert_eq!(objects[0].size, 0);
    }

    #[test]
    fn upload_without_records_is_rejected() {
        let empty = UploadNotification::parse(r#"{"Records":[]}"#).unwrap();
        assert_eq!(empty.objects(), Err(PayloadError::MissingField("Records")));
        assert!(matches!(
            UploadNotification::parse(r#"{"nope":1}"#),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn text_ready_parse_fails_closed() {
        let ok = TextReadyEvent::parse(
            r#"{"DocumentId":"d","TextS3Key":"d.txt","OriginalFileName":"a.pdf"}"#,
        )
        .unwrap();
        assert_eq!(ok.extracted_text_location, "d.txt");

        assert_eq!(
            TextReadyEvent::parse(r#"{"DocumentId":"d","OriginalFileName":"a.pdf"}"#),
            Err(PayloadError::MissingField("TextS3Key"))
        );
        assert_eq!(
            TextReadyEvent::parse(r#"{"DocumentId":"","TextS3Key":"k","OriginalFileName":"a"}"#),
            Err(PayloadError::MissingField("DocumentId"))
        );
        assert!(matches!(
            TextReadyEvent::parse("not json"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn text_ready_message_round_trips() {
        let event = TextReadyEvent {
            document_id: "doc-1".into(),
            extracted_text_location: "doc-1.txt".into(),
            original_name: "Q1 report.pdf".into(),
        };
        let message = PipelineEvent::TextReady(event.clone()).into_message();
        assert_eq!(TextReadyEvent::parse(&message.body).unwrap(), event);
    }

    #[test]
    fn classified_notification_wording() {
        let n = UserNotification::classified("Q1 report.pdf", "doc-1", DocumentType::Invoice);
        assert_eq!(n.subject, "Document Classified: Q1 report.pdf");
        assert!(n.body.contains("Document ID: doc-1"));
        assert!(n.body.contains("Detected Type: INVOICE"));
    }

    #[test]
    fn inserted_document_ignores_modifications_and_requires_fields() {
        let mut image = BTreeMap::new();
        image.insert("DocumentId".to_string(), "doc-1".to_string());
        image.insert("Status".to_string(), "RECEIVED".to_string());
        image.insert("S3Bucket".to_string(), "uploads".to_string());
        image.insert("S3Key".to_string(), "a.pdf".to_string());

        let modify = ChangeEvent {
            event_name: ChangeKind::Modify,
            new_image: image.clone(),
        };
        assert_eq!(InsertedDocument::from_change(&modify), Ok(None));

        let insert = ChangeEvent {
            event_name: ChangeKind::Insert,
            new_image: image.clone(),
        };
        assert_eq!(
            InsertedDocument::from_change(&insert),
            Err(PayloadError::MissingField("OriginalFileName"))
        );

        image.insert("OriginalFileName".to_string(), "a.pdf".to_string());
        let insert = ChangeEvent {
            event_name: ChangeKind::Insert,
            new_image: image,
        };
        let doc = InsertedDocument::from_change(&insert).unwrap().unwrap();
        assert_eq!(doc.document_id, "doc-1");
        assert_eq!(doc.status, DocStatus::Received);
    }
}
