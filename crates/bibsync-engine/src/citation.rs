//! Citation manager access: attachments and their annotations per citekey.

use async_trait::async_trait;
use bibsync_core::{CitationServiceConfig, Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument};

/// One annotation on an attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireAnnotation")]
pub struct AnnotationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

/// Annotation as the service sends it. Either name of the id and type
/// fields may appear, or both; `id` and `type` win.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireAnnotation {
    id: Option<String>,
    key: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    annotation_type: Option<String>,
    annotation_text: Option<String>,
    comment: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    page_label: Option<String>,
    color: Option<String>,
    date_modified: Option<String>,
    image_path: Option<String>,
}

impl From<WireAnnotation> for AnnotationRecord {
    fn from(wire: WireAnnotation) -> Self {
        Self {
            id: wire.id.or(wire.key).unwrap_or_default(),
            kind: wire.kind.or(wire.annotation_type).unwrap_or_default(),
            annotation_text: wire.annotation_text,
            comment: wire.comment,
            page_label: wire.page_label,
            color: wire.color,
            date_modified: wire.date_modified,
            image_path: wire.image_path,
        }
    }
}

/// One attachment of a citation item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentRecord {
    pub path: Option<String>,
    pub open: Option<String>,
    pub annotations: Vec<AnnotationRecord>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Source of attachment and annotation data.
#[async_trait]
pub trait CitationService: Send + Sync {
    /// `Ok(None)` when the service knows nothing about `citekey`.
    async fn attachments(&self, citekey: &str) -> Result<Option<Vec<AttachmentRecord>>>;
}

/// JSON-RPC client for a locally running citation manager.
#[derive(Debug, Clone)]
pub struct RpcCitationService {
    client: reqwest::Client,
    url: String,
}

impl RpcCitationService {
    pub fn new(config: &CitationServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Rpc(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl CitationService for RpcCitationService {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn attachments(&self, citekey: &str) -> Result<Option<Vec<AttachmentRecord>>> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": "item.attachments",
            "params": [citekey],
            "id": 1,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Rpc(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Rpc(format!(
                "Citation service returned {}",
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Rpc(format!("Invalid response: {}", e)))?;

        parse_rpc_result(citekey, body)
    }
}

fn parse_rpc_result(citekey: &str, body: RpcResponse) -> Result<Option<Vec<AttachmentRecord>>> {
    if let Some(err) = body.error {
        // Unknown citekeys come back as RPC errors, not as empty results.
        debug!("No attachments for {}: {} ({})", citekey, err.message, err.code);
        return Ok(None);
    }

    match body.result {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Rpc(format!("Unexpected attachment data for {}: {}", citekey, e))),
    }
}

/// Mock citation service for testing
#[derive(Debug, Default)]
pub struct MockCitationService {
    responses: Mutex<HashMap<String, Vec<AttachmentRecord>>>,
    failures: HashMap<String, String>,
}

impl MockCitationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annotations(self, citekey: &str, annotations: Vec<AnnotationRecord>) -> Self {
        self.set_annotations(citekey, annotations);
        self
    }

    pub fn with_failure(mut self, citekey: &str, message: &str) -> Self {
        self.failures
            .insert(citekey.to_string(), message.to_string());
        self
    }

    /// Replace the annotations served for `citekey`.
    pub fn set_annotations(&self, citekey: &str, annotations: Vec<AnnotationRecord>) {
        let attachment = AttachmentRecord {
            path: Some(format!("{}.pdf", citekey)),
            open: None,
            annotations,
        };
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(citekey.to_string(), vec![attachment]);
        }
    }
}

#[async_trait]
impl CitationService for MockCitationService {
    async fn attachments(&self, citekey: &str) -> Result<Option<Vec<AttachmentRecord>>> {
        if let Some(message) = self.failures.get(citekey) {
            return Err(Error::Rpc(message.clone()));
        }
        Ok(self
            .responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(citekey).cloned()))
    }
}

/// Stable fingerprint of every annotation across `attachments`.
///
/// Insensitive to the order the service lists attachments or annotations in.
pub fn annotation_fingerprint(attachments: &[AttachmentRecord]) -> String {
    let mut annotations: Vec<&AnnotationRecord> = attachments
        .iter()
        .flat_map(|a| a.annotations.iter())
        .collect();
    annotations.sort();

    let mut hasher = Sha256::new();
    for annotation in annotations {
        // Serializing a plain struct of strings cannot fail.
        let encoded = serde_json::to_vec(annotation).unwrap_or_default();
        hasher.update(&encoded);
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, text: &str) -> AnnotationRecord {
        AnnotationRecord {
            id: id.to_string(),
            kind: "highlight".to_string(),
            annotation_text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_annotation_accepts_alternate_field_names() {
        let record: AnnotationRecord = serde_json::from_value(json!({
            "key": "ABCD1234",
            "annotationType": "note",
            "comment": "see also",
            "pageLabel": 12,
            "dateModified": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(record.id, "ABCD1234");
        assert_eq!(record.kind, "note");
        assert_eq!(record.page_label.as_deref(), Some("12"));
        assert_eq!(record.comment.as_deref(), Some("see also"));
    }

    #[test]
    fn test_annotation_with_both_field_names() {
        let record: AnnotationRecord = serde_json::from_value(json!({
            "id": "ID1",
            "key": "KEY1",
            "type": "highlight",
            "annotationType": "note",
            "annotationText": "quoted"
        }))
        .unwrap();

        assert_eq!(record.id, "ID1");
        assert_eq!(record.kind, "highlight");
        assert_eq!(record.annotation_text.as_deref(), Some("quoted"));

        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [{"path": "/a.pdf", "annotations": [{"id": "x", "key": "y"}]}]
        }))
        .unwrap();
        let attachments = parse_rpc_result("k", body).unwrap().unwrap();
        assert_eq!(attachments[0].annotations[0].id, "x");
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let one = vec![AttachmentRecord {
            annotations: vec![note("1", "a"), note("2", "b")],
            ..Default::default()
        }];
        let two = vec![AttachmentRecord {
            annotations: vec![note("2", "b"), note("1", "a")],
            ..Default::default()
        }];
        assert_eq!(annotation_fingerprint(&one), annotation_fingerprint(&two));
    }

    #[test]
    fn test_fingerprint_changes_with_text() {
        let before = vec![AttachmentRecord {
            annotations: vec![note("1", "a")],
            ..Default::default()
        }];
        let after = vec![AttachmentRecord {
            annotations: vec![note("1", "a, edited")],
            ..Default::default()
        }];
        assert_ne!(annotation_fingerprint(&before), annotation_fingerprint(&after));
        assert_eq!(annotation_fingerprint(&before).len(), 64);
    }

    #[test]
    fn test_rpc_error_is_missing_data() {
        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32603, "message": "unknown citekey"}
        }))
        .unwrap();
        assert_eq!(parse_rpc_result("k", body).unwrap(), None);
    }

    #[test]
    fn test_rpc_result_parses_attachments() {
        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": [{
                "path": "/papers/k.pdf",
                "open": "zotero://open-pdf/library/items/X",
                "annotations": [{"id": "A1", "type": "highlight", "annotationText": "quoted"}]
            }]
        }))
        .unwrap();

        let attachments = parse_rpc_result("k", body).unwrap().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].annotations[0].annotation_text.as_deref(), Some("quoted"));
    }

    #[test]
    fn test_null_result_is_missing_data() {
        let body: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert_eq!(parse_rpc_result("k", body).unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_service() {
        let service = MockCitationService::new()
            .with_annotations("a", vec![note("1", "x")])
            .with_failure("b", "offline");

        assert_eq!(service.attachments("a").await.unwrap().unwrap().len(), 1);
        assert!(service.attachments("b").await.is_err());
        assert!(service.attachments("c").await.unwrap().is_none());
    }
}
