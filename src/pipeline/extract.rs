//! Extraction stage: upload a document to Docling and get Markdown back.
//!
//! The stage is a trait so the batch pipeline can run against any backend;
//! [`DoclingClient`] talks to a `docling-serve` instance over HTTP.
//!
//! ## Request
//!
//! `POST {docling_url}/v1/convert/file` as `multipart/form-data` with the file
//! in the `files` field and `image_export_mode=embedded`, which makes Docling
//! inline every figure as a base64 data URI. [`crate::pipeline::decode`] turns
//! those into separate image files.
//!
//! The client never retries on its own. Failures come back as
//! [`ExtractionError`] and the pipeline decides whether another attempt is
//! worth it.

use crate::config::ConverterConfig;
use crate::document::{ExtractionResult, UploadedDocument};
use crate::error::{ConvertError, ExtractionError};
use crate::pipeline::decode;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Turns an uploaded document into raw Markdown plus images.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &UploadedDocument) -> Result<ExtractionResult, ExtractionError>;
}

/// HTTP client for `docling-serve`.
pub struct DoclingClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
    do_ocr: bool,
    do_table_structure: bool,
    ocr_engine: String,
}

impl DoclingClient {
    pub fn new(config: &ConverterConfig) -> Result<Self, ConvertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.extraction_timeout_secs))
            .build()
            .map_err(|e| ConvertError::ClientInit {
                service: "Docling",
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.docling_url.clone(),
            timeout_secs: config.extraction_timeout_secs,
            do_ocr: config.do_ocr,
            do_table_structure: config.do_table_structure,
            ocr_engine: config.ocr_engine.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn form(&self, document: &UploadedDocument) -> Result<Form, ExtractionError> {
        let part = Part::bytes(document.content().to_vec())
            .file_name(document.filename().to_string())
            .mime_str(document.format().mime_type())
            .map_err(|e| ExtractionError::InvalidRequest {
                detail: e.to_string(),
            })?;

        Ok(Form::new()
            .part("files", part)
            .text("to_formats", "md")
            .text("image_export_mode", "embedded")
            .text("do_ocr", self.do_ocr.to_string())
            .text("do_table_structure", self.do_table_structure.to_string())
            .text("ocr_engine", self.ocr_engine.clone()))
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ExtractionError::Unreachable {
                url: url.to_string(),
                source: e,
            }
        }
    }

    /// Whether a Docling server answers at the configured URL.
    ///
    /// Probes the bundled UI page first and falls back to the root page,
    /// which shows the API docs on builds without the UI.
    pub async fn health_check(&self) -> bool {
        for (path, markers) in [
            ("/ui", &["Docling Serve"][..]),
            ("", &["Docling Serve", "Swagger"][..]),
        ] {
            let url = format!("{}{}", self.base_url, path);
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await.unwrap_or_default();
                    if markers.iter().any(|m| body.contains(m)) {
                        return true;
                    }
                }
                Ok(resp) => debug!("Docling probe {} returned HTTP {}", url, resp.status()),
                Err(e) => {
                    warn!(error = %e, "Docling health check failed for {}", url);
                }
            }
        }
        false
    }
}

#[async_trait]
impl Extractor for DoclingClient {
    async fn extract(&self, document: &UploadedDocument) -> Result<ExtractionResult, ExtractionError> {
        let url = format!("{}/v1/convert/file", self.base_url);
        info!(
            "Extracting '{}' ({}, {} bytes) via {}",
            document.filename(),
            document.format(),
            document.content().len(),
            url
        );

        let response = self
            .client
            .post(&url)
            .multipart(self.form(document)?)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        if !status.is_success() {
            return Err(ExtractionError::ServiceStatus {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let result = parse_response(&body)?;
        debug!(
            "Extracted '{}': {} chars, {} image(s)",
            document.filename(),
            result.markdown.len(),
            result.images.len()
        );
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(default)]
    document: Option<ConvertedDocument>,
    /// Legacy shape: Markdown at the top level.
    #[serde(default)]
    markdown: Option<String>,
    /// Legacy shape: images as `{name: base64}`.
    #[serde(default)]
    images: Option<BTreeMap<String, String>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConvertedDocument {
    #[serde(default)]
    md_content: Option<String>,
}

/// Decode a `docling-serve` response body into Markdown and images.
pub fn parse_response(body: &str) -> Result<ExtractionResult, ExtractionError> {
    let response: ConvertResponse =
        serde_json::from_str(body).map_err(|e| ExtractionError::MalformedResponse {
            detail: format!("response is not valid JSON: {e}"),
        })?;

    if let Some(status) = response.status.as_deref() {
        if matches!(status, "failure" | "skipped") {
            let detail = if response.errors.is_empty() {
                "no details given".to_string()
            } else {
                response
                    .errors
                    .iter()
                    .map(|e| match e.get("error_message").and_then(|m| m.as_str()) {
                        Some(msg) => msg.to_string(),
                        None => e.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ExtractionError::Rejected {
                status: status.to_string(),
                detail,
            });
        }
    }

    let markdown = response
        .document
        .and_then(|d| d.md_content)
        .or(response.markdown)
        .filter(|md| !md.trim().is_empty())
        .ok_or_else(|| ExtractionError::MalformedResponse {
            detail: "response has no Markdown body".to_string(),
        })?;

    let mut images = Vec::new();
    for (name, payload) in response.images.unwrap_or_default() {
        images.push(decode::decode_named(&name, &payload)?);
    }

    let taken: HashSet<String> = images.iter().map(|i| i.filename.clone()).collect();
    let (markdown, embedded) = decode::extract_data_uri_images(&markdown, &taken)?;
    images.extend(embedded);

    Ok(ExtractionResult { markdown, images })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n0000";

    #[test]
    fn test_parse_current_response() {
        let md = format!(
            "# Report\n\n![Figure 1](data:image/png;base64,{})\n",
            STANDARD.encode(PNG_BYTES)
        );
        let body = serde_json::json!({
            "document": { "filename": "report.pdf", "md_content": md },
            "status": "success",
            "errors": [],
            "processing_time": 1.5
        })
        .to_string();

        let result = parse_response(&body).unwrap();
        assert_eq!(result.markdown, "# Report\n\n![Figure 1](image_001.png)\n");
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].filename, "image_001.png");
    }

    #[test]
    fn test_parse_legacy_response() {
        let body = serde_json::json!({
            "markdown": "# Sheet\n\n![](chart.png)\n",
            "images": { "chart.png": STANDARD.encode(PNG_BYTES) }
        })
        .to_string();

        let result = parse_response(&body).unwrap();
        assert_eq!(result.markdown, "# Sheet\n\n![](chart.png)\n");
        assert_eq!(result.images[0].filename, "chart.png");
        assert_eq!(result.images[0].data, PNG_BYTES);
    }

    #[test]
    fn test_missing_markdown_is_malformed() {
        let err = parse_response(r#"{"document": {}, "status": "success"}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { .. }));

        let err = parse_response(r#"{"document": {"md_content": "  \n"}}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { .. }));

        let err = parse_response("<html>oops</html>").unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { .. }));
    }

    #[test]
    fn test_failure_status_is_rejected() {
        let body = r#"{"document": {"md_content": ""}, "status": "failure",
                       "errors": [{"error_message": "password protected"}]}"#;
        match parse_response(body).unwrap_err() {
            ExtractionError::Rejected { status, detail } => {
                assert_eq!(status, "failure");
                assert_eq!(detail, "password protected");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("äääää", 3), "ä…");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        use crate::document::DocumentFormat;
        use crate::error::Retryable;

        let config = ConverterConfig::builder()
            .docling_url("http://127.0.0.1:9")
            .extraction_timeout_secs(2)
            .build()
            .unwrap();
        let client = DoclingClient::new(&config).unwrap();
        let doc = UploadedDocument::new("a.pdf", b"%PDF-1.4".to_vec(), DocumentFormat::Pdf);

        let err = client.extract(&doc).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
        assert!(!client.health_check().await);
    }
}
