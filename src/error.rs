//! Error types for the docmost-convert library.
//!
//! Errors are split by blast radius:
//!
//! * [`ConvertError`] — **Fatal**: the batch cannot produce an archive at all
//!   (bad configuration, unreadable input, ZIP assembly failure). Returned as
//!   `Err(ConvertError)` from the top-level `convert*` functions.
//!
//! * [`DocumentError`] — **Non-fatal**: one document failed somewhere between
//!   extraction and relinking. Stored in [`crate::output::DocumentReport`];
//!   every other document in the batch still reaches the archive.
//!
//! * [`ExtractionError`], [`RefinementError`], [`RelinkError`] — what the
//!   individual stages return. They keep the underlying cause (HTTP error,
//!   status code, offending reference) and are flattened into a
//!   [`DocumentError`] once the pipeline gives up on a document.
//!
//! * [`ArchiveBuildError`] — I/O failure while writing the ZIP. Always fatal;
//!   a half-written archive is never handed back.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Whether an error is worth another attempt after a backoff.
///
/// The stage clients never retry on their own; the batch pipeline consults
/// this before spending one of its bounded retries.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// All fatal errors returned by the docmost-convert library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file extension is not one of the supported formats.
    #[error("Unsupported document '{filename}': expected a .pdf, .docx or .xlsx file")]
    UnsupportedFormat { filename: String },

    /// The declared format does not match the file's leading bytes.
    #[error("'{filename}' is not a valid {expected} file\nFirst bytes: {magic:?}")]
    FormatMismatch {
        filename: String,
        expected: &'static str,
        magic: Vec<u8>,
    },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Service client errors ─────────────────────────────────────────────
    /// The HTTP client for a backend service could not be constructed.
    #[error("Failed to initialise the {service} client: {detail}")]
    ClientInit { service: &'static str, detail: String },

    // ── Archive errors ────────────────────────────────────────────────────
    /// Assembling the ZIP failed. Nothing is returned to the caller.
    #[error(transparent)]
    ArchiveBuild(#[from] ArchiveBuildError),

    /// Could not create or write the output archive file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure while serialising the archive.
#[derive(Debug, Error)]
pub enum ArchiveBuildError {
    #[error("Failed to assemble archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to assemble archive: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the extraction service call for one document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The service could not be reached (DNS, refused connection, TLS…).
    #[error("extraction service unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with a non-success HTTP status.
    #[error("extraction service returned HTTP {status}: {body}")]
    ServiceStatus { status: u16, body: String },

    /// The service processed the upload but reported a failed conversion.
    #[error("extraction service rejected the document (status '{status}'): {detail}")]
    Rejected { status: String, detail: String },

    /// The service reported success but the payload is unusable.
    #[error("malformed extraction output: {detail}")]
    MalformedResponse { detail: String },

    /// The outgoing request could not be assembled.
    #[error("could not build extraction request: {detail}")]
    InvalidRequest { detail: String },
}

impl Retryable for ExtractionError {
    fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::Unreachable { .. } | ExtractionError::Timeout { .. } => true,
            ExtractionError::ServiceStatus { status, .. } => *status >= 500 || *status == 429,
            ExtractionError::Rejected { .. }
            | ExtractionError::MalformedResponse { .. }
            | ExtractionError::InvalidRequest { .. } => false,
        }
    }
}

/// Failure of the refinement step for one document.
#[derive(Debug, Error)]
pub enum RefinementError {
    /// The model service could not be reached.
    #[error("refinement service unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The generation did not complete within the configured timeout.
    #[error("refinement timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with a non-success HTTP status.
    #[error("refinement service returned HTTP {status}: {body}")]
    ServiceStatus { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("malformed refinement output: {detail}")]
    MalformedResponse { detail: String },

    /// The model answered, but with nothing.
    #[error("model '{model}' returned an empty response")]
    EmptyResponse { model: String },
}

impl Retryable for RefinementError {
    fn is_retryable(&self) -> bool {
        match self {
            RefinementError::Unreachable { .. } | RefinementError::Timeout { .. } => true,
            RefinementError::ServiceStatus { status, .. } => *status >= 500 || *status == 429,
            RefinementError::MalformedResponse { .. }
            | RefinementError::EmptyResponse { .. } => false,
        }
    }
}

/// Markdown and extracted images cannot be matched one-to-one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelinkError {
    /// The Markdown references an image that extraction never produced.
    #[error("image reference '{reference}' does not match any extracted image")]
    UnresolvedReference { reference: String },

    /// Two extracted images would land on the same archive path.
    #[error("extracted images share the file name '{name}'")]
    DuplicateImageName { name: String },
}

/// Broad category of a per-document failure, as shown in the batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Extraction,
    Refinement,
    Relink,
    Cancelled,
}

/// A non-fatal error for a single document.
///
/// The batch continues with the next document; the failed one contributes
/// no Markdown to the archive.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum DocumentError {
    /// Extraction failed after all retries.
    #[error("{filename}: extraction failed after {retries} retries: {detail}")]
    Extraction {
        filename: String,
        retries: u32,
        detail: String,
    },

    /// Refinement failed and the fallback policy does not allow raw output.
    #[error("{filename}: refinement failed after {retries} retries: {detail}")]
    Refinement {
        filename: String,
        retries: u32,
        detail: String,
    },

    /// Refinement dropped or renamed image links.
    #[error("{filename}: refinement lost image references: {}", .missing.join(", "))]
    LostImageReferences {
        filename: String,
        missing: Vec<String>,
    },

    /// Markdown and extracted images disagree.
    #[error("{filename}: {detail}")]
    Relink { filename: String, detail: String },

    /// The batch was cancelled before this document started.
    #[error("{filename}: batch cancelled before processing")]
    Cancelled { filename: String },
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::Extraction { .. } => ErrorKind::Extraction,
            DocumentError::Refinement { .. } | DocumentError::LostImageReferences { .. } => {
                ErrorKind::Refinement
            }
            DocumentError::Relink { .. } => ErrorKind::Relink,
            DocumentError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            DocumentError::Extraction { filename, .. }
            | DocumentError::Refinement { filename, .. }
            | DocumentError::LostImageReferences { filename, .. }
            | DocumentError::Relink { filename, .. }
            | DocumentError::Cancelled { filename } => filename,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let e = ExtractionError::ServiceStatus {
            status: 503,
            body: "busy".into(),
        };
        assert!(e.is_retryable());

        let e = ExtractionError::ServiceStatus {
            status: 415,
            body: "unsupported".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        assert!(ExtractionError::Timeout { secs: 300 }.is_retryable());
        assert!(RefinementError::Timeout { secs: 120 }.is_retryable());
    }

    #[test]
    fn empty_model_output_is_not_retryable() {
        let e = RefinementError::EmptyResponse {
            model: "llama3".into(),
        };
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("llama3"));
    }

    #[test]
    fn document_error_kinds() {
        let e = DocumentError::LostImageReferences {
            filename: "report.pdf".into(),
            missing: vec!["image_002.png".into()],
        };
        assert_eq!(e.kind(), ErrorKind::Refinement);
        assert_eq!(e.filename(), "report.pdf");

        let e = DocumentError::Relink {
            filename: "sheet.xlsx".into(),
            detail: RelinkError::DuplicateImageName {
                name: "chart.png".into(),
            }
            .to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::Relink);
        assert!(e.to_string().contains("chart.png"));
    }

    #[test]
    fn extraction_error_display() {
        let e = DocumentError::Extraction {
            filename: "sheet.xlsx".into(),
            retries: 2,
            detail: "extraction service returned HTTP 500: boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("sheet.xlsx"), "got: {msg}");
        assert!(msg.contains("HTTP 500"), "got: {msg}");
    }

    #[test]
    fn archive_error_converts_to_fatal() {
        let io = std::io::Error::other("disk full");
        let e: ConvertError = ArchiveBuildError::from(io).into();
        assert!(matches!(e, ConvertError::ArchiveBuild(_)));
        assert!(e.to_string().contains("disk full"));
    }
}
