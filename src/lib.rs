//! # docmost-convert
//!
//! Batch-convert PDF, DOCX and XLSX files into a single ZIP that Docmost can
//! import as a page tree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads (PDF / DOCX / XLSX)
//!  │
//!  ├─ 1. Extract  Docling turns each file into Markdown + embedded images
//!  ├─ 2. Refine   an Ollama model tidies headings, code blocks and tables
//!  ├─ 3. Relink   image links are pointed at the files bundled in the ZIP
//!  └─ 4. Archive  Import.md index page + one page per document
//! ```
//!
//! Documents are processed sequentially. A document that fails anywhere is
//! reported and skipped; the rest of the batch still lands in the archive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmost_convert::{convert_files_to_zip, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Service URLs from DOCLING_SERVER_URL / OLLAMA_SERVER_URL / OLLAMA_MODEL
//!     let config = ConverterConfig::from_env()?;
//!     let output = convert_files_to_zip(&["report.pdf", "sheet.xlsx"], "Import.zip", &config).await?;
//!     for failure in output.report.failures() {
//!         eprintln!("skipped: {}", failure.filename);
//!     }
//!     eprintln!("{} of {} documents ready", output.stats.ready_documents, output.stats.total_documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmost-convert` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! docmost-convert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder, RefinementFallback, SkippedDocuments};
pub use convert::{
    check_services, convert_batch, convert_batch_sync, convert_files, convert_files_to_zip,
    write_archive, Converter, DocumentJob, ServiceHealth,
};
pub use document::{DocumentFormat, ExtractedImage, ExtractionResult, RefinedDocument, UploadedDocument};
pub use error::{
    ArchiveBuildError, ConvertError, DocumentError, ErrorKind, ExtractionError, RefinementError,
    RelinkError, Retryable,
};
pub use output::{
    Archive, ArchiveEntry, ArchiveImage, BatchOutput, BatchReport, BatchStats, DocumentOutcome,
    DocumentReport, DocumentState, ReportSummary, Stage, StageTimings,
};
pub use pipeline::extract::{DoclingClient, Extractor};
pub use pipeline::refine::{OllamaClient, Refiner};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, DocumentStream};
pub use tokio_util::sync::CancellationToken;
