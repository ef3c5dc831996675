//! Pipeline state and batch results.
//!
//! A document's life is a [`DocumentState`]; once it is terminal the pipeline
//! turns it into a [`DocumentReport`]. The ordered reports form the
//! [`BatchReport`], which is all the archive builder needs.

use crate::document::{ExtractionResult, RefinedDocument};
use crate::error::{DocumentError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data-less tag of a [`DocumentState`], used for progress events and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Extracting,
    Refining,
    Relinking,
    Ready,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Extracting => "extracting",
            Stage::Refining => "refining",
            Stage::Relinking => "relinking",
            Stage::Ready => "ready",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milliseconds spent in each service-facing stage.
///
/// Retries and their backoff count toward the stage they belong to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub extraction_ms: u64,
    pub refinement_ms: u64,
    pub relink_ms: u64,
}

impl StageTimings {
    /// Charge `ms` to the stage a document was in while the time passed.
    pub fn record(&mut self, stage: Stage, ms: u64) {
        match stage {
            Stage::Extracting => self.extraction_ms += ms,
            Stage::Refining => self.refinement_ms += ms,
            Stage::Relinking => self.relink_ms += ms,
            Stage::Pending | Stage::Ready | Stage::Failed => {}
        }
    }
}

impl std::ops::AddAssign for StageTimings {
    fn add_assign(&mut self, other: Self) {
        self.extraction_ms += other.extraction_ms;
        self.refinement_ms += other.refinement_ms;
        self.relink_ms += other.relink_ms;
    }
}

impl std::iter::Sum for StageTimings {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, t| {
            acc += t;
            acc
        })
    }
}

/// Where one document is in the pipeline.
///
/// Each non-terminal state carries exactly the data the next stage consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentState {
    /// Not started yet.
    Pending,
    /// Waiting on the extraction service.
    Extracting,
    /// Extraction succeeded; refinement is next.
    Refining(ExtractionResult),
    /// Refinement (or its fallback) produced Markdown; relinking is next.
    Relinking(RefinedDocument),
    /// Terminal: contributes an archive entry.
    Ready(ArchiveEntry),
    /// Terminal: contributes only a report line.
    Failed(DocumentError),
}

impl DocumentState {
    pub fn stage(&self) -> Stage {
        match self {
            DocumentState::Pending => Stage::Pending,
            DocumentState::Extracting => Stage::Extracting,
            DocumentState::Refining(_) => Stage::Refining,
            DocumentState::Relinking(_) => Stage::Relinking,
            DocumentState::Ready(_) => Stage::Ready,
            DocumentState::Failed(_) => Stage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentState::Ready(_) | DocumentState::Failed(_))
    }
}

/// An image file at its final location inside the archive.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveImage {
    /// Full path inside the ZIP, e.g. `Import/report/images/image_001.png`.
    pub path: String,
    pub data: Vec<u8>,
    pub content_type: String,
}

impl fmt::Debug for ArchiveImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveImage")
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One converted document, ready to be written into the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Page title shown on the index page (the upload's file stem).
    pub title: String,
    /// Full path of the Markdown file inside the ZIP, e.g. `Import/report.md`.
    pub path: String,
    /// Final Markdown with image links rewritten to the bundled files.
    pub markdown: String,
    /// Bundled images in extraction order.
    pub images: Vec<ArchiveImage>,
}

/// Terminal result for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    Ready(ArchiveEntry),
    Failed(DocumentError),
}

/// Per-document line of the batch report.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReport {
    /// 0-based position in the input batch.
    pub index: usize,
    pub filename: String,
    pub outcome: DocumentOutcome,
    /// Non-fatal notes, e.g. a refinement fallback.
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub timings: StageTimings,
}

impl DocumentReport {
    pub fn stage(&self) -> Stage {
        match self.outcome {
            DocumentOutcome::Ready(_) => Stage::Ready,
            DocumentOutcome::Failed(_) => Stage::Failed,
        }
    }

    pub fn entry(&self) -> Option<&ArchiveEntry> {
        match &self.outcome {
            DocumentOutcome::Ready(entry) => Some(entry),
            DocumentOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DocumentError> {
        match &self.outcome {
            DocumentOutcome::Ready(_) => None,
            DocumentOutcome::Failed(e) => Some(e),
        }
    }
}

/// Ordered outcomes of one batch run, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
}

impl BatchReport {
    /// Archive entries of successful documents, in input order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.documents.iter().filter_map(DocumentReport::entry)
    }

    /// Failed documents, in input order.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents.iter().filter(|d| d.error().is_some())
    }

    pub fn ready_count(&self) -> usize {
        self.entries().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// A serialisable view without file contents.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            documents: self
                .documents
                .iter()
                .map(|d| DocumentSummary {
                    index: d.index,
                    filename: d.filename.clone(),
                    status: d.stage(),
                    path: d.entry().map(|e| e.path.clone()),
                    images: d.entry().map_or(0, |e| e.images.len()),
                    warnings: d.warnings.clone(),
                    error_kind: d.error().map(DocumentError::kind),
                    error: d.error().map(ToString::to_string),
                    duration_ms: d.duration_ms,
                    timings: d.timings,
                })
                .collect(),
        }
    }
}

/// JSON-friendly form of a [`BatchReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub documents: Vec<DocumentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub index: usize,
    pub filename: String,
    pub status: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub images: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timings: StageTimings,
}

/// The finished ZIP. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Vec<u8>,
    files: Vec<String>,
}

impl Archive {
    pub(crate) fn new(bytes: Vec<u8>, files: Vec<String>) -> Self {
        Self { bytes, files }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Paths written into the ZIP, in write order.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("bytes", &self.bytes.len())
            .field("files", &self.files)
            .finish()
    }
}

/// Aggregate timings and counts for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub ready_documents: usize,
    pub failed_documents: usize,
    /// Ready documents that carry at least one warning.
    pub warned_documents: usize,
    pub total_images: usize,
    pub archive_bytes: usize,
    pub total_duration_ms: u64,
    /// Per-stage time summed over all documents.
    pub stage_timings: StageTimings,
}

/// Everything a batch run produces.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub archive: Archive,
    pub report: BatchReport,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(index: usize, name: &str) -> DocumentReport {
        DocumentReport {
            index,
            filename: format!("{name}.pdf"),
            outcome: DocumentOutcome::Ready(ArchiveEntry {
                title: name.into(),
                path: format!("Import/{name}.md"),
                markdown: format!("# {name}\n"),
                images: vec![],
            }),
            warnings: vec![],
            duration_ms: 5,
            timings: StageTimings {
                extraction_ms: 3,
                refinement_ms: 2,
                relink_ms: 0,
            },
        }
    }

    fn failed(index: usize, name: &str) -> DocumentReport {
        DocumentReport {
            index,
            filename: name.into(),
            outcome: DocumentOutcome::Failed(DocumentError::Extraction {
                filename: name.into(),
                retries: 0,
                detail: "HTTP 500".into(),
            }),
            warnings: vec![],
            duration_ms: 1,
            timings: StageTimings::default(),
        }
    }

    #[test]
    fn state_stage_and_terminality() {
        assert_eq!(DocumentState::Pending.stage(), Stage::Pending);
        assert!(!DocumentState::Extracting.is_terminal());
        let failed = DocumentState::Failed(DocumentError::Cancelled {
            filename: "a.pdf".into(),
        });
        assert!(failed.is_terminal());
        assert_eq!(failed.stage(), Stage::Failed);
    }

    #[test]
    fn report_keeps_input_order() {
        let report = BatchReport {
            documents: vec![ready(0, "a"), failed(1, "b.xlsx"), ready(2, "c")],
        };
        let paths: Vec<_> = report.entries().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Import/a.md", "Import/c.md"]);
        assert_eq!(report.ready_count(), 2);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn summary_serialises_without_content() {
        let report = BatchReport {
            documents: vec![ready(0, "a"), failed(1, "b.xlsx")],
        };
        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["documents"][0]["status"], "ready");
        assert_eq!(json["documents"][0]["path"], "Import/a.md");
        assert_eq!(json["documents"][1]["status"], "failed");
        assert_eq!(json["documents"][1]["error_kind"], "Extraction");
        assert!(json["documents"][0].get("markdown").is_none());
        assert_eq!(json["documents"][0]["timings"]["extraction_ms"], 3);
    }

    #[test]
    fn timings_charge_the_active_stage() {
        let mut t = StageTimings::default();
        t.record(Stage::Extracting, 40);
        t.record(Stage::Refining, 25);
        t.record(Stage::Refining, 5);
        t.record(Stage::Pending, 99);
        assert_eq!(
            t,
            StageTimings {
                extraction_ms: 40,
                refinement_ms: 30,
                relink_ms: 0,
            }
        );

        let total: StageTimings = [t, t].into_iter().sum();
        assert_eq!(total.refinement_ms, 60);
    }
}
