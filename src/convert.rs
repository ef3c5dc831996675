//! Batch conversion entry points and the per-document state machine.
//!
//! A batch is processed strictly one document at a time, in input order:
//!
//! ```text
//! Pending ──▶ Extracting ──▶ Refining ──▶ Relinking ──▶ Ready
//!                 │              │             │
//!                 └──────────────┴─────────────┴──────▶ Failed
//! ```
//!
//! A document that fails never stops the batch; it shows up in the
//! [`BatchReport`] and is left out of the archive. Only problems that leave
//! no archive to return (unreadable input, ZIP assembly) are fatal.
//!
//! Use [`Converter`] directly to inject custom [`Extractor`] / [`Refiner`]
//! backends or a [`CancellationToken`]; the free functions cover the common
//! cases with the HTTP clients.

use crate::config::{ConverterConfig, RefinementFallback};
use crate::document::{ExtractionResult, RefinedDocument, UploadedDocument};
use crate::error::{ConvertError, DocumentError, Retryable};
use crate::output::{
    Archive, ArchiveEntry, ArchiveImage, BatchOutput, BatchReport, BatchStats, DocumentOutcome,
    DocumentReport, DocumentState, StageTimings,
};
use crate::pipeline::archive::ArchiveBuilder;
use crate::pipeline::extract::{DoclingClient, Extractor};
use crate::pipeline::refine::{OllamaClient, Refiner};
use crate::pipeline::{input, postprocess, relink};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs batches against one pair of extraction/refinement backends.
///
/// Cheap to clone; clones share the backends and configuration.
#[derive(Clone)]
pub struct Converter {
    config: Arc<ConverterConfig>,
    extractor: Arc<dyn Extractor>,
    refiner: Arc<dyn Refiner>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One document moving through the pipeline.
#[derive(Debug)]
pub struct DocumentJob {
    index: usize,
    total: usize,
    document: UploadedDocument,
    target: String,
    state: DocumentState,
    warnings: Vec<String>,
    timings: StageTimings,
}

impl DocumentJob {
    /// A `Pending` job for the document at `index` of a `total`-document
    /// batch, archived under the stem `target`.
    pub fn new(index: usize, total: usize, document: UploadedDocument, target: impl Into<String>) -> Self {
        Self {
            index,
            total,
            document,
            target: target.into(),
            state: DocumentState::Pending,
            warnings: Vec::new(),
            timings: StageTimings::default(),
        }
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn document(&self) -> &UploadedDocument {
        &self.document
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Time spent so far in each stage.
    pub fn timings(&self) -> StageTimings {
        self.timings
    }
}

impl Converter {
    /// Converter backed by Docling and Ollama at the configured URLs.
    pub fn new(config: ConverterConfig) -> Result<Self, ConvertError> {
        let extractor = Arc::new(DoclingClient::new(&config)?);
        let refiner = Arc::new(OllamaClient::new(&config)?);
        Ok(Self::with_backends(config, extractor, refiner))
    }

    pub fn with_backends(
        config: ConverterConfig,
        extractor: Arc<dyn Extractor>,
        refiner: Arc<dyn Refiner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            extractor,
            refiner,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert a batch and build its archive.
    pub async fn run(&self, documents: Vec<UploadedDocument>) -> Result<BatchOutput, ConvertError> {
        self.run_with_cancel(documents, &CancellationToken::new()).await
    }

    /// Like [`Converter::run`], but stops starting new documents once `cancel`
    /// fires.
    ///
    /// The document in flight finishes; every later one is reported as
    /// cancelled. The archive still contains whatever reached `Ready`.
    pub async fn run_with_cancel(
        &self,
        documents: Vec<UploadedDocument>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutput, ConvertError> {
        let start = Instant::now();
        let total = documents.len();
        info!("Starting batch: {} document(s)", total);

        let reports: Vec<DocumentReport> = self.stream(documents, cancel.clone()).collect().await;
        let report = BatchReport { documents: reports };

        let archive = self.build_archive(&report).inspect_err(|e| {
            error!("Archive assembly failed: {}", e);
        })?;

        let stats = BatchStats {
            total_documents: total,
            ready_documents: report.ready_count(),
            failed_documents: report.failed_count(),
            warned_documents: report
                .documents
                .iter()
                .filter(|d| d.entry().is_some() && !d.warnings.is_empty())
                .count(),
            total_images: report.entries().map(|e| e.images.len()).sum(),
            archive_bytes: archive.len(),
            total_duration_ms: start.elapsed().as_millis() as u64,
            stage_timings: report.documents.iter().map(|d| d.timings).sum(),
        };

        info!(
            "Batch complete: {}/{} ready, {} failed, {} bytes, {}ms",
            stats.ready_documents,
            total,
            stats.failed_documents,
            stats.archive_bytes,
            stats.total_duration_ms
        );
        debug!(
            "Stage time: extraction {}ms, refinement {}ms, relink {}ms",
            stats.stage_timings.extraction_ms,
            stats.stage_timings.refinement_ms,
            stats.stage_timings.relink_ms
        );

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, stats.ready_documents);
        }

        Ok(BatchOutput {
            archive,
            report,
            stats,
        })
    }

    /// Serialise a finished report into the ZIP.
    pub fn build_archive(&self, report: &BatchReport) -> Result<Archive, ConvertError> {
        Ok(ArchiveBuilder::from_config(&self.config).build(report)?)
    }

    /// Drive one document from `Pending` to a terminal state.
    pub async fn process_document(
        &self,
        index: usize,
        total: usize,
        document: UploadedDocument,
        target: impl Into<String>,
    ) -> DocumentReport {
        let start = Instant::now();
        let filename = document.filename().to_string();
        info!("[{}/{}] Converting '{}'", index + 1, total, filename);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(index, total, &filename);
        }

        let mut job = DocumentJob::new(index, total, document, target);
        let outcome = loop {
            match std::mem::replace(&mut job.state, DocumentState::Pending) {
                DocumentState::Ready(entry) => break DocumentOutcome::Ready(entry),
                DocumentState::Failed(e) => break DocumentOutcome::Failed(e),
                state => {
                    job.state = state;
                    self.advance(&mut job).await;
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match (&outcome, &self.config.progress_callback) {
            (DocumentOutcome::Ready(_), Some(cb)) => {
                cb.on_document_ready(index, total, &filename, job.warnings.len())
            }
            (DocumentOutcome::Failed(e), Some(cb)) => {
                cb.on_document_failed(index, total, &filename, &e.to_string())
            }
            (_, None) => {}
        }
        match &outcome {
            DocumentOutcome::Ready(entry) => info!(
                "[{}/{}] '{}' ready as {} ({} image(s), {}ms)",
                index + 1,
                total,
                filename,
                entry.path,
                entry.images.len(),
                duration_ms
            ),
            DocumentOutcome::Failed(e) => warn!("[{}/{}] {}", index + 1, total, e),
        }

        DocumentReport {
            index,
            filename,
            outcome,
            warnings: job.warnings,
            duration_ms,
            timings: job.timings,
        }
    }

    /// Report for a document the batch never started.
    pub(crate) fn cancelled_report(&self, index: usize, total: usize, document: &UploadedDocument) -> DocumentReport {
        let error = DocumentError::Cancelled {
            filename: document.filename().to_string(),
        };
        debug!("[{}/{}] skipped: {}", index + 1, total, error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_failed(index, total, document.filename(), &error.to_string());
        }
        DocumentReport {
            index,
            filename: document.filename().to_string(),
            outcome: DocumentOutcome::Failed(error),
            warnings: Vec::new(),
            duration_ms: 0,
            timings: StageTimings::default(),
        }
    }

    /// Perform exactly one state transition. Terminal states are left as-is.
    pub async fn advance(&self, job: &mut DocumentJob) {
        let stage = job.state.stage();
        let started = Instant::now();
        let next = match std::mem::replace(&mut job.state, DocumentState::Pending) {
            DocumentState::Pending => DocumentState::Extracting,
            DocumentState::Extracting => self.run_extraction(job).await,
            DocumentState::Refining(extraction) => self.run_refinement(job, extraction).await,
            DocumentState::Relinking(mut refined) => {
                if let Some(warning) = refined.warning.take() {
                    job.warnings.push(warning);
                }
                self.run_relink(job, refined)
            }
            terminal => terminal,
        };
        job.state = next;
        job.timings.record(stage, started.elapsed().as_millis() as u64);

        debug!(
            "[{}/{}] {} -> {}",
            job.index + 1,
            job.total,
            job.document.filename(),
            job.state.stage()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(job.index, job.document.filename(), job.state.stage());
        }
    }

    async fn run_extraction(&self, job: &DocumentJob) -> DocumentState {
        let filename = job.document.filename();
        let result = with_retries(&self.config, "extraction", filename, || {
            self.extractor.extract(&job.document)
        })
        .await;

        match result {
            Ok(mut extraction) => {
                if self.config.clean_markdown {
                    extraction.markdown =
                        postprocess::clean_extracted(&extraction.markdown, job.document.stem());
                }
                DocumentState::Refining(extraction)
            }
            Err((e, retries)) => DocumentState::Failed(DocumentError::Extraction {
                filename: filename.to_string(),
                retries,
                detail: e.to_string(),
            }),
        }
    }

    async fn run_refinement(&self, job: &DocumentJob, extraction: ExtractionResult) -> DocumentState {
        let ExtractionResult { markdown, images } = extraction;
        if !self.config.refine {
            return DocumentState::Relinking(RefinedDocument {
                markdown,
                images,
                warning: None,
            });
        }

        let filename = job.document.filename();
        let model = self.config.model.as_str();
        let result = with_retries(&self.config, "refinement", filename, || {
            self.refiner.refine(&markdown, model)
        })
        .await;

        match result {
            Ok(refined) => {
                let refined = if self.config.clean_markdown {
                    postprocess::clean_refined(&refined, job.document.stem())
                } else {
                    refined
                };
                let missing = relink::missing_references(&markdown, &refined);
                if !missing.is_empty() {
                    return DocumentState::Failed(DocumentError::LostImageReferences {
                        filename: filename.to_string(),
                        missing,
                    });
                }
                DocumentState::Relinking(RefinedDocument {
                    markdown: refined,
                    images,
                    warning: None,
                })
            }
            Err((e, retries)) => match self.config.refinement_fallback {
                RefinementFallback::UseRaw => {
                    warn!("{}: keeping unrefined Markdown: {}", filename, e);
                    DocumentState::Relinking(RefinedDocument {
                        markdown,
                        images,
                        warning: Some(format!("refinement failed, kept unrefined Markdown: {e}")),
                    })
                }
                RefinementFallback::FailDocument => DocumentState::Failed(DocumentError::Refinement {
                    filename: filename.to_string(),
                    retries,
                    detail: e.to_string(),
                }),
            },
        }
    }

    fn run_relink(&self, job: &DocumentJob, refined: RefinedDocument) -> DocumentState {
        let root = self.config.index_title.as_str();
        match relink::relink(&refined.markdown, &refined.images, &job.target) {
            Ok(relinked) => DocumentState::Ready(ArchiveEntry {
                title: job.document.stem().to_string(),
                path: format!("{root}/{}.md", job.target),
                markdown: relinked.markdown,
                images: relinked
                    .images
                    .into_iter()
                    .map(|img| ArchiveImage {
                        path: format!("{root}/{}", img.filename),
                        data: img.data,
                        content_type: img.content_type,
                    })
                    .collect(),
            }),
            Err(e) => DocumentState::Failed(DocumentError::Relink {
                filename: job.document.filename().to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

/// Run `op`, retrying retryable failures with exponential backoff
/// (`retry_backoff_ms * 2^(retry-1)`).
///
/// On failure returns the last error and how many retries were spent.
async fn with_retries<T, E, F, Fut>(
    config: &ConverterConfig,
    stage: &str,
    filename: &str,
    mut op: F,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < config.max_retries && e.is_retryable() => {
                retries += 1;
                let backoff = config
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(retries - 1));
                warn!(
                    "{}: {} failed ({}), retry {}/{} in {}ms",
                    filename, stage, e, retries, config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                warn!("{}: {} failed after {} retries: {}", filename, stage, retries, e);
                return Err((e, retries));
            }
        }
    }
}

// ── Free-function entry points ───────────────────────────────────────────

/// Convert uploaded documents with the HTTP backends from `config`.
///
/// # Errors
/// Only fatal errors: client construction or archive assembly. Per-document
/// failures are in `output.report`.
pub async fn convert_batch(
    documents: Vec<UploadedDocument>,
    config: &ConverterConfig,
) -> Result<BatchOutput, ConvertError> {
    Converter::new(config.clone())?.run(documents).await
}

/// Load local paths or URLs, then convert them as one batch.
///
/// An input that cannot be read (missing, wrong format) aborts before any
/// service is contacted.
pub async fn convert_files<S: AsRef<str>>(
    inputs: &[S],
    config: &ConverterConfig,
) -> Result<BatchOutput, ConvertError> {
    let documents = input::load_documents(inputs, config.download_timeout_secs).await?;
    convert_batch(documents, config).await
}

/// Convert files and write the archive to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_files_to_zip<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &ConverterConfig,
) -> Result<BatchOutput, ConvertError> {
    let output = convert_files(inputs, config).await?;
    write_archive(&output.archive, output_path.as_ref())?;
    Ok(output)
}

/// Write an archive to disk atomically.
pub fn write_archive(archive: &Archive, path: &Path) -> Result<(), ConvertError> {
    let fail = |source: std::io::Error| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(fail)?;
    tmp.write_all(archive.bytes()).map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;

    info!("Wrote {} ({} bytes)", path.display(), archive.len());
    Ok(())
}

/// Synchronous wrapper around [`convert_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_batch_sync(
    documents: Vec<UploadedDocument>,
    config: &ConverterConfig,
) -> Result<BatchOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_batch(documents, config))
}

/// Reachability of the two backend services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub docling: bool,
    pub ollama: bool,
}

impl ServiceHealth {
    /// Whether every service `config` actually needs is up.
    pub fn ready_for(&self, config: &ConverterConfig) -> bool {
        self.docling && (self.ollama || !config.refine)
    }
}

/// Probe Docling and Ollama concurrently.
pub async fn check_services(config: &ConverterConfig) -> Result<ServiceHealth, ConvertError> {
    let docling = DoclingClient::new(config)?;
    let ollama = OllamaClient::new(config)?;
    let (docling_up, ollama_up) = tokio::join!(docling.health_check(), ollama.health_check());

    info!(
        "Service check: Docling {} at {}, Ollama {} at {}",
        if docling_up { "up" } else { "down" },
        docling.base_url(),
        if ollama_up { "up" } else { "down" },
        ollama.base_url()
    );

    Ok(ServiceHealth {
        docling: docling_up,
        ollama: ollama_up,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentFormat, ExtractedImage};
    use crate::error::{ExtractionError, RefinementError};
    use crate::output::Stage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyExtractor {
        failures_before_success: u32,
        calls: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl Extractor for FlakyExtractor {
        async fn extract(&self, document: &UploadedDocument) -> Result<ExtractionResult, ExtractionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(ExtractionError::ServiceStatus {
                    status: self.status,
                    body: "busy".into(),
                });
            }
            Ok(ExtractionResult {
                markdown: format!("# {}\n\n![Figure](image_001.png)\n", document.stem()),
                images: vec![ExtractedImage {
                    filename: "image_001.png".into(),
                    data: vec![9; 8],
                    content_type: "image/png".into(),
                }],
            })
        }
    }

    struct EchoRefiner;

    #[async_trait]
    impl Refiner for EchoRefiner {
        async fn refine(&self, markdown: &str, _model: &str) -> Result<String, RefinementError> {
            Ok(markdown.to_string())
        }
    }

    fn config(max_retries: u32) -> ConverterConfig {
        ConverterConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(0)
            .build()
            .unwrap()
    }

    fn converter(extractor: FlakyExtractor, max_retries: u32) -> Converter {
        Converter::with_backends(config(max_retries), Arc::new(extractor), Arc::new(EchoRefiner))
    }

    fn flaky(failures: u32, status: u16) -> FlakyExtractor {
        FlakyExtractor {
            failures_before_success: failures,
            calls: AtomicU32::new(0),
            status,
        }
    }

    fn pdf(name: &str) -> UploadedDocument {
        UploadedDocument::new(name, b"%PDF-1.7".to_vec(), DocumentFormat::Pdf)
    }

    #[tokio::test]
    async fn test_advance_walks_every_stage() {
        let conv = converter(flaky(0, 500), 0);
        let mut job = DocumentJob::new(0, 1, pdf("report.pdf"), "report");

        let mut stages = vec![job.state().stage()];
        while !job.state().is_terminal() {
            conv.advance(&mut job).await;
            stages.push(job.state().stage());
        }
        assert_eq!(
            stages,
            vec![
                Stage::Pending,
                Stage::Extracting,
                Stage::Refining,
                Stage::Relinking,
                Stage::Ready
            ]
        );

        match job.state() {
            DocumentState::Ready(entry) => {
                assert_eq!(entry.path, "Import/report.md");
                assert!(entry.markdown.contains("![Figure](report/images/image_001.png)"));
                assert_eq!(entry.images[0].path, "Import/report/images/image_001.png");
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    struct SlowRefiner;

    #[async_trait]
    impl Refiner for SlowRefiner {
        async fn refine(&self, markdown: &str, _model: &str) -> Result<String, RefinementError> {
            sleep(Duration::from_millis(30)).await;
            Ok(markdown.to_string())
        }
    }

    #[tokio::test]
    async fn test_stage_time_is_charged_to_the_running_stage() {
        let conv = Converter::with_backends(config(0), Arc::new(flaky(0, 500)), Arc::new(SlowRefiner));
        let report = conv.process_document(0, 1, pdf("a.pdf"), "a").await;

        assert_eq!(report.stage(), Stage::Ready);
        assert!(report.timings.refinement_ms >= 30, "got {:?}", report.timings);
        let staged = report.timings.extraction_ms + report.timings.refinement_ms + report.timings.relink_ms;
        assert!(staged <= report.duration_ms);
    }

    #[tokio::test]
    async fn test_advance_leaves_terminal_state_alone() {
        let conv = converter(flaky(0, 500), 0);
        let mut job = DocumentJob::new(0, 1, pdf("a.pdf"), "a");
        job.state = DocumentState::Failed(DocumentError::Cancelled {
            filename: "a.pdf".into(),
        });
        conv.advance(&mut job).await;
        assert_eq!(job.state().stage(), Stage::Failed);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let conv = converter(flaky(2, 503), 2);
        let report = conv.process_document(0, 1, pdf("a.pdf"), "a").await;
        assert_eq!(report.stage(), Stage::Ready);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let conv = converter(flaky(10, 503), 2);
        let report = conv.process_document(0, 1, pdf("a.pdf"), "a").await;
        match report.error() {
            Some(DocumentError::Extraction { retries, .. }) => assert_eq!(*retries, 2),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let extractor = Arc::new(flaky(1, 400));
        let conv = Converter::with_backends(config(3), extractor.clone(), Arc::new(EchoRefiner));
        let report = conv.process_document(0, 1, pdf("a.pdf"), "a").await;
        assert_eq!(report.stage(), Stage::Failed);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_service_health_ignores_ollama_without_refinement() {
        let health = ServiceHealth {
            docling: true,
            ollama: false,
        };
        assert!(!health.ready_for(&ConverterConfig::default()));
        let no_refine = ConverterConfig::builder().refine(false).build().unwrap();
        assert!(health.ready_for(&no_refine));
    }

    #[test]
    fn test_write_archive_is_atomic_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("Import.zip");
        let archive = Archive::new(b"PK\x05\x06".to_vec(), vec![]);
        write_archive(&archive, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x05\x06");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
