//! Streaming batch API: emit each document's report as soon as it is terminal.
//!
//! Batches of large scans take minutes per document. The stream lets callers
//! show results as they arrive or log failures early; the eager
//! [`crate::convert::Converter::run`] is built on top of it and only adds
//! archive assembly.
//!
//! Reports arrive strictly in input order, because documents are processed
//! one at a time.

use crate::config::ConverterConfig;
use crate::convert::Converter;
use crate::document::UploadedDocument;
use crate::error::ConvertError;
use crate::output::DocumentReport;
use crate::pipeline::relink;
use futures::stream;
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A boxed stream of per-document reports.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentReport> + Send>>;

impl Converter {
    /// Process `documents` lazily, one per poll of the returned stream.
    ///
    /// Once `cancel` fires, every document not yet started is yielded as a
    /// cancelled failure without contacting any service.
    pub fn stream(&self, documents: Vec<UploadedDocument>, cancel: CancellationToken) -> DocumentStream {
        let total = documents.len();
        if let Some(ref cb) = self.config().progress_callback {
            cb.on_batch_start(total);
        }

        let targets = relink::plan_targets(&documents);
        let jobs = documents.into_iter().zip(targets).enumerate();

        let reports = stream::unfold(
            (self.clone(), jobs, cancel),
            move |(converter, mut jobs, cancel)| async move {
                let (index, (document, target)) = jobs.next()?;
                let report = if cancel.is_cancelled() {
                    converter.cancelled_report(index, total, &document)
                } else {
                    converter.process_document(index, total, document, target).await
                };
                Some((report, (converter, jobs, cancel)))
            },
        );

        Box::pin(reports)
    }
}

/// Stream reports for `documents` using the HTTP backends from `config`.
///
/// # Returns
/// - `Ok(DocumentStream)` — reports in input order
/// - `Err(ConvertError)` — the service clients could not be built
pub fn convert_stream(
    documents: Vec<UploadedDocument>,
    config: &ConverterConfig,
) -> Result<DocumentStream, ConvertError> {
    info!("Starting streaming batch: {} document(s)", documents.len());
    let converter = Converter::new(config.clone())?;
    Ok(converter.stream(documents, CancellationToken::new()))
}
