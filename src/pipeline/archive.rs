//! Archive assembly: Ready documents → one Docmost-importable ZIP.
//!
//! Layout for a batch with index title `Import`:
//!
//! ```text
//! Import.md                          index page, links every document
//! Import/report.md                   one page per Ready document
//! Import/report/images/image_001.png images next to their page
//! Import/sheet.md
//! ```
//!
//! The writer is fully deterministic: entries are written in input order,
//! every timestamp is the ZIP epoch (1980-01-01) and permissions are fixed,
//! so the same report always produces byte-identical archives.

use crate::config::{ConverterConfig, SkippedDocuments};
use crate::error::{ArchiveBuildError, ErrorKind};
use crate::output::{Archive, BatchReport};
use crate::pipeline::relink::link_destination;
use std::io::{Cursor, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Writes a [`BatchReport`] as a ZIP.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    index_title: String,
    skipped: SkippedDocuments,
}

impl ArchiveBuilder {
    pub fn new(index_title: impl Into<String>, skipped: SkippedDocuments) -> Self {
        Self {
            index_title: index_title.into(),
            skipped,
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.index_title.clone(), config.skipped_documents)
    }

    /// Path of the index page inside the archive, e.g. `Import.md`.
    pub fn index_path(&self) -> String {
        format!("{}.md", self.index_title)
    }

    /// Markdown of the index page.
    ///
    /// One bullet per Ready document in input order. Failed documents are
    /// either left out or listed under a "Skipped" heading.
    pub fn render_index(&self, report: &BatchReport) -> String {
        let mut out = format!("# {}\n", self.index_title);

        let entries: Vec<_> = report.entries().collect();
        if !entries.is_empty() {
            out.push('\n');
            for entry in entries {
                out.push_str(&format!(
                    "- [{}]({})\n",
                    escape_link_text(&entry.title),
                    link_destination(&entry.path)
                ));
            }
        }

        if self.skipped == SkippedDocuments::List && report.failed_count() > 0 {
            out.push_str("\n## Skipped\n\n");
            for doc in report.failures() {
                let reason = doc.error().map_or("failed", |e| kind_label(e.kind()));
                out.push_str(&format!("- `{}`: {}\n", doc.filename, reason));
            }
        }

        out
    }

    /// Serialise the report into a ZIP.
    ///
    /// Write order: index page, then for each Ready document its page followed
    /// by its images. A failure anywhere aborts the whole archive.
    pub fn build(&self, report: &BatchReport) -> Result<Archive, ArchiveBuildError> {
        let stamp = DateTime::default();
        let text = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(stamp)
            .unix_permissions(0o644);
        // Images are already compressed; deflating them again only costs time.
        let binary = text.compression_method(CompressionMethod::Stored);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut files = Vec::new();

        let index_path = self.index_path();
        zip.start_file(index_path.as_str(), text)?;
        zip.write_all(self.render_index(report).as_bytes())?;
        files.push(index_path);

        for entry in report.entries() {
            zip.start_file(entry.path.as_str(), text)?;
            zip.write_all(entry.markdown.as_bytes())?;
            files.push(entry.path.clone());

            for image in &entry.images {
                zip.start_file(image.path.as_str(), binary)?;
                zip.write_all(&image.data)?;
                files.push(image.path.clone());
            }
            debug!("Archived '{}' with {} image(s)", entry.path, entry.images.len());
        }

        let bytes = zip.finish()?.into_inner();
        info!("Archive built: {} file(s), {} bytes", files.len(), bytes.len());
        Ok(Archive::new(bytes, files))
    }
}

fn escape_link_text(title: &str) -> String {
    title.replace('[', "\\[").replace(']', "\\]")
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Extraction => "extraction failed",
        ErrorKind::Refinement => "refinement failed",
        ErrorKind::Relink => "image links could not be resolved",
        ErrorKind::Cancelled => "cancelled",
    }
}
