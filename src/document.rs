//! Input-side data: uploaded documents and what the stages make of them.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Document formats accepted for conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
}

impl DocumentFormat {
    /// Infer the format from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "xlsx" => Some(DocumentFormat::Xlsx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Xlsx => "xlsx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    /// Leading bytes every file of this format starts with.
    ///
    /// DOCX and XLSX are OOXML packages, i.e. ZIP files.
    fn magic(&self) -> &'static [u8] {
        match self {
            DocumentFormat::Pdf => b"%PDF",
            DocumentFormat::Docx | DocumentFormat::Xlsx => b"PK\x03\x04",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Docx => "DOCX",
            DocumentFormat::Xlsx => "XLSX",
        })
    }
}

/// One uploaded file. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    filename: String,
    content: Vec<u8>,
    format: DocumentFormat,
}

impl UploadedDocument {
    /// Wrap an upload whose format has already been decided by the caller.
    pub fn new(filename: impl Into<String>, content: Vec<u8>, format: DocumentFormat) -> Self {
        Self {
            filename: filename.into(),
            content,
            format,
        }
    }

    /// Infer the format from the file name and check it against the content.
    pub fn from_bytes(filename: impl Into<String>, content: Vec<u8>) -> Result<Self, ConvertError> {
        let filename = filename.into();
        let format = DocumentFormat::from_filename(&filename).ok_or_else(|| {
            ConvertError::UnsupportedFormat {
                filename: filename.clone(),
            }
        })?;

        let magic = format.magic();
        if !content.starts_with(magic) {
            return Err(ConvertError::FormatMismatch {
                filename,
                expected: format.extension(),
                magic: content.iter().take(magic.len()).copied().collect(),
            });
        }

        Ok(Self::new(filename, content, format))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// File name without directory and extension, e.g. `report` for `scans/report.pdf`.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.filename)
    }
}

impl fmt::Debug for UploadedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedDocument")
            .field("filename", &self.filename)
            .field("format", &self.format)
            .field("bytes", &self.content.len())
            .finish()
    }
}

/// An image produced by the extraction service.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// File name the Markdown refers to, e.g. `image_001.png`. Unique per document.
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: String,
}

impl fmt::Debug for ExtractedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedImage")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Raw Markdown plus the images it refers to, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub markdown: String,
    pub images: Vec<ExtractedImage>,
}

/// Markdown after the refinement stage.
///
/// The image set is carried over untouched from the [`ExtractionResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinedDocument {
    pub markdown: String,
    pub images: Vec<ExtractedImage>,
    /// Set when the refinement service failed and the raw Markdown was kept.
    pub warning: Option<String>,
}
