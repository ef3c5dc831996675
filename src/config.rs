//! Configuration types for batch conversion.
//!
//! Every knob lives in [`ConverterConfig`], built via its
//! [`ConverterConfigBuilder`] or read once from the environment with
//! [`ConverterConfig::from_env`]. A [`crate::convert::Converter`] takes the
//! config by value when it is constructed and never changes it afterwards.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable naming the extraction service base URL.
pub const ENV_DOCLING_URL: &str = "DOCLING_SERVER_URL";
/// Environment variable naming the refinement service base URL.
pub const ENV_OLLAMA_URL: &str = "OLLAMA_SERVER_URL";
/// Environment variable naming the refinement model.
pub const ENV_OLLAMA_MODEL: &str = "OLLAMA_MODEL";

/// Configuration for a batch conversion.
///
/// # Example
/// ```rust
/// use docmost_convert::{ConverterConfig, RefinementFallback};
///
/// let config = ConverterConfig::builder()
///     .docling_url("http://localhost:5001")
///     .ollama_url("http://localhost:11434")
///     .model("llama3")
///     .refinement_fallback(RefinementFallback::FailDocument)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Base URL of the Docling extraction service. Default: `http://docling-server:5001`.
    pub docling_url: String,

    /// Base URL of the Ollama service. Default: `http://ollama:11434`.
    pub ollama_url: String,

    /// Model used for refinement. Default: `llama3`.
    pub model: String,

    /// Run the refinement stage at all. Default: true.
    ///
    /// When false the extracted Markdown goes straight to relinking and no
    /// refinement warning is recorded.
    pub refine: bool,

    /// What to do when refinement fails. Default: [`RefinementFallback::UseRaw`].
    pub refinement_fallback: RefinementFallback,

    /// Whether failed documents are listed on the index page. Default: [`SkippedDocuments::Omit`].
    pub skipped_documents: SkippedDocuments,

    /// Title of the index page; also names the root Markdown file and the
    /// folder holding the sub-pages. Default: `Import`.
    pub index_title: String,

    /// Per-request timeout for the extraction service in seconds. Default: 300.
    ///
    /// OCR and table-structure analysis on a long scanned PDF easily takes
    /// minutes on a busy GPU.
    pub extraction_timeout_secs: u64,

    /// Per-request timeout for the refinement service in seconds. Default: 120.
    pub refinement_timeout_secs: u64,

    /// Additional attempts per stage on a retryable failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for refinement. Default: 0.2.
    pub temperature: f32,

    /// Context window (`num_ctx`) requested from the model. Default: 8192.
    pub context_window: u32,

    /// Custom refinement instruction. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Ask the extraction service to OCR scanned pages. Default: true.
    pub do_ocr: bool,

    /// Ask the extraction service to reconstruct table structure. Default: true.
    pub do_table_structure: bool,

    /// OCR engine requested from the extraction service. Default: `easyocr`.
    pub ocr_engine: String,

    /// Apply the deterministic Markdown cleanup rules. Default: true.
    pub clean_markdown: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            docling_url: "http://docling-server:5001".to_string(),
            ollama_url: "http://ollama:11434".to_string(),
            model: "llama3".to_string(),
            refine: true,
            refinement_fallback: RefinementFallback::default(),
            skipped_documents: SkippedDocuments::default(),
            index_title: "Import".to_string(),
            extraction_timeout_secs: 300,
            refinement_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 1000,
            temperature: 0.2,
            context_window: 8192,
            system_prompt: None,
            do_ocr: true,
            do_table_structure: true,
            ocr_engine: "easyocr".to_string(),
            clean_markdown: true,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("docling_url", &self.docling_url)
            .field("ollama_url", &self.ollama_url)
            .field("model", &self.model)
            .field("refine", &self.refine)
            .field("refinement_fallback", &self.refinement_fallback)
            .field("skipped_documents", &self.skipped_documents)
            .field("index_title", &self.index_title)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("refinement_timeout_secs", &self.refinement_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("clean_markdown", &self.clean_markdown)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `DOCLING_SERVER_URL`, `OLLAMA_SERVER_URL` and
    /// `OLLAMA_MODEL` when they are set and non-empty.
    pub fn from_env() -> Result<Self, ConvertError> {
        let mut builder = Self::builder();
        if let Some(url) = non_empty_env(ENV_DOCLING_URL) {
            builder = builder.docling_url(url);
        }
        if let Some(url) = non_empty_env(ENV_OLLAMA_URL) {
            builder = builder.ollama_url(url);
        }
        if let Some(model) = non_empty_env(ENV_OLLAMA_MODEL) {
            builder = builder.model(model);
        }
        builder.build()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn docling_url(mut self, url: impl Into<String>) -> Self {
        self.config.docling_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn refine(mut self, v: bool) -> Self {
        self.config.refine = v;
        self
    }

    pub fn refinement_fallback(mut self, policy: RefinementFallback) -> Self {
        self.config.refinement_fallback = policy;
        self
    }

    pub fn skipped_documents(mut self, v: SkippedDocuments) -> Self {
        self.config.skipped_documents = v;
        self
    }

    pub fn index_title(mut self, title: impl Into<String>) -> Self {
        self.config.index_title = title.into();
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn refinement_timeout_secs(mut self, secs: u64) -> Self {
        self.config.refinement_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn context_window(mut self, tokens: u32) -> Self {
        self.config.context_window = tokens;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn do_ocr(mut self, v: bool) -> Self {
        self.config.do_ocr = v;
        self
    }

    pub fn do_table_structure(mut self, v: bool) -> Self {
        self.config.do_table_structure = v;
        self
    }

    pub fn ocr_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.ocr_engine = engine.into();
        self
    }

    pub fn clean_markdown(mut self, v: bool) -> Self {
        self.config.clean_markdown = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        for (name, url) in [("Docling", &c.docling_url), ("Ollama", &c.ollama_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} URL must start with http:// or https://, got '{url}'"
                )));
            }
        }
        if c.refine && c.model.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "A refinement model is required when refinement is enabled".into(),
            ));
        }
        let title = c.index_title.trim();
        if title.is_empty() || title.contains(['/', '\\']) {
            return Err(ConvertError::InvalidConfig(format!(
                "Index title must be a non-empty file name, got '{}'",
                c.index_title
            )));
        }
        if c.extraction_timeout_secs == 0 || c.refinement_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Service timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the pipeline does when the refinement service fails for a document.
///
/// Extraction already succeeded at that point, so the raw Markdown is usable
/// as-is; the default keeps it and records a warning in the batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefinementFallback {
    /// Keep the unrefined Markdown and flag the document with a warning. (default)
    ///
    /// "Unrefined" means the extraction output after the pre-refinement
    /// cleanup when `clean_markdown` is on: a `# title` heading may be added
    /// and flattened `1. 1.` lists renumbered. With `clean_markdown` off it is
    /// the extracted Markdown byte for byte.
    #[default]
    UseRaw,
    /// Mark the document as failed.
    FailDocument,
}

/// How documents that failed are presented on the index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SkippedDocuments {
    /// Leave them off the index page entirely. (default)
    #[default]
    Omit,
    /// Append a "Skipped" section naming each failed file and why it failed.
    List,
}
