//! Pipeline stages for document-to-archive conversion.
//!
//! Each submodule implements exactly one transformation step; the state
//! machine that drives a document through them lives in [`crate::convert`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ decode ──▶ postprocess ──▶ refine ──▶ postprocess ──▶ relink ──▶ archive
//! (path/URL) (Docling)  (base64)   (cleanup)      (Ollama)   (cleanup)      (links)    (ZIP)
//! ```
//!
//! 1. [`input`]   — read a local file or download a URL into an upload
//! 2. [`extract`] — upload to Docling; the only stage besides `refine` with
//!    network I/O
//! 3. [`decode`]  — turn embedded base64 images into named image files
//! 4. [`postprocess`] — deterministic text cleanup before and after the model
//! 5. [`refine`]  — single-shot Ollama generation over the whole document
//! 6. [`relink`]  — rewrite image links to their archive location
//! 7. [`archive`] — write the index page, pages and images into one ZIP

pub mod archive;
pub mod decode;
pub mod extract;
pub mod input;
pub mod postprocess;
pub mod refine;
pub mod relink;
