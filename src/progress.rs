//! Progress-callback trait for per-document conversion events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConverterConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves each document through its stages.
//!
//! Documents are processed one at a time, so callbacks for a batch never
//! overlap. The trait is still `Send + Sync` because separate batches may run
//! on separate tasks sharing one callback.
//!
//! # Example
//!
//! ```rust
//! use docmost_convert::{BatchProgressCallback, ConverterConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     ready: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_ready(&self, index: usize, total: usize, filename: &str, _warnings: usize) {
//!         self.ready.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ready", index + 1, total, filename);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { ready: AtomicUsize::new(0) });
//!
//! let config = ConverterConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the batch pipeline as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 0-based input position.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document starts.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a document leaves `Pending`.
    fn on_document_start(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called on every stage transition of a document.
    fn on_stage(&self, index: usize, filename: &str, stage: Stage) {
        let _ = (index, filename, stage);
    }

    /// Called when a document reaches `Ready`.
    ///
    /// `warnings` counts non-fatal notes such as a refinement fallback.
    fn on_document_ready(&self, index: usize, total: usize, filename: &str, warnings: usize) {
        let _ = (index, total, filename, warnings);
    }

    /// Called when a document reaches `Failed`.
    fn on_document_failed(&self, index: usize, total: usize, filename: &str, error: &str) {
        let _ = (index, total, filename, error);
    }

    /// Called once after every document is terminal and the archive is built.
    fn on_batch_complete(&self, total: usize, ready: usize) {
        let _ = (total, ready);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallback {
        events: Mutex<Vec<String>>,
    }

    impl BatchProgressCallback for RecordingCallback {
        fn on_batch_start(&self, total: usize) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }

        fn on_stage(&self, index: usize, _filename: &str, stage: Stage) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{index} {}", stage.as_str()));
        }

        fn on_document_failed(&self, index: usize, _total: usize, _filename: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("{index} failed"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(0, 2, "a.pdf");
        cb.on_stage(0, "a.pdf", Stage::Extracting);
        cb.on_document_ready(0, 2, "a.pdf", 1);
        cb.on_document_failed(1, 2, "b.xlsx", "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let cb = RecordingCallback::default();
        cb.on_batch_start(1);
        cb.on_stage(0, "a.pdf", Stage::Refining);
        cb.on_document_failed(0, 1, "a.pdf", "x");
        cb.on_document_ready(0, 1, "a.pdf", 0);

        let events = cb.events.lock().unwrap();
        assert_eq!(*events, vec!["start 1", "0 refining", "0 failed"]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_batch_complete(10, 10);
    }
}
