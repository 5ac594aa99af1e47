//! Progress-callback trait for per-sheet run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive events
//! as the run works through its sheets. The CLI uses this to drive its
//! progress bar; a library caller might forward the events to a log or a
//! status page.
//!
//! # Example
//!
//! ```rust
//! use sheetcast::{RunConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     published: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_sheet_complete(&self, sheet: &str, images: usize) {
//!         self.published.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{sheet}: {images} images posted");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { published: AtomicUsize::new(0) });
//!
//! let config = RunConfig::builder()
//!     .spreadsheet_id("1AbC")
//!     .sheet_names(["Jan"])
//!     .chat_id("-100123")
//!     .progress_callback(counter as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the run as it processes each sheet.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `concurrency > 1` sheet events for different
/// sheets may interleave and arrive from different threads.
pub trait RunProgressCallback: Send + Sync {
    /// Called once, after workbook metadata has been fetched.
    fn on_run_start(&self, total_sheets: usize) {
        let _ = total_sheets;
    }

    /// Called when work on a sheet begins.
    ///
    /// # Arguments
    /// * `sheet` — sheet title
    /// * `index` — 1-indexed position in the configured list
    /// * `total` — number of configured sheets
    fn on_sheet_start(&self, sheet: &str, index: usize, total: usize) {
        let _ = (sheet, index, total);
    }

    /// Called after each window has been exported and rasterised.
    fn on_window_done(&self, sheet: &str, window: usize, total_windows: usize) {
        let _ = (sheet, window, total_windows);
    }

    /// Called when a sheet's images were posted (or, in a dry run, produced).
    fn on_sheet_complete(&self, sheet: &str, images: usize) {
        let _ = (sheet, images);
    }

    /// Called when a sheet is skipped (title not found, no rows).
    fn on_sheet_skipped(&self, sheet: &str, reason: &str) {
        let _ = (sheet, reason);
    }

    /// Called when a sheet fails.
    fn on_sheet_error(&self, sheet: &str, error: &str) {
        let _ = (sheet, error);
    }

    /// Called once after every sheet has been attempted.
    fn on_run_complete(&self, total_sheets: usize, succeeded: usize) {
        let _ = (total_sheets, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
