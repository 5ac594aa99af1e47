//! Error types for the sheetcast library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SheetcastError`] — **Fatal**: the run cannot proceed at all
//!   (bad configuration, credentials rejected, workbook metadata
//!   unreachable). Returned as `Err(SheetcastError)` from [`crate::run()`].
//!
//! * [`SheetError`] — **Non-fatal**: one sheet failed (export rate-limited
//!   past the retry budget, rasteriser crashed, upload rejected) but the
//!   remaining sheets still run. Stored inside
//!   [`crate::output::SheetOutcome`] so callers can inspect partial success.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sheetcast library.
///
/// Per-sheet failures use [`SheetError`] and are stored in
/// [`crate::output::SheetOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SheetcastError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Auth errors ───────────────────────────────────────────────────────
    /// Credentials could not be parsed (malformed service-account JSON, bad PEM key).
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// The token endpoint rejected the assertion or could not be reached.
    #[error("Authentication failed: {detail}\nCheck that the service account can read the spreadsheet.")]
    AuthFailed { detail: String },

    // ── Workbook errors ───────────────────────────────────────────────────
    /// Workbook metadata (sheet titles → tab ids) could not be fetched.
    #[error("Failed to fetch metadata for spreadsheet '{spreadsheet_id}': {detail}")]
    MetadataFailed {
        spreadsheet_id: String,
        detail: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The temporary working directory could not be created.
    #[error("Failed to create working directory: {source}")]
    WorkDir {
        #[source]
        source: std::io::Error,
    },

    /// Some sheets succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::RunReport::into_result`] when the caller
    /// wants to treat any sheet failure as an error.
    #[error("{failed}/{total} sheets failed")]
    PartialFailure { failed: usize, total: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single sheet.
///
/// The run logs it, records it in the sheet's outcome and moves on to the
/// next sheet.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum SheetError {
    /// The sheet title does not exist in the workbook metadata.
    #[error("Sheet '{sheet}' not found in spreadsheet")]
    NotFound { sheet: String },

    /// A cell-range read failed.
    #[error("Sheet '{sheet}': reading {range} failed: {detail}")]
    ReadFailed {
        sheet: String,
        range: String,
        detail: String,
    },

    /// The export endpoint kept answering 429 until the attempt budget ran out.
    #[error("Export of {range} still rate-limited after {attempts} attempts")]
    RateLimited { range: String, attempts: u32 },

    /// The export endpoint failed with something other than a rate limit.
    #[error("Export of {range} failed: {detail}")]
    ExportFailed { range: String, detail: String },

    /// The rasteriser exited unsuccessfully or could not be started.
    #[error("Rasterising '{pdf}' failed: {detail}")]
    ConversionFailed { pdf: PathBuf, detail: String },

    /// The rasteriser exited cleanly but did not produce the expected PNG.
    #[error("Rasteriser produced no output at '{expected}'")]
    OutputMissing { expected: PathBuf },

    /// Decoding, trimming or re-encoding the PNG failed.
    #[error("Trimming '{path}' failed: {detail}")]
    TrimFailed { path: PathBuf, detail: String },

    /// The chat API rejected an upload or message.
    #[error("Publishing to chat failed: {detail}")]
    PublishFailed { detail: String },

    /// Writing an intermediate file failed.
    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl SheetError {
    /// Whether the sheet was skipped rather than failed.
    ///
    /// A missing sheet title is recovered by skipping; it does not count
    /// towards the run's failure total.
    pub fn is_skip(&self) -> bool {
        matches!(self, SheetError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SheetError::Io {
            path: path.into(),
            detail: err.to_string(),
        }
    }
}

/// A failed call to one of the remote HTTP APIs.
///
/// Kept separate from [`SheetError`] so the export retry loop can tell a
/// rate limit apart from every other failure before deciding to wait.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, timeout, …).
    #[error("request failed: {0}")]
    Transport(String),

    /// The response arrived but its body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP 429 Too Many Requests.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::Status { status: 429, .. })
    }

    /// Read status and body from a non-success response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ApiError::Status { status, body }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}
