//! Configuration types for a sheetcast run.
//!
//! Everything a run needs (which workbook, which tabs, how to slice them,
//! where to post) lives in [`RunConfig`], built via its
//! [`RunConfigBuilder`]. The run entry point receives the struct explicitly;
//! nothing is read from process-wide state once the config exists.

use crate::error::SheetcastError;
use crate::pipeline::chunk::{column_index, is_column_letters};
use crate::progress::ProgressCallback;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one run over a list of sheets.
///
/// Built via [`RunConfig::builder()`].
///
/// # Example
/// ```rust
/// use sheetcast::RunConfig;
///
/// let config = RunConfig::builder()
///     .spreadsheet_id("1AbC")
///     .sheet_names(["Jan", "Feb"])
///     .chat_id("-100123")
///     .max_rows_per_file(40)
///     .build()
///     .unwrap();
/// assert_eq!(config.sheet_names, vec!["Jan", "Feb"]);
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Spreadsheet (workbook) identifier, as it appears in the sheet URL.
    pub spreadsheet_id: String,

    /// Sheet titles to process, in order. Trimmed, empties dropped, deduplicated.
    pub sheet_names: Vec<String>,

    /// Maximum rows per exported window. Default: 40.
    ///
    /// Each window becomes one PDF and one image. Forty rows of a landscape
    /// A4 page fitted to width stays legible once rasterised at 150 DPI.
    pub max_rows_per_file: u32,

    /// First exported column. Default: `F`.
    pub start_col: String,

    /// Last exported column. Default: `AD`.
    pub end_col: String,

    /// Column scanned bottom-up to find the last data row. Default: `K`.
    pub marker_col: String,

    /// How many rows of the marker column are scanned. Default: 2000.
    pub marker_scan_rows: u32,

    /// Cell regions feeding the caption text.
    pub regions: CellRegions,

    /// Chat destination id (numeric id or `@channel`).
    pub chat_id: String,

    /// Bot token for the chat API. Required by [`crate::run()`], unused by
    /// [`crate::run_with()`].
    pub bot_token: Option<String>,

    /// Google credentials. Required by [`crate::run()`].
    pub credentials: Option<Credentials>,

    /// Album of windows, or one image for the whole sheet. Default: [`ExportLayout::Album`].
    pub layout: ExportLayout,

    /// Retry policy for rate-limited PDF exports.
    pub retry: RetryPolicy,

    /// Rasterisation DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Rasteriser executable. Default: `pdftoppm` (poppler-utils) from `PATH`.
    pub rasterizer_program: PathBuf,

    /// Timeout applied to every HTTP request, in seconds. Default: 120.
    pub http_timeout_secs: u64,

    /// Number of sheets processed at once. Default: 1 (strictly sequential).
    ///
    /// Windows inside a sheet are always exported in row order regardless.
    pub concurrency: usize,

    /// Export and rasterise but do not post anything. Default: false.
    pub dry_run: bool,

    /// API base URLs. Overridable for proxies and tests.
    pub endpoints: Endpoints,

    /// Optional per-sheet progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_names: Vec::new(),
            max_rows_per_file: 40,
            start_col: "F".to_string(),
            end_col: "AD".to_string(),
            marker_col: "K".to_string(),
            marker_scan_rows: 2000,
            regions: CellRegions::default(),
            chat_id: String::new(),
            bot_token: None,
            credentials: None,
            layout: ExportLayout::default(),
            retry: RetryPolicy::default(),
            dpi: 150,
            rasterizer_program: PathBuf::from("pdftoppm"),
            http_timeout_secs: 120,
            concurrency: 1,
            dry_run: false,
            endpoints: Endpoints::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("sheet_names", &self.sheet_names)
            .field("max_rows_per_file", &self.max_rows_per_file)
            .field("start_col", &self.start_col)
            .field("end_col", &self.end_col)
            .field("marker_col", &self.marker_col)
            .field("marker_scan_rows", &self.marker_scan_rows)
            .field("regions", &self.regions)
            .field("chat_id", &self.chat_id)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("credentials", &self.credentials)
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .field("dpi", &self.dpi)
            .field("rasterizer_program", &self.rasterizer_program)
            .field("concurrency", &self.concurrency)
            .field("dry_run", &self.dry_run)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn spreadsheet_id(mut self, id: impl Into<String>) -> Self {
        self.config.spreadsheet_id = id.into().trim().to_string();
        self
    }

    /// Set the sheet titles to process. Blank entries are dropped and
    /// repeated titles keep only their first position.
    pub fn sheet_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        self.config.sheet_names = out;
        self
    }

    pub fn max_rows_per_file(mut self, rows: u32) -> Self {
        self.config.max_rows_per_file = rows;
        self
    }

    pub fn columns(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.config.start_col = start.into().trim().to_ascii_uppercase();
        self.config.end_col = end.into().trim().to_ascii_uppercase();
        self
    }

    pub fn marker_col(mut self, col: impl Into<String>) -> Self {
        self.config.marker_col = col.into().trim().to_ascii_uppercase();
        self
    }

    pub fn marker_scan_rows(mut self, rows: u32) -> Self {
        self.config.marker_scan_rows = rows.max(1);
        self
    }

    pub fn regions(mut self, regions: CellRegions) -> Self {
        self.config.regions = regions;
        self
    }

    pub fn chat_id(mut self, id: impl Into<String>) -> Self {
        self.config.chat_id = id.into().trim().to_string();
        self
    }

    pub fn bot_token(mut self, token: impl Into<String>) -> Self {
        self.config.bot_token = Some(token.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn layout(mut self, layout: ExportLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn rasterizer_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.rasterizer_program = program.into();
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, SheetcastError> {
        let c = &self.config;
        if c.spreadsheet_id.is_empty() {
            return Err(SheetcastError::InvalidConfig(
                "spreadsheet id is required".into(),
            ));
        }
        if c.sheet_names.is_empty() {
            return Err(SheetcastError::InvalidConfig(
                "at least one sheet name is required".into(),
            ));
        }
        if c.chat_id.is_empty() {
            return Err(SheetcastError::InvalidConfig("chat id is required".into()));
        }
        if c.max_rows_per_file == 0 {
            return Err(SheetcastError::InvalidConfig(
                "max rows per file must be ≥ 1".into(),
            ));
        }
        for (label, col) in [
            ("start column", &c.start_col),
            ("end column", &c.end_col),
            ("marker column", &c.marker_col),
        ] {
            if !is_column_letters(col) {
                return Err(SheetcastError::InvalidConfig(format!(
                    "{label} must be 1–3 letters A–Z, got '{col}'"
                )));
            }
        }
        if column_index(&c.start_col) > column_index(&c.end_col) {
            return Err(SheetcastError::InvalidConfig(format!(
                "start column {} is after end column {}",
                c.start_col, c.end_col
            )));
        }
        if c.retry.max_attempts == 0 {
            return Err(SheetcastError::InvalidConfig(
                "retry attempts must be ≥ 1".into(),
            ));
        }
        if c.retry.min_delay_ms > c.retry.max_delay_ms {
            return Err(SheetcastError::InvalidConfig(format!(
                "retry delay range is empty: {}..{} ms",
                c.retry.min_delay_ms, c.retry.max_delay_ms
            )));
        }
        Ok(self.config)
    }
}

// ── Supporting types ─────────────────────────────────────────────────────

/// How a sheet is turned into images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportLayout {
    /// One image per row window, posted together as an album. (default)
    #[default]
    Album,
    /// The whole data range exported once and posted as a single photo
    /// with the caption attached.
    Single,
}

/// Bounded retry for rate-limited exports.
///
/// Each wait is drawn afresh from `[min_delay_ms, max_delay_ms)` so that
/// several clients hitting the same limit do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 5.
    pub max_attempts: u32,
    /// Lower bound of the randomised wait. Default: 3000.
    pub min_delay_ms: u64,
    /// Upper bound (exclusive) of the randomised wait. Default: 6000.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 3000,
            max_delay_ms: 6000,
        }
    }
}

impl RetryPolicy {
    /// Draw a fresh wait from `[min_delay_ms, max_delay_ms)`.
    pub fn next_delay(&self) -> Duration {
        let ms = if self.max_delay_ms > self.min_delay_ms {
            rand::rng().random_range(self.min_delay_ms..self.max_delay_ms)
        } else {
            self.min_delay_ms
        };
        Duration::from_millis(ms)
    }
}

/// Cell ranges (without sheet prefix) read for caption text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRegions {
    /// Header row; non-empty cells joined with a space. Default: `F5:J5`.
    pub header: String,
    /// Notes block; each row's cells joined with `" : "`. Default: `A4:B20`.
    pub notes: String,
}

impl Default for CellRegions {
    fn default() -> Self {
        Self {
            header: "F5:J5".to_string(),
            notes: "A4:B20".to_string(),
        }
    }
}

/// How the Google APIs are authenticated.
#[derive(Clone)]
pub enum Credentials {
    /// Service-account key file contents (JSON with `client_email`, `private_key`).
    ServiceAccountJson(String),
    /// An already issued OAuth access token.
    AccessToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ServiceAccountJson(_) => f.write_str("ServiceAccountJson(<redacted>)"),
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

/// Base URLs of the remote services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Sheets REST API root. Default: `https://sheets.googleapis.com/v4/`.
    pub sheets_api: String,
    /// Host serving `/spreadsheets/d/{id}/export`. Default: `https://docs.google.com/`.
    pub docs_export: String,
    /// Bot API root. Default: `https://api.telegram.org/`.
    pub telegram_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sheets_api: "https://sheets.googleapis.com/v4/".to_string(),
            docs_export: "https://docs.google.com/".to_string(),
            telegram_api: "https://api.telegram.org/".to_string(),
        }
    }
}
