//! # sheetcast
//!
//! Export ranges of spreadsheet tabs as trimmed PNG images and post them,
//! with a caption built from the sheet's own cells, to a chat channel.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Spreadsheet
//!  │
//!  ├─ 1. Auth      service-account JWT → bearer token (once per run)
//!  ├─ 2. Metadata  sheet titles → tab ids (once per run)
//!  ├─ 3. Resolve   marker column scanned bottom-up → last data row
//!  ├─ 4. Caption   header row + notes block → caption text
//!  ├─ 5. Export    row windows → one PDF each (429 → jittered retry)
//!  ├─ 6. Raster    pdftoppm → PNG, uniform border trimmed
//!  ├─ 7. Publish   album(s) of images, then the caption as a message
//!  └─ 8. Cleanup   intermediate files removed, per-sheet outcome recorded
//! ```
//!
//! Steps 3–8 repeat for every configured sheet. A failing sheet is recorded
//! in the [`RunReport`] and the run moves on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheetcast::{run, Credentials, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::builder()
//!         .spreadsheet_id("1AbC…")
//!         .sheet_names(["Jan", "Feb"])
//!         .chat_id("-100123456")
//!         .bot_token(std::env::var("TELEGRAM_BOT_TOKEN")?)
//!         .credentials(Credentials::ServiceAccountJson(std::fs::read_to_string("sa.json")?))
//!         .build()?;
//!
//!     let report = run(&config).await?;
//!     eprintln!("{} published, {} failed",
//!         report.stats.published_sheets,
//!         report.stats.failed_sheets);
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sheetcast` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! sheetcast = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! Rasterisation shells out to `pdftoppm` from poppler-utils. Point
//! [`RunConfigBuilder::rasterizer_program`] elsewhere if it is not on `PATH`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CellRegions, Credentials, Endpoints, ExportLayout, RetryPolicy, RunConfig, RunConfigBuilder,
};
pub use error::{ApiError, SheetError, SheetcastError};
pub use output::{RunReport, RunStats, SheetOutcome, SheetStatus};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use run::{run, run_sync, run_with, Services};
