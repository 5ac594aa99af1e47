//! Run entry points: every configured sheet, start to finish.
//!
//! A run authenticates, fetches workbook metadata once, then for each sheet:
//! resolve → read caption → export windows → rasterise → publish → clean up.
//! Failures inside a sheet are recorded in its [`SheetOutcome`] and the run
//! moves on; only failures before the first sheet (configuration, auth,
//! metadata, temp directory) abort the run.

use crate::auth;
use crate::config::{ExportLayout, RunConfig};
use crate::error::{SheetError, SheetcastError};
use crate::output::{RunReport, SheetOutcome, SheetStatus};
use crate::pipeline::chunk::{chunk_rows, window_range, RowWindow};
use crate::pipeline::export::{
    fetch_with_retry, ExportRequest, HttpPdfExporter, PdfExporter, Sleeper, TokioSleeper,
};
use crate::pipeline::publish::{publish_sheet, ChatApi, ExportedImage, TelegramClient};
use crate::pipeline::rasterize::{PdftoppmRasterizer, Rasterizer};
use crate::pipeline::reader::{
    read_caption, resolve_target, GoogleSheetsClient, SheetProperties, SheetTarget, SheetsApi,
};
use crate::pipeline::workdir::{remove_files, SheetDir, WorkDir};
use futures::stream::{self, StreamExt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The collaborators a run talks to.
///
/// [`Services::connect`] builds the real HTTP clients and `pdftoppm`
/// rasteriser; tests and embedders can assemble their own.
#[derive(Clone)]
pub struct Services {
    pub sheets: Arc<dyn SheetsApi>,
    pub exporter: Arc<dyn PdfExporter>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub chat: Arc<dyn ChatApi>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Services {
    /// Authenticate and build the production collaborators.
    ///
    /// An access token is obtained here, before any sheet is touched, so bad
    /// credentials fail the run up front.
    pub async fn connect(config: &RunConfig) -> Result<Self, SheetcastError> {
        let credentials = config.credentials.as_ref().ok_or_else(|| {
            SheetcastError::InvalidConfig("Google credentials are required".into())
        })?;
        let bot_token = match (&config.bot_token, config.dry_run) {
            (Some(token), _) => token.clone(),
            (None, true) => String::new(),
            (None, false) => {
                return Err(SheetcastError::InvalidConfig(
                    "a bot token is required unless --dry-run is set".into(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| SheetcastError::Internal(format!("HTTP client: {e}")))?;

        let tokens = auth::token_source(credentials, http.clone())?;
        tokens.access_token().await?;

        let endpoint_err = |e: crate::error::ApiError| SheetcastError::InvalidConfig(e.to_string());
        Ok(Self {
            sheets: Arc::new(
                GoogleSheetsClient::new(
                    http.clone(),
                    &config.endpoints.sheets_api,
                    &config.spreadsheet_id,
                    Arc::clone(&tokens),
                )
                .map_err(endpoint_err)?,
            ),
            exporter: Arc::new(
                HttpPdfExporter::new(
                    http.clone(),
                    &config.endpoints.docs_export,
                    &config.spreadsheet_id,
                    tokens,
                )
                .map_err(endpoint_err)?,
            ),
            rasterizer: Arc::new(PdftoppmRasterizer::new(
                config.rasterizer_program.clone(),
                config.dpi,
            )),
            chat: Arc::new(
                TelegramClient::new(http, &config.endpoints.telegram_api, bot_token)
                    .map_err(endpoint_err)?,
            ),
            sleeper: Arc::new(TokioSleeper),
        })
    }
}

/// Process every configured sheet with the production collaborators.
///
/// # Returns
/// `Ok(RunReport)` once every sheet has been attempted, even if some sheets
/// failed (check [`RunReport::has_failures`] or call
/// [`RunReport::into_result`]).
///
/// # Errors
/// Returns `Err(SheetcastError)` only for fatal errors:
/// - missing credentials or bot token
/// - token exchange failure
/// - workbook metadata unreachable
/// - temporary directory not creatable
pub async fn run(config: &RunConfig) -> Result<RunReport, SheetcastError> {
    let services = Services::connect(config).await?;
    run_with(config, &services).await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(config: &RunConfig) -> Result<RunReport, SheetcastError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SheetcastError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(config))
}

/// Process every configured sheet with the given collaborators.
pub async fn run_with(config: &RunConfig, services: &Services) -> Result<RunReport, SheetcastError> {
    let started = Instant::now();
    let total = config.sheet_names.len();
    info!(
        "Starting run: {} sheets from spreadsheet {}",
        total, config.spreadsheet_id
    );

    // ── Step 1: Workbook metadata ────────────────────────────────────────
    let workbook = services
        .sheets
        .sheet_properties()
        .await
        .map_err(|e| SheetcastError::MetadataFailed {
            spreadsheet_id: config.spreadsheet_id.clone(),
            detail: e.to_string(),
        })?;
    debug!("Workbook has {} sheets", workbook.len());

    // ── Step 2: Scratch space for the whole run ──────────────────────────
    let workdir = WorkDir::create()?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    // ── Step 3: Sheets, in order ─────────────────────────────────────────
    let outcomes: Vec<SheetOutcome> = stream::iter(config.sheet_names.iter().enumerate())
        .map(|(i, name)| process_sheet(config, services, &workbook, &workdir, name, i + 1, total))
        .buffered(config.concurrency.max(1))
        .collect()
        .await;

    // ── Step 4: Release the scratch directory ────────────────────────────
    workdir.close();

    let report = RunReport::new(outcomes, started.elapsed().as_millis() as u64);
    info!(
        "Run complete: {} published, {} skipped, {} failed, {}ms",
        report.stats.published_sheets,
        report.stats.skipped_sheets,
        report.stats.failed_sheets,
        report.stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total, report.stats.published_sheets);
    }
    Ok(report)
}

/// Run one sheet and turn its result into an outcome. Never fails.
async fn process_sheet(
    config: &RunConfig,
    services: &Services,
    workbook: &[SheetProperties],
    workdir: &WorkDir,
    name: &str,
    index: usize,
    total: usize,
) -> SheetOutcome {
    let started = Instant::now();
    info!("Sheet {}/{}: '{}'", index, total, name);
    if let Some(ref cb) = config.progress_callback {
        cb.on_sheet_start(name, index, total);
    }

    let mut produced: Vec<ExportedImage> = Vec::new();
    let result = match workdir.sheet_dir(index).await {
        Ok(scratch) => {
            let result =
                export_and_publish(config, services, workbook, &scratch, name, &mut produced)
                    .await;
            // Images go whether or not publishing worked.
            remove_files(produced.iter().map(|img| img.path.as_path())).await;
            scratch.remove().await;
            result
        }
        Err(e) => Err(e),
    };

    let status = match result {
        Ok(status) => status,
        Err(e) if e.is_skip() => SheetStatus::Skipped {
            reason: e.to_string(),
        },
        Err(e) => SheetStatus::Failed { error: e },
    };

    match (&status, &config.progress_callback) {
        (SheetStatus::Published { images, .. } | SheetStatus::DryRun { images }, cb) => {
            info!("Sheet '{}': {} images done", name, images);
            if let Some(cb) = cb {
                cb.on_sheet_complete(name, *images);
            }
        }
        (SheetStatus::Skipped { reason }, cb) => {
            warn!("Sheet '{}' skipped: {}", name, reason);
            if let Some(cb) = cb {
                cb.on_sheet_skipped(name, reason);
            }
        }
        (SheetStatus::Failed { error: e }, cb) => {
            error!("Sheet '{}' failed: {}", name, e);
            if let Some(cb) = cb {
                cb.on_sheet_error(name, &e.to_string());
            }
        }
    }

    SheetOutcome {
        sheet: name.to_string(),
        status,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

async fn export_and_publish(
    config: &RunConfig,
    services: &Services,
    workbook: &[SheetProperties],
    scratch: &SheetDir,
    name: &str,
    produced: &mut Vec<ExportedImage>,
) -> Result<SheetStatus, SheetError> {
    let sheets = services.sheets.as_ref();
    let target = resolve_target(sheets, workbook, name, config).await?;
    let caption = read_caption(sheets, name, &config.regions).await?;

    let windows = plan_windows(&target, config);
    if windows.is_empty() {
        return Ok(SheetStatus::Skipped {
            reason: "no data rows".into(),
        });
    }
    debug!("Sheet '{}': {} windows", name, windows.len());

    for (i, window) in windows.iter().enumerate() {
        let image = export_window(config, services, scratch, &target, *window).await?;
        produced.push(image);
        if let Some(ref cb) = config.progress_callback {
            cb.on_window_done(name, i + 1, windows.len());
        }
    }

    if config.dry_run {
        info!("Dry run: not posting {} images for '{}'", produced.len(), name);
        return Ok(SheetStatus::DryRun {
            images: produced.len(),
        });
    }

    let messages = publish_sheet(
        services.chat.as_ref(),
        &config.chat_id,
        produced,
        &caption.full_text(),
    )
    .await?;
    Ok(SheetStatus::Published {
        images: produced.len(),
        messages,
    })
}

/// Windows to export for a sheet under the configured layout.
fn plan_windows(target: &SheetTarget, config: &RunConfig) -> Vec<RowWindow> {
    let last_row = i64::from(target.last_row);
    match config.layout {
        ExportLayout::Album => chunk_rows(last_row, config.max_rows_per_file),
        ExportLayout::Single => chunk_rows(last_row, target.last_row.max(1)),
    }
}

/// Export, write, rasterise one window. The intermediate PDF is removed
/// whatever the rasteriser's verdict.
async fn export_window(
    config: &RunConfig,
    services: &Services,
    scratch: &SheetDir,
    target: &SheetTarget,
    window: RowWindow,
) -> Result<ExportedImage, SheetError> {
    let request = ExportRequest {
        tab_id: target.tab_id,
        range: window_range(&target.name, &config.start_col, &config.end_col, window),
    };
    let pdf_bytes = fetch_with_retry(
        services.exporter.as_ref(),
        services.sleeper.as_ref(),
        &config.retry,
        &request,
    )
    .await?;

    let prefix = scratch.prefix_for(&target.name, Some(window));
    let pdf_path = with_suffix(&prefix, ".pdf");
    tokio::fs::write(&pdf_path, &pdf_bytes)
        .await
        .map_err(|e| SheetError::io(pdf_path.clone(), e))?;

    let rasterized = services.rasterizer.rasterize(&pdf_path, &prefix).await;
    remove_files([pdf_path.as_path()]).await;

    let png = rasterized?;
    debug!("{} → {}", request.range, png.display());
    Ok(ExportedImage::new(png, Some(window)))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(prefix.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}
