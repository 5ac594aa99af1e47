//! CLI binary for sheetcast.
//!
//! A thin shim over the library crate that maps CLI flags (and the
//! environment variables behind them) to `RunConfig` and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sheetcast::{
    run, CellRegions, Credentials, ExportLayout, ProgressCallback, RetryPolicy, RunConfig,
    RunProgressCallback, RunReport, SheetStatus,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over sheets, one log line per sheet.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading workbook…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} sheets  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Publishing");
        self.bar.reset_eta();
    }

    fn elapsed(&self, sheet: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(sheet))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_sheets: usize) {
        self.activate_bar(total_sheets);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_sheets} sheets…"))
        ));
    }

    fn on_sheet_start(&self, sheet: &str, _index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(sheet.to_string(), Instant::now());
        }
        self.bar.set_message(sheet.to_string());
    }

    fn on_window_done(&self, sheet: &str, window: usize, total_windows: usize) {
        self.bar
            .set_message(format!("{sheet}  window {window}/{total_windows}"));
    }

    fn on_sheet_complete(&self, sheet: &str, images: usize) {
        self.bar.println(format!(
            "  {} {:<20}  {}  {}",
            green("✓"),
            sheet,
            dim(&format!("{images:>3} images")),
            self.elapsed(sheet),
        ));
        self.bar.inc(1);
    }

    fn on_sheet_skipped(&self, sheet: &str, reason: &str) {
        self.bar.println(format!(
            "  {} {:<20}  {}  {}",
            yellow("–"),
            sheet,
            dim(reason),
            self.elapsed(sheet),
        ));
        self.bar.inc(1);
    }

    fn on_sheet_error(&self, sheet: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<20}  {}  {}",
            red("✗"),
            sheet,
            red(&msg),
            self.elapsed(sheet),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_sheets: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {}/{} sheets published",
                green("✔"),
                bold(&succeeded.to_string()),
                total_sheets
            );
        } else {
            eprintln!(
                "{} {}/{} sheets published  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_sheets,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Post two month tabs, 40 rows per image
  sheetcast --spreadsheet-id 1AbC… --sheets Jan,Feb --chat-id -100123456

  # Everything from the environment (same variables as the cron job)
  SPREADSHEET_ID=1AbC… SHEET_NAMES=Jan,Feb TELEGRAM_CHAT_ID=-100123456 \
  TELEGRAM_BOT_TOKEN=123:abc GOOGLE_SERVICE_ACCOUNT_JSON="$(cat sa.json)" sheetcast

  # One image per sheet instead of an album
  sheetcast --layout single --sheets Summary

  # Produce images without posting; print the report as JSON
  sheetcast --dry-run --json

ENVIRONMENT VARIABLES:
  SPREADSHEET_ID               Workbook id
  SHEET_NAMES                  Comma-separated sheet titles
  MAX_ROWS_PER_FILE            Rows per image (default 40)
  TELEGRAM_BOT_TOKEN           Bot API token
  TELEGRAM_CHAT_ID             Destination chat
  GOOGLE_SERVICE_ACCOUNT_JSON  Service-account key (JSON text or a path to it)
  GOOGLE_ACCESS_TOKEN          Pre-issued OAuth token (instead of a key)
  RUST_LOG                     Override log filter

SETUP:
  1. Share the spreadsheet with the service account's client_email.
  2. Add the bot to the chat with permission to post.
  3. Install poppler-utils so `pdftoppm` is on PATH.
"#;

/// Export spreadsheet ranges as images and post them to a Telegram chat.
#[derive(Parser, Debug)]
#[command(
    name = "sheetcast",
    version,
    about = "Export spreadsheet ranges as images and post them to a Telegram chat",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Spreadsheet (workbook) id.
    #[arg(long, env = "SPREADSHEET_ID")]
    spreadsheet_id: String,

    /// Sheet titles to process, comma-separated.
    #[arg(long = "sheets", env = "SHEET_NAMES", value_delimiter = ',', required = true)]
    sheet_names: Vec<String>,

    /// Maximum rows per exported image.
    #[arg(long, env = "MAX_ROWS_PER_FILE", default_value_t = 40,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_rows_per_file: u32,

    /// First exported column.
    #[arg(long, env = "START_COL", default_value = "F")]
    start_col: String,

    /// Last exported column.
    #[arg(long, env = "END_COL", default_value = "AD")]
    end_col: String,

    /// Column scanned bottom-up for the last data row.
    #[arg(long, env = "MARKER_COL", default_value = "K")]
    marker_col: String,

    /// Header cells joined into the caption's first line.
    #[arg(long, default_value = "F5:J5")]
    header_range: String,

    /// Notes block appended to the caption.
    #[arg(long, default_value = "A4:B20")]
    notes_range: String,

    /// Destination chat id.
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    chat_id: String,

    /// Bot API token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Service-account key: JSON text, or a path to the key file.
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_JSON", hide_env_values = true)]
    service_account: Option<String>,

    /// Pre-issued OAuth access token (used when no key is given).
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// album: one image per row window; single: one image per sheet.
    #[arg(long, value_enum, default_value = "album")]
    layout: LayoutArg,

    /// Rasterisation DPI (72–400).
    #[arg(long, env = "SHEETCAST_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Rasteriser executable.
    #[arg(long, env = "SHEETCAST_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// Export attempts per window when rate-limited.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Sheets processed at once.
    #[arg(short, long, env = "SHEETCAST_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = 120)]
    http_timeout: u64,

    /// Export and rasterise, but post nothing.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHEETCAST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LayoutArg {
    Album,
    Single,
}

impl From<LayoutArg> for ExportLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::Album => ExportLayout::Album,
            LayoutArg::Single => ExportLayout::Single,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RunProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = run(&config).await.context("Run failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        print_summary(&report);
    }

    report.into_result().context("Some sheets failed")?;
    Ok(())
}

/// Map CLI args to `RunConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RunConfig> {
    let credentials = match (&cli.service_account, &cli.access_token) {
        (Some(key), _) => Some(Credentials::ServiceAccountJson(load_key(key).await?)),
        (None, Some(token)) => Some(Credentials::AccessToken(token.clone())),
        (None, None) => None,
    }
    .context("No Google credentials: set GOOGLE_SERVICE_ACCOUNT_JSON or GOOGLE_ACCESS_TOKEN")?;

    let mut builder = RunConfig::builder()
        .spreadsheet_id(&cli.spreadsheet_id)
        .sheet_names(&cli.sheet_names)
        .max_rows_per_file(cli.max_rows_per_file)
        .columns(&cli.start_col, &cli.end_col)
        .marker_col(&cli.marker_col)
        .regions(CellRegions {
            header: cli.header_range.clone(),
            notes: cli.notes_range.clone(),
        })
        .chat_id(&cli.chat_id)
        .credentials(credentials)
        .layout(cli.layout.clone().into())
        .retry(RetryPolicy {
            max_attempts: cli.max_attempts,
            ..RetryPolicy::default()
        })
        .dpi(cli.dpi)
        .rasterizer_program(&cli.pdftoppm)
        .http_timeout_secs(cli.http_timeout)
        .concurrency(cli.concurrency)
        .dry_run(cli.dry_run);

    if let Some(ref token) = cli.bot_token {
        builder = builder.bot_token(token);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Key material is either the JSON itself or a path to it.
async fn load_key(value: &str) -> Result<String> {
    if value.trim_start().starts_with('{') {
        return Ok(value.to_string());
    }
    tokio::fs::read_to_string(value)
        .await
        .with_context(|| format!("Failed to read service-account key from {value:?}"))
}

fn print_summary(report: &RunReport) {
    for outcome in &report.sheets {
        let line = match &outcome.status {
            SheetStatus::Published { images, messages } => {
                format!("{} {}: {images} images, {messages} messages", green("✓"), outcome.sheet)
            }
            SheetStatus::DryRun { images } => {
                format!("{} {}: {images} images (dry run)", green("✓"), outcome.sheet)
            }
            SheetStatus::Skipped { reason } => {
                format!("{} {}: skipped ({reason})", yellow("–"), outcome.sheet)
            }
            SheetStatus::Failed { error } => format!("{} {}: {error}", red("✗"), outcome.sheet),
        };
        eprintln!("{line}");
    }
    eprintln!(
        "Published {}/{} sheets, {} images in {}ms",
        report.stats.published_sheets,
        report.stats.total_sheets,
        report.stats.total_images,
        report.stats.total_duration_ms
    );
}
