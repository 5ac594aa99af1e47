//! Whole-run integration tests.
//!
//! Every remote collaborator is replaced by an in-memory double, so these
//! run without network access or poppler installed. The exporter double
//! answers with the requested range as the "PDF" body and the rasteriser
//! double copies that into a real file, so every posted image can be traced
//! back to its sheet and window, and cleanup can be observed on disk.

use async_trait::async_trait;
use sheetcast::pipeline::chunk::sheet_range;
use sheetcast::pipeline::export::{ExportRequest, PdfExporter, Sleeper};
use sheetcast::pipeline::publish::{Attachment, ChatApi, MediaItem};
use sheetcast::pipeline::rasterize::{png_path, Rasterizer};
use sheetcast::pipeline::reader::{SheetProperties, SheetsApi};
use sheetcast::{
    run_with, ApiError, ExportLayout, RunConfig, RunProgressCallback, RunReport, Services,
    SheetError, SheetStatus, SheetcastError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ── Doubles ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSheets {
    tabs: Vec<SheetProperties>,
    values: HashMap<String, Vec<Vec<String>>>,
    metadata_down: bool,
}

impl FakeSheets {
    fn tab(mut self, title: &str, id: i64) -> Self {
        self.tabs.push(SheetProperties {
            sheet_id: id,
            title: title.to_string(),
        });
        self
    }

    fn cells(mut self, range: &str, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        self.values.insert(range.to_string(), rows);
        self
    }

    /// Marker column populated in rows 1..=last.
    fn marker_through(self, sheet: &str, last: usize) -> Self {
        let rows: Vec<Vec<String>> = (1..=last).map(|i| vec![i.to_string()]).collect();
        let mut s = self;
        s.values.insert(sheet_range(sheet, "K1:K2000"), rows);
        s
    }
}

#[async_trait]
impl SheetsApi for FakeSheets {
    async fn sheet_properties(&self) -> Result<Vec<SheetProperties>, ApiError> {
        if self.metadata_down {
            return Err(ApiError::Status {
                status: 403,
                body: "forbidden".into(),
            });
        }
        Ok(self.tabs.clone())
    }

    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>, ApiError> {
        Ok(self.values.get(range).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeExporter {
    calls: Mutex<Vec<ExportRequest>>,
    /// Ranges starting with this prefix answer HTTP 500.
    broken_prefix: Option<String>,
    /// Number of leading 429 answers before any success.
    rate_limited: AtomicUsize,
}

#[async_trait]
impl PdfExporter for FakeExporter {
    async fn fetch_pdf(&self, request: &ExportRequest) -> Result<Vec<u8>, ApiError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(ref prefix) = self.broken_prefix {
            if request.range.starts_with(prefix.as_str()) {
                return Err(ApiError::Status {
                    status: 500,
                    body: "backend error".into(),
                });
            }
        }
        if self
            .rate_limited
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Status {
                status: 429,
                body: String::new(),
            });
        }
        Ok(format!("%PDF {}", request.range).into_bytes())
    }
}

#[derive(Default)]
struct FakeRasterizer {
    calls: Mutex<Vec<PathBuf>>,
    written: Mutex<Vec<PathBuf>>,
    /// Zero-based call that exits like a crashed tool.
    fail_on_call: Option<usize>,
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(&self, pdf: &Path, out_prefix: &Path) -> Result<PathBuf, SheetError> {
        let body = std::fs::read(pdf).expect("PDF must be on disk while rasterising");
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(pdf.to_path_buf());
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            return Err(SheetError::ConversionFailed {
                pdf: pdf.to_path_buf(),
                detail: "exit status: 1".into(),
            });
        }
        // Let other sheets interleave between writing the PDF and the PNG.
        tokio::task::yield_now().await;
        let png = png_path(out_prefix);
        std::fs::write(&png, body).unwrap();
        self.written.lock().unwrap().push(png.clone());
        Ok(png)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ChatCall {
    Album { items: usize },
    Photo { caption: Option<String> },
    Text(String),
}

#[derive(Default)]
struct FakeChat {
    calls: Mutex<Vec<ChatCall>>,
    /// Contents of every posted image, one list per album.
    albums: Mutex<Vec<Vec<String>>>,
    reject_albums: bool,
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn send_media_group(
        &self,
        _chat_id: &str,
        media: &[MediaItem],
        attachments: &[Attachment],
    ) -> Result<(), ApiError> {
        assert_eq!(media.len(), attachments.len());
        if self.reject_albums {
            return Err(ApiError::Status {
                status: 400,
                body: "Bad Request: group send failed".into(),
            });
        }
        let posted = attachments
            .iter()
            .map(|a| std::fs::read_to_string(&a.path).unwrap_or_else(|e| format!("MISSING {e}")))
            .collect();
        self.albums.lock().unwrap().push(posted);
        self.calls.lock().unwrap().push(ChatCall::Album {
            items: attachments.len(),
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat_id: &str,
        _photo: &Attachment,
        caption: Option<&str>,
    ) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(ChatCall::Photo {
            caption: caption.map(str::to_string),
        });
        Ok(())
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(ChatCall::Text(text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct CountingSleeper {
    sleeps: AtomicUsize,
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    exporter: Arc<FakeExporter>,
    rasterizer: Arc<FakeRasterizer>,
    chat: Arc<FakeChat>,
    sleeper: Arc<CountingSleeper>,
    services: Services,
}

impl Harness {
    fn new(sheets: FakeSheets, exporter: FakeExporter) -> Self {
        Self::with(sheets, exporter, FakeRasterizer::default(), FakeChat::default())
    }

    fn with(
        sheets: FakeSheets,
        exporter: FakeExporter,
        rasterizer: FakeRasterizer,
        chat: FakeChat,
    ) -> Self {
        init_tracing();
        let exporter = Arc::new(exporter);
        let rasterizer = Arc::new(rasterizer);
        let chat = Arc::new(chat);
        let sleeper = Arc::new(CountingSleeper::default());
        let services = Services {
            sheets: Arc::new(sheets),
            exporter: exporter.clone(),
            rasterizer: rasterizer.clone(),
            chat: chat.clone(),
            sleeper: sleeper.clone(),
        };
        Self {
            exporter,
            rasterizer,
            chat,
            sleeper,
            services,
        }
    }

    fn ranges(&self) -> Vec<String> {
        self.exporter
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.range.clone())
            .collect()
    }

    fn chat_calls(&self) -> Vec<ChatCall> {
        self.chat.calls.lock().unwrap().clone()
    }

    /// Every file the run created, PDFs and PNGs alike.
    fn scratch_files(&self) -> Vec<PathBuf> {
        let pdfs = self.rasterizer.calls.lock().unwrap().clone();
        let pngs = self.rasterizer.written.lock().unwrap().clone();
        pdfs.into_iter().chain(pngs).collect()
    }

    fn assert_scratch_removed(&self) {
        let files = self.scratch_files();
        assert!(!files.is_empty());
        for path in &files {
            assert!(!path.exists(), "{} left behind", path.display());
            let sheet_dir = path.parent().unwrap();
            assert!(!sheet_dir.exists(), "{} left behind", sheet_dir.display());
            let run_dir = sheet_dir.parent().unwrap();
            assert!(!run_dir.exists(), "{} left behind", run_dir.display());
        }
    }

    async fn run(&self, config: &RunConfig) -> RunReport {
        assert_ok!(run_with(config, &self.services).await)
    }
}

fn config(sheets: &[&str]) -> RunConfig {
    RunConfig::builder()
        .spreadsheet_id("workbook")
        .sheet_names(sheets.iter().copied())
        .chat_id("-100123")
        .max_rows_per_file(40)
        .build()
        .unwrap()
}

fn jan_workbook() -> FakeSheets {
    FakeSheets::default()
        .tab("Jan", 11)
        .marker_through("Jan", 53)
        .cells("Jan!F5:J5", &[&["Payroll", "", "January"]])
        .cells("Jan!A4:B20", &[&["Note", "paid on the 5th"], &[], &["Bonus", ""]])
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fifty_three_rows_become_two_windows_and_one_album() {
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    let report = h.run(&config(&["Jan"])).await;

    assert_eq!(h.ranges(), vec!["Jan!F1:AD40", "Jan!F41:AD53"]);
    assert!(h
        .exporter
        .calls
        .lock()
        .unwrap()
        .iter()
        .all(|r| r.tab_id == 11));
    assert_eq!(h.rasterizer.calls.lock().unwrap().len(), 2);
    assert_eq!(
        h.chat_calls(),
        vec![
            ChatCall::Album { items: 2 },
            ChatCall::Text("Payroll January\n\nNote : paid on the 5th\nBonus".into()),
        ]
    );

    assert!(!report.has_failures());
    assert!(matches!(
        report.sheets[0].status,
        SheetStatus::Published {
            images: 2,
            messages: 2
        }
    ));
}

#[tokio::test]
async fn empty_marker_column_exports_a_single_row() {
    let sheets = FakeSheets::default()
        .tab("Jan", 11)
        .cells("Jan!F5:J5", &[&["Header"]]);
    let h = Harness::new(sheets, FakeExporter::default());
    h.run(&config(&["Jan"])).await;

    assert_eq!(h.ranges(), vec!["Jan!F1:AD1"]);
    assert_eq!(
        h.chat_calls(),
        vec![ChatCall::Photo {
            caption: Some("Header".into())
        }]
    );
}

#[tokio::test]
async fn missing_sheet_is_skipped_and_the_rest_still_run() {
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    let report = h.run(&config(&["Feb", "Jan"])).await;

    assert!(matches!(report.sheets[0].status, SheetStatus::Skipped { .. }));
    assert!(matches!(report.sheets[1].status, SheetStatus::Published { .. }));
    assert_eq!(report.stats.skipped_sheets, 1);
    assert!(!h.ranges().iter().any(|r| r.starts_with("Feb")));
    assert_ok!(report.into_result());
}

#[tokio::test]
async fn a_failing_sheet_does_not_stop_the_next_one() {
    let sheets = jan_workbook().tab("Feb", 12).marker_through("Feb", 10);
    let exporter = FakeExporter {
        broken_prefix: Some("Feb!".into()),
        ..Default::default()
    };
    let h = Harness::new(sheets, exporter);
    let report = h.run(&config(&["Feb", "Jan"])).await;

    assert!(matches!(
        report.sheets[0].error(),
        Some(SheetError::ExportFailed { .. })
    ));
    assert!(matches!(report.sheets[1].status, SheetStatus::Published { .. }));
    // The 500 is not retried.
    assert_eq!(h.sleeper.sleeps.load(Ordering::SeqCst), 0);

    let err = assert_err!(report.into_result());
    assert!(matches!(
        err,
        SheetcastError::PartialFailure {
            failed: 1,
            total: 2
        }
    ));
}

#[tokio::test]
async fn rate_limits_are_waited_out() {
    let exporter = FakeExporter {
        rate_limited: AtomicUsize::new(3),
        ..Default::default()
    };
    let h = Harness::new(jan_workbook(), exporter);
    let report = h.run(&config(&["Jan"])).await;

    assert!(!report.has_failures());
    assert_eq!(h.sleeper.sleeps.load(Ordering::SeqCst), 3);
    // Three rejected attempts at the first window, then one each.
    assert_eq!(h.ranges().len(), 5);
}

#[tokio::test]
async fn exhausted_retries_fail_the_sheet() {
    let exporter = FakeExporter {
        rate_limited: AtomicUsize::new(usize::MAX),
        ..Default::default()
    };
    let h = Harness::new(jan_workbook(), exporter);
    let report = h.run(&config(&["Jan"])).await;

    assert!(matches!(
        report.sheets[0].error(),
        Some(SheetError::RateLimited { attempts: 5, .. })
    ));
    assert_eq!(h.ranges().len(), 5);
    assert_eq!(h.sleeper.sleeps.load(Ordering::SeqCst), 4);
    assert!(h.chat_calls().is_empty());
}

#[tokio::test]
async fn empty_caption_sends_no_text_message() {
    let sheets = FakeSheets::default().tab("Jan", 11).marker_through("Jan", 80);
    let h = Harness::new(sheets, FakeExporter::default());
    h.run(&config(&["Jan"])).await;

    assert_eq!(h.chat_calls(), vec![ChatCall::Album { items: 2 }]);
}

#[tokio::test]
async fn temporary_files_are_removed() {
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    h.run(&config(&["Jan"])).await;

    assert_eq!(h.rasterizer.written.lock().unwrap().len(), 2);
    h.assert_scratch_removed();
}

#[tokio::test]
async fn rejected_album_still_removes_every_file() {
    let chat = FakeChat {
        reject_albums: true,
        ..Default::default()
    };
    let h = Harness::with(
        jan_workbook(),
        FakeExporter::default(),
        FakeRasterizer::default(),
        chat,
    );
    let report = h.run(&config(&["Jan"])).await;

    assert!(matches!(
        report.sheets[0].error(),
        Some(SheetError::PublishFailed { .. })
    ));
    assert!(h.chat_calls().is_empty());
    assert_eq!(h.rasterizer.written.lock().unwrap().len(), 2);
    h.assert_scratch_removed();
}

#[tokio::test]
async fn failed_conversion_of_a_later_window_removes_every_file() {
    let rasterizer = FakeRasterizer {
        fail_on_call: Some(1),
        ..Default::default()
    };
    let h = Harness::with(
        jan_workbook(),
        FakeExporter::default(),
        rasterizer,
        FakeChat::default(),
    );
    let report = h.run(&config(&["Jan"])).await;

    assert!(matches!(
        report.sheets[0].error(),
        Some(SheetError::ConversionFailed { .. })
    ));
    assert_eq!(h.rasterizer.calls.lock().unwrap().len(), 2);
    assert_eq!(h.rasterizer.written.lock().unwrap().len(), 1);
    assert!(h.chat_calls().is_empty());
    h.assert_scratch_removed();
}

#[tokio::test]
async fn single_layout_posts_one_photo_with_the_caption() {
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    let config = RunConfig {
        layout: ExportLayout::Single,
        ..config(&["Jan"])
    };
    h.run(&config).await;

    assert_eq!(h.ranges(), vec!["Jan!F1:AD53"]);
    assert_eq!(
        h.chat_calls(),
        vec![ChatCall::Photo {
            caption: Some("Payroll January\n\nNote : paid on the 5th\nBonus".into())
        }]
    );
}

#[tokio::test]
async fn dry_run_posts_nothing() {
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    let config = RunConfig {
        dry_run: true,
        ..config(&["Jan"])
    };
    let report = h.run(&config).await;

    assert!(h.chat_calls().is_empty());
    assert!(matches!(report.sheets[0].status, SheetStatus::DryRun { images: 2 }));
    assert_eq!(report.stats.total_images, 2);
}

#[tokio::test]
async fn titles_are_quoted_for_reads_but_not_for_exports() {
    let sheets = FakeSheets::default()
        .tab("March 2024", 7)
        .cells("'March 2024'!K1:K2000", &[&["x"], &["y"]]);
    let h = Harness::new(sheets, FakeExporter::default());
    h.run(&config(&["March 2024"])).await;

    assert_eq!(h.ranges(), vec!["March 2024!F1:AD2"]);
}

#[tokio::test]
async fn concurrent_sheets_keep_their_order() {
    let sheets = jan_workbook()
        .tab("Feb", 12)
        .marker_through("Feb", 100)
        .tab("Mar", 13)
        .marker_through("Mar", 45);
    let h = Harness::new(sheets, FakeExporter::default());
    let config = RunConfig {
        concurrency: 2,
        ..config(&["Jan", "Feb", "Missing", "Mar"])
    };
    let report = h.run(&config).await;

    let order: Vec<&str> = report.sheets.iter().map(|o| o.sheet.as_str()).collect();
    assert_eq!(order, vec!["Jan", "Feb", "Missing", "Mar"]);
    assert!(matches!(report.sheets[2].status, SheetStatus::Skipped { .. }));

    let ranges = h.ranges();
    let for_sheet = |prefix: &str| -> Vec<String> {
        ranges
            .iter()
            .filter(|r| r.starts_with(prefix))
            .cloned()
            .collect()
    };
    assert_eq!(for_sheet("Jan!"), vec!["Jan!F1:AD40", "Jan!F41:AD53"]);
    assert_eq!(
        for_sheet("Feb!"),
        vec!["Feb!F1:AD40", "Feb!F41:AD80", "Feb!F81:AD100"]
    );
    assert_eq!(for_sheet("Mar!"), vec!["Mar!F1:AD40", "Mar!F41:AD45"]);
    h.assert_scratch_removed();
}

#[tokio::test]
async fn concurrent_sheets_with_colliding_file_names_post_their_own_images() {
    let sheets = FakeSheets::default()
        .tab("A/B", 1)
        .marker_through("A/B", 60)
        .tab("A:B", 2)
        .marker_through("A:B", 60);
    let h = Harness::new(sheets, FakeExporter::default());
    let config = RunConfig {
        concurrency: 2,
        ..config(&["A/B", "A:B"])
    };
    let report = h.run(&config).await;

    assert!(!report.has_failures());
    let mut albums = h.chat.albums.lock().unwrap().clone();
    albums.sort();
    assert_eq!(
        albums,
        vec![
            vec!["%PDF A/B!F1:AD40".to_string(), "%PDF A/B!F41:AD60".to_string()],
            vec!["%PDF A:B!F1:AD40".to_string(), "%PDF A:B!F41:AD60".to_string()],
        ]
    );
    h.assert_scratch_removed();
}

#[tokio::test]
async fn metadata_failure_aborts_the_run() {
    let sheets = FakeSheets {
        metadata_down: true,
        ..Default::default()
    };
    let h = Harness::new(sheets, FakeExporter::default());
    let err = assert_err!(run_with(&config(&["Jan"]), &h.services).await);

    assert!(matches!(err, SheetcastError::MetadataFailed { .. }));
    assert!(h.ranges().is_empty());
}

#[tokio::test]
async fn progress_events_follow_the_run() {
    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl RunProgressCallback for Events {
        fn on_run_start(&self, total: usize) {
            self.0.lock().unwrap().push(format!("start {total}"));
        }
        fn on_window_done(&self, sheet: &str, window: usize, total: usize) {
            self.0.lock().unwrap().push(format!("{sheet} {window}/{total}"));
        }
        fn on_sheet_complete(&self, sheet: &str, images: usize) {
            self.0.lock().unwrap().push(format!("{sheet} done {images}"));
        }
        fn on_sheet_skipped(&self, sheet: &str, _reason: &str) {
            self.0.lock().unwrap().push(format!("{sheet} skipped"));
        }
        fn on_run_complete(&self, total: usize, ok: usize) {
            self.0.lock().unwrap().push(format!("end {ok}/{total}"));
        }
    }

    let events = Arc::new(Events::default());
    let config = RunConfig {
        progress_callback: Some(events.clone()),
        ..config(&["Jan", "Feb"])
    };
    let h = Harness::new(jan_workbook(), FakeExporter::default());
    h.run(&config).await;

    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            "start 2",
            "Jan 1/2",
            "Jan 2/2",
            "Jan done 2",
            "Feb skipped",
            "end 1/2"
        ]
    );
}
