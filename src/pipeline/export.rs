//! PDF export of a sheet range, with bounded retry on rate limits.
//!
//! ## Retry Strategy
//!
//! The export endpoint answers 429 when a workbook is exported too often in
//! a short span, which a multi-window sheet does by construction. Each 429
//! waits a delay drawn afresh from the policy's range (3–6 s by default) and
//! tries again, up to `max_attempts` requests in total. Any other failure is
//! returned at once. The wait goes through [`Sleeper`] so tests can count
//! and inspect delays without real timers.

use crate::auth::TokenSource;
use crate::config::RetryPolicy;
use crate::error::{ApiError, SheetError};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One export: which tab and which A1 range of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub tab_id: i64,
    /// Sheet-qualified A1 range, e.g. `Jan!F1:AD40`.
    pub range: String,
}

/// Fetches a rendered PDF of a sheet range.
#[async_trait]
pub trait PdfExporter: Send + Sync {
    /// Perform a single request. Retrying is the caller's business.
    async fn fetch_pdf(&self, request: &ExportRequest) -> Result<Vec<u8>, ApiError>;
}

/// Suspends the current task between retry attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Export a range, retrying while the endpoint answers 429.
///
/// ## Return Value
///
/// * `Ok(bytes)` as soon as one attempt succeeds.
/// * [`SheetError::RateLimited`] once `policy.max_attempts` requests were
///   all rate-limited.
/// * [`SheetError::ExportFailed`] on the first non-429 failure.
pub async fn fetch_with_retry(
    exporter: &dyn PdfExporter,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
    request: &ExportRequest,
) -> Result<Vec<u8>, SheetError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match exporter.fetch_pdf(request).await {
            Ok(bytes) => {
                if attempt > 1 {
                    info!("{}: exported after {} attempts", request.range, attempt);
                }
                debug!("{}: {} bytes of PDF", request.range, bytes.len());
                return Ok(bytes);
            }
            Err(e) if e.is_rate_limited() && attempt < max_attempts => {
                let delay = policy.next_delay();
                warn!(
                    "{}: rate-limited (attempt {}/{}), retrying in {}ms",
                    request.range,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_rate_limited() => {
                return Err(SheetError::RateLimited {
                    range: request.range.clone(),
                    attempts: attempt,
                });
            }
            Err(e) => {
                return Err(SheetError::ExportFailed {
                    range: request.range.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }
}

/// Build the export URL for a request.
///
/// Landscape A4, fitted to width, with sheet names, print titles, page
/// numbers and gridlines suppressed.
pub fn export_url(
    base: &Url,
    spreadsheet_id: &str,
    request: &ExportRequest,
) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Transport(format!("cannot use '{base}' as a base")))?
        .pop_if_empty()
        .extend(["spreadsheets", "d", spreadsheet_id, "export"]);
    url.query_pairs_mut()
        .append_pair("format", "pdf")
        .append_pair("portrait", "false")
        .append_pair("size", "A4")
        .append_pair("fitw", "true")
        .append_pair("sheetnames", "false")
        .append_pair("printtitle", "false")
        .append_pair("pagenumbers", "false")
        .append_pair("gridlines", "false")
        .append_pair("gid", &request.tab_id.to_string())
        .append_pair("range", &request.range);
    Ok(url)
}

/// [`PdfExporter`] against the spreadsheet host's export endpoint.
pub struct HttpPdfExporter {
    http: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpPdfExporter {
    pub fn new(
        http: reqwest::Client,
        base: &str,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ApiError> {
        let base = Url::parse(base).map_err(|e| ApiError::Transport(format!("base URL: {e}")))?;
        Ok(Self {
            http,
            base,
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        })
    }
}

#[async_trait]
impl PdfExporter for HttpPdfExporter {
    async fn fetch_pdf(&self, request: &ExportRequest) -> Result<Vec<u8>, ApiError> {
        let url = export_url(&self.base, &self.spreadsheet_id, request)?;
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        debug!("GET export {}", request.range);
        let response = self.http.get(url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        let bytes = response.bytes().await?;

        // An expired session can come back as a 200 HTML page.
        if !bytes.starts_with(b"%PDF") {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(64)]).into_owned();
            return Err(ApiError::Decode(format!("response is not a PDF: {head:?}")));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Fails with the given status `failures` times, then returns a PDF.
    struct FlakyExporter {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl FlakyExporter {
        fn new(failures: u32, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PdfExporter for FlakyExporter {
        async fn fetch_pdf(&self, _request: &ExportRequest) -> Result<Vec<u8>, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ApiError::Status {
                    status: self.status,
                    body: String::new(),
                })
            } else {
                Ok(b"%PDF-1.4".to_vec())
            }
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn request() -> ExportRequest {
        ExportRequest {
            tab_id: 7,
            range: "Jan!F1:AD40".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_k_rate_limits() {
        for k in 0..=4 {
            let exporter = FlakyExporter::new(k, 429);
            let sleeper = RecordingSleeper::default();
            let result =
                fetch_with_retry(&exporter, &sleeper, &RetryPolicy::default(), &request()).await;
            assert_ok!(result);
            assert_eq!(exporter.calls(), k + 1, "k = {k}");
            assert_eq!(sleeper.delays.lock().unwrap().len() as u32, k);
        }
    }

    #[tokio::test]
    async fn gives_up_after_five_attempts() {
        let exporter = FlakyExporter::new(u32::MAX, 429);
        let sleeper = RecordingSleeper::default();
        let err = fetch_with_retry(&exporter, &sleeper, &RetryPolicy::default(), &request())
            .await
            .unwrap_err();
        assert_eq!(exporter.calls(), 5);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 4);
        assert!(matches!(err, SheetError::RateLimited { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let exporter = FlakyExporter::new(1, 500);
        let sleeper = RecordingSleeper::default();
        let result =
            fetch_with_retry(&exporter, &sleeper, &RetryPolicy::default(), &request()).await;
        let err = assert_err!(result);
        assert_eq!(exporter.calls(), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
        assert!(matches!(err, SheetError::ExportFailed { .. }));
    }

    #[tokio::test]
    async fn every_delay_is_drawn_from_the_policy_range() {
        let exporter = FlakyExporter::new(4, 429);
        let sleeper = RecordingSleeper::default();
        fetch_with_retry(&exporter, &sleeper, &RetryPolicy::default(), &request())
            .await
            .unwrap();
        for d in sleeper.delays.lock().unwrap().iter() {
            assert!(*d >= Duration::from_millis(3000) && *d < Duration::from_millis(6000));
        }
    }

    #[test]
    fn url_carries_the_print_options() {
        let base = Url::parse("https://docs.google.com/").unwrap();
        let url = export_url(&base, "sheet-123", &request()).unwrap();
        assert_eq!(url.path(), "/spreadsheets/d/sheet-123/export");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let expected = [
            ("format", "pdf"),
            ("portrait", "false"),
            ("size", "A4"),
            ("fitw", "true"),
            ("sheetnames", "false"),
            ("printtitle", "false"),
            ("pagenumbers", "false"),
            ("gridlines", "false"),
            ("gid", "7"),
            ("range", "Jan!F1:AD40"),
        ];
        assert_eq!(pairs.len(), expected.len());
        for ((k, v), (ek, ev)) in pairs.iter().zip(expected) {
            assert_eq!((k.as_str(), v.as_str()), (ek, ev));
        }
        // The range is encoded, never sent raw.
        assert!(!url.query().unwrap().contains("Jan!F1:AD40"));
    }
}
