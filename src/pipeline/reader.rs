//! Spreadsheet reads: tab ids, caption regions and the last data row.
//!
//! Workbook metadata is fetched once per run; every sheet then costs three
//! value reads (header region, notes region, marker column). Nothing here
//! writes to the spreadsheet.

use crate::auth::TokenSource;
use crate::config::{CellRegions, RunConfig};
use crate::error::{ApiError, SheetError};
use crate::pipeline::caption::CaptionText;
use crate::pipeline::chunk::sheet_range;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Title and tab id of one sheet in the workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

/// A sheet resolved against the workbook and ready for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetTarget {
    /// Display name; also used in A1 ranges and file names.
    pub name: String,
    /// Tab id (`gid`) required by the export endpoint.
    pub tab_id: i64,
    /// Last row with a value in the marker column (≥ 1).
    pub last_row: u32,
}

/// Read-only access to a spreadsheet.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Every sheet's title and tab id.
    async fn sheet_properties(&self) -> Result<Vec<SheetProperties>, ApiError>;

    /// Cell values of an A1 range, row-major, as displayed strings.
    ///
    /// Trailing blank rows and cells are omitted by the API, so rows may be
    /// ragged and the list may be shorter than the range.
    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>, ApiError>;
}

/// Look up a sheet title among the workbook's sheets.
pub fn find_tab_id(sheets: &[SheetProperties], name: &str) -> Option<i64> {
    sheets.iter().find(|s| s.title == name).map(|s| s.sheet_id)
}

/// Scan marker-column rows bottom-up for the last non-blank cell.
///
/// Row numbers are 1-based relative to the first scanned row. Defaults to 1
/// when the column is entirely blank.
pub fn last_populated_row(column: &[Vec<String>]) -> u32 {
    column
        .iter()
        .rposition(|row| row.first().is_some_and(|v| !v.trim().is_empty()))
        .map(|i| i as u32 + 1)
        .unwrap_or(1)
}

/// Resolve a sheet's tab id and data extent.
pub async fn resolve_target(
    api: &dyn SheetsApi,
    sheets: &[SheetProperties],
    name: &str,
    config: &RunConfig,
) -> Result<SheetTarget, SheetError> {
    let tab_id = find_tab_id(sheets, name).ok_or_else(|| SheetError::NotFound {
        sheet: name.to_string(),
    })?;

    let marker_range = sheet_range(
        name,
        &format!(
            "{col}1:{col}{rows}",
            col = config.marker_col,
            rows = config.marker_scan_rows
        ),
    );
    let column = read(api, name, &marker_range).await?;
    let last_row = last_populated_row(&column);
    debug!("Sheet '{}': tab {} last row {}", name, tab_id, last_row);

    Ok(SheetTarget {
        name: name.to_string(),
        tab_id,
        last_row,
    })
}

/// Read both caption regions of a sheet.
pub async fn read_caption(
    api: &dyn SheetsApi,
    name: &str,
    regions: &CellRegions,
) -> Result<CaptionText, SheetError> {
    let header = read(api, name, &sheet_range(name, &regions.header)).await?;
    let notes = read(api, name, &sheet_range(name, &regions.notes)).await?;
    Ok(CaptionText::from_regions(&header, &notes))
}

async fn read(
    api: &dyn SheetsApi,
    sheet: &str,
    range: &str,
) -> Result<Vec<Vec<String>>, SheetError> {
    api.values(range).await.map_err(|e| SheetError::ReadFailed {
        sheet: sheet.to_string(),
        range: range.to_string(),
        detail: e.to_string(),
    })
}

// ── Google Sheets v4 client ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// [`SheetsApi`] over the Google Sheets REST API.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleSheetsClient {
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

    /// `{base}/spreadsheets/{id}/{tail…}` with every segment percent-encoded.
    fn url(&self, tail: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("cannot use '{}' as a base", self.base)))?
            .pop_if_empty()
            .push("spreadsheets")
            .push(&self.spreadsheet_id)
            .extend(tail);
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn sheet_properties(&self) -> Result<Vec<SheetProperties>, ApiError> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let meta: SpreadsheetMeta = self.get(url).await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn values(&self, range: &str) -> Result<Vec<Vec<String>>, ApiError> {
        let url = self.url(&["values", range])?;
        let body: ValueRange = self.get(url).await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
