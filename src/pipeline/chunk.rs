//! Row windows and A1 range strings.
//!
//! A sheet with hundreds of rows rendered onto one landscape page shrinks
//! to unreadable print. Splitting the data rows into fixed windows keeps each
//! exported page legible; the windows are later reassembled, in order, into
//! one album.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static COLUMN_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,3}$").unwrap());
static PLAIN_SHEET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// A contiguous, inclusive, 1-indexed row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWindow {
    pub start: u32,
    pub end: u32,
}

impl RowWindow {
    /// Number of rows covered.
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Windows always cover at least one row.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for RowWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split rows `1..=last_row` into windows of at most `max_rows` rows.
///
/// The last window is clipped to `last_row`. Returns nothing when
/// `last_row < 1` or `max_rows == 0`.
pub fn chunk_rows(last_row: i64, max_rows: u32) -> Vec<RowWindow> {
    if last_row < 1 || max_rows == 0 {
        return Vec::new();
    }
    let last = u32::try_from(last_row).unwrap_or(u32::MAX);
    let mut windows = Vec::with_capacity(last.div_ceil(max_rows) as usize);
    let mut start = 1u32;
    loop {
        let end = start.saturating_add(max_rows - 1).min(last);
        windows.push(RowWindow { start, end });
        if end >= last {
            break;
        }
        start = end + 1;
    }
    windows
}

/// `true` for 1–3 upper-case letters (`A` … `ZZZ`).
pub fn is_column_letters(col: &str) -> bool {
    COLUMN_LETTERS.is_match(col)
}

/// 1-based index of a column label: `A` → 1, `Z` → 26, `AD` → 30.
pub fn column_index(col: &str) -> u32 {
    col.bytes()
        .filter(u8::is_ascii_alphabetic)
        .fold(0, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1))
}

/// Prefix a sheet title for use in an A1 range.
///
/// Titles that are not plain identifiers (spaces, punctuation, non-ASCII)
/// are single-quoted with embedded quotes doubled, as the Sheets API expects.
pub fn quote_sheet_name(sheet: &str) -> String {
    if PLAIN_SHEET_NAME.is_match(sheet) {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

/// `"<sheet>!<range>"` for a bare range such as `F5:J5`.
pub fn sheet_range(sheet: &str, range: &str) -> String {
    format!("{}!{}", quote_sheet_name(sheet), range)
}

/// `"<sheet>!<startCol><start>:<endCol><end>"` for one window, as the export
/// endpoint's `range` parameter takes it: the title is passed verbatim, not
/// A1-quoted.
pub fn window_range(sheet: &str, start_col: &str, end_col: &str, window: RowWindow) -> String {
    format!(
        "{sheet}!{start_col}{}:{end_col}{}",
        window.start, window.end
    )
}
