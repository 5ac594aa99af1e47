//! Caption text assembled from two cell regions of a sheet.
//!
//! The header row becomes one line (cells separated by a space); each row of
//! the notes block becomes `label : value`. Blank cells and blank rows are
//! dropped so a sparsely filled sheet does not produce dangling separators.

use serde::{Deserialize, Serialize};

/// Caption material for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionText {
    /// Single line built from the header region.
    pub header: String,
    /// Multi-line block built from the notes region.
    pub notes: String,
}

impl CaptionText {
    /// Assemble a caption from the raw rows of both regions.
    ///
    /// Only the first row of the header region is used.
    pub fn from_regions(header_rows: &[Vec<String>], notes_rows: &[Vec<String>]) -> Self {
        let header = header_rows
            .first()
            .map(|row| join_cells(row, " "))
            .unwrap_or_default();
        Self {
            header,
            notes: join_rows(notes_rows),
        }
    }

    /// Header and notes separated by a blank line, either omitted when empty.
    pub fn full_text(&self) -> String {
        [self.header.as_str(), self.notes.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.notes.is_empty()
    }
}

/// Join the non-blank cells of a row with `sep`.
pub fn join_cells(cells: &[String], sep: &str) -> String {
    cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// One `a : b` line per non-blank row.
fn join_rows(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| join_cells(row, " : "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
