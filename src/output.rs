//! Run results: one outcome per sheet plus aggregate stats.

use crate::error::{SheetError, SheetcastError};
use serde::{Deserialize, Serialize};

/// What happened to one sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SheetStatus {
    /// Images and caption were posted.
    Published { images: usize, messages: usize },
    /// Images were produced but posting was disabled.
    DryRun { images: usize },
    /// Nothing to do for this sheet.
    Skipped { reason: String },
    /// The sheet failed part-way; later sheets still ran.
    Failed { error: SheetError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetOutcome {
    pub sheet: String,
    #[serde(flatten)]
    pub status: SheetStatus,
    pub duration_ms: u64,
}

impl SheetOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, SheetStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&SheetError> {
        match &self.status {
            SheetStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_sheets: usize,
    pub published_sheets: usize,
    pub skipped_sheets: usize,
    pub failed_sheets: usize,
    /// Images produced across all sheets (posted or not).
    pub total_images: usize,
    pub total_duration_ms: u64,
}

/// Everything a run did, in configured sheet order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub sheets: Vec<SheetOutcome>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn new(sheets: Vec<SheetOutcome>, total_duration_ms: u64) -> Self {
        let mut stats = RunStats {
            total_sheets: sheets.len(),
            total_duration_ms,
            ..Default::default()
        };
        for outcome in &sheets {
            match &outcome.status {
                SheetStatus::Published { images, .. } => {
                    stats.published_sheets += 1;
                    stats.total_images += images;
                }
                SheetStatus::DryRun { images } => {
                    stats.published_sheets += 1;
                    stats.total_images += images;
                }
                SheetStatus::Skipped { .. } => stats.skipped_sheets += 1,
                SheetStatus::Failed { .. } => stats.failed_sheets += 1,
            }
        }
        Self { sheets, stats }
    }

    pub fn has_failures(&self) -> bool {
        self.stats.failed_sheets > 0
    }

    /// Treat any failed sheet as an error for the whole run.
    pub fn into_result(self) -> Result<Self, SheetcastError> {
        if self.has_failures() {
            Err(SheetcastError::PartialFailure {
                failed: self.stats.failed_sheets,
                total: self.stats.total_sheets,
            })
        } else {
            Ok(self)
        }
    }
}
