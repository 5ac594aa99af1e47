//! Scoped temporary directory for intermediate PDFs and PNGs.
//!
//! One `WorkDir` lives for the whole run. Each sheet gets its own
//! [`SheetDir`] inside it, so sheets processed side by side never share a
//! file even when their titles sanitise to the same stem. A sheet's files
//! and subdirectory are removed as soon as the sheet is done; the run
//! directory goes at the end of the run, or on drop if the run unwinds
//! early. Removal failures are logged, never raised.

use crate::error::{SheetError, SheetcastError};
use crate::pipeline::chunk::RowWindow;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create `sheetcast-XXXXXX` under the system temp directory.
    pub fn create() -> Result<Self, SheetcastError> {
        Self::create_in(std::env::temp_dir())
    }

    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self, SheetcastError> {
        let dir = tempfile::Builder::new()
            .prefix("sheetcast-")
            .tempdir_in(parent)
            .map_err(|source| SheetcastError::WorkDir { source })?;
        debug!("Working directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create the private subdirectory of the sheet at `index` (1-based
    /// position in the configured list).
    pub async fn sheet_dir(&self, index: usize) -> Result<SheetDir, SheetError> {
        let path = self.dir.path().join(format!("sheet-{index:03}"));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| SheetError::io(path.clone(), e))?;
        Ok(SheetDir { path })
    }

    /// Remove the directory and everything left in it.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Scratch space of one sheet.
#[derive(Debug)]
pub struct SheetDir {
    path: PathBuf,
}

impl SheetDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path prefix (no extension) for one export of the sheet:
    /// `<sheet>_<start>-<end>` or `<sheet>_all`.
    pub fn prefix_for(&self, sheet: &str, window: Option<RowWindow>) -> PathBuf {
        let stem = match window {
            Some(w) => format!("{}_{}", file_safe(sheet), w),
            None => format!("{}_all", file_safe(sheet)),
        };
        self.path.join(stem)
    }

    /// Remove the subdirectory with whatever is left in it.
    pub async fn remove(self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

/// Delete files, logging (not failing) on anything but "already gone".
pub async fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

/// Replace path separators and other characters file systems reject.
pub fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "sheet".to_string()
    } else {
        trimmed.to_string()
    }
}
