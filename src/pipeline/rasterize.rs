//! PDF → trimmed PNG via an external rasteriser.
//!
//! `pdftoppm -png -singlefile -r <dpi> <pdf> <prefix>` writes exactly one
//! file, `<prefix>.png`, from the first page. The exported page carries wide
//! white margins (A4 paper around a handful of rows), so the PNG is then
//! cropped to the bounding box of everything that differs from the corner
//! colour and written back over itself.
//!
//! ## Why spawn_blocking?
//!
//! Decoding and re-encoding a 150-DPI A4 PNG is CPU-bound work that would
//! stall a Tokio worker thread; it runs on the blocking pool instead.

use crate::error::SheetError;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Per-channel tolerance when comparing a pixel to the border colour.
pub const TRIM_THRESHOLD: u8 = 10;

/// Turns a one-page PDF into a trimmed PNG.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Rasterise `pdf` into `<out_prefix>.png` and return that path.
    async fn rasterize(&self, pdf: &Path, out_prefix: &Path) -> Result<PathBuf, SheetError>;
}

/// [`Rasterizer`] that shells out to poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            program: program.into(),
            dpi,
        }
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new("pdftoppm", 150)
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, pdf: &Path, out_prefix: &Path) -> Result<PathBuf, SheetError> {
        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(out_prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SheetError::ConversionFailed {
                pdf: pdf.to_path_buf(),
                detail: format!("could not run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SheetError::ConversionFailed {
                pdf: pdf.to_path_buf(),
                detail: format!("{} ({})", output.status, stderr.trim()),
            });
        }

        let png = png_path(out_prefix);
        if !tokio::fs::try_exists(&png).await.unwrap_or(false) {
            return Err(SheetError::OutputMissing { expected: png });
        }

        trim_png_in_place(&png).await?;
        Ok(png)
    }
}

/// `<prefix>.png`, appended rather than substituted so dots in sheet names survive.
pub fn png_path(prefix: &Path) -> PathBuf {
    let mut s = OsString::from(prefix.as_os_str());
    s.push(".png");
    PathBuf::from(s)
}

/// Crop a PNG file to its content and overwrite it.
pub async fn trim_png_in_place(path: &Path) -> Result<(), SheetError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || trim_png_blocking(&owned))
        .await
        .map_err(|e| trim_task_failed(path, e))?
}

fn trim_task_failed(path: &Path, e: tokio::task::JoinError) -> SheetError {
    SheetError::TrimFailed {
        path: path.to_path_buf(),
        detail: format!("trim task panicked: {e}"),
    }
}

fn trim_png_blocking(path: &Path) -> Result<(), SheetError> {
    let fail = |detail: String| SheetError::TrimFailed {
        path: path.to_path_buf(),
        detail,
    };
    let img = image::open(path).map_err(|e| fail(e.to_string()))?;
    let (w, h) = img.dimensions();
    let trimmed = trim_borders(&img, TRIM_THRESHOLD);
    debug!(
        "Trimmed {} from {}x{} to {}x{}",
        path.display(),
        w,
        h,
        trimmed.width(),
        trimmed.height()
    );
    trimmed
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| fail(e.to_string()))
}

/// Crop away the uniform border whose colour is that of the top-left pixel.
///
/// An image that is entirely border colour is returned unchanged.
pub fn trim_borders(img: &DynamicImage, threshold: u8) -> DynamicImage {
    match content_bounds(img, threshold) {
        Some((x, y, w, h)) => img.crop_imm(x, y, w, h),
        None => img.clone(),
    }
}

/// Bounding box `(x, y, width, height)` of pixels that differ from the
/// top-left pixel by more than `threshold` in any channel.
pub fn content_bounds(img: &DynamicImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let rgba = img.to_rgba8();
    let background = *rgba.get_pixel(0, 0);

    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut found = false;

    for (x, y, px) in rgba.enumerate_pixels() {
        if differs(px, &background, threshold) {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

fn differs(a: &Rgba<u8>, b: &Rgba<u8>, threshold: u8) -> bool {
    a.0.iter().zip(b.0.iter()).any(|(x, y)| x.abs_diff(*y) > threshold)
}
