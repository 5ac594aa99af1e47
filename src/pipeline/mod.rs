//! Pipeline stages for exporting sheets to a chat.
//!
//! Each submodule implements one step. The three remote systems (the
//! spreadsheet API, the rasteriser process and the chat API) sit behind
//! traits so every stage can be exercised without network or binaries.
//!
//! ## Data Flow
//!
//! ```text
//! reader ──▶ chunk ──▶ export ──▶ rasterize ──▶ publish ──▶ cleanup
//! (tab id,   (row      (PDF per   (pdftoppm +   (album +    (workdir)
//!  last row)  windows)  window)    trim)         caption)
//! ```
//!
//! 1. [`reader`]    — resolve the tab id, read caption regions, find the last row
//! 2. [`chunk`]     — split rows into windows and format A1 ranges
//! 3. [`export`]    — fetch one PDF per window, retrying on 429
//! 4. [`rasterize`] — PDF → PNG via an external tool, then crop the margins
//! 5. [`caption`]   — join caption cells into text
//! 6. [`publish`]   — post album/photo plus caption text
//! 7. [`workdir`]   — scoped temp directory and best-effort file removal

pub mod caption;
pub mod chunk;
pub mod export;
pub mod publish;
pub mod rasterize;
pub mod reader;
pub mod workdir;
