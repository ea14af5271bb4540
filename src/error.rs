//! Error types for the edgequake-md2thread library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Md2ThreadError`] — **Fatal for the call**: the surrounding operation
//!   cannot proceed (input file missing, asset directory not writable,
//!   invalid configuration). Returned as `Err(Md2ThreadError)`.
//!
//! * [`BlockError`] — **Non-fatal**: a single code block or table could not
//!   be rasterised. The block degrades to plain text and the error is stored
//!   on [`crate::output::ThreadSnapshot::failures`] so callers can surface it
//!   or ignore it.
//!
//! The pipeline itself never returns a fatal error: a run over any input
//! produces a snapshot, degraded where necessary.

use crate::pipeline::lexer::BlockKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-md2thread library.
#[derive(Debug, Error)]
pub enum Md2ThreadError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Markdown file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file was read but is not valid UTF-8 text.
    #[error("File is not valid UTF-8 text: '{path}' (invalid byte at offset {offset})")]
    NotUtf8 { path: PathBuf, offset: usize },

    /// Reading Markdown from standard input failed.
    #[error("Failed to read Markdown from stdin: {source}")]
    StdinReadFailed {
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an exported asset image.
    #[error("Failed to write asset file '{path}': {source}")]
    AssetWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A rendered asset carried image data that is not valid base64.
    #[error("Asset '{id}' has undecodable image data: {detail}")]
    AssetDecodeFailed { id: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single block.
///
/// Stored on the snapshot when a block fails to rasterise. The block stays
/// in the text as Markdown and is stripped like any other paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum BlockError {
    /// The rasteriser returned an error for this block.
    #[error("Block {block} ({kind}): rasterisation failed: {detail}")]
    RasterisationFailed {
        block: usize,
        kind: BlockKind,
        detail: String,
    },

    /// The rasteriser did not answer within the configured timeout.
    #[error("Block {block} ({kind}): rasterisation timed out after {ms}ms")]
    Timeout { block: usize, kind: BlockKind, ms: u64 },

    /// The rendered image would exceed the configured pixel cap.
    #[error("Block {block} ({kind}): image {width}x{height} exceeds the {max}px limit")]
    TooLarge {
        block: usize,
        kind: BlockKind,
        width: u32,
        height: u32,
        max: u32,
    },
}

impl BlockError {
    /// Index of the failed block in source order.
    pub fn block(&self) -> usize {
        match self {
            BlockError::RasterisationFailed { block, .. }
            | BlockError::Timeout { block, .. }
            | BlockError::TooLarge { block, .. } => *block,
        }
    }
}
