//! # edgequake-md2thread
//!
//! Turn long-form Markdown into a thread of short plain-text posts, with
//! fenced code blocks and tables rendered as standalone images.
//!
//! ## Why this crate?
//!
//! Social platforms cap posts at a few hundred characters and render
//! neither Markdown nor monospaced code. Pasting an article by hand means
//! re-splitting paragraphs, deleting markup and screenshotting every
//! snippet. This crate does all three and keeps the result in sync with the
//! document while it is being edited.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Lex         fenced code blocks + GFM tables with byte spans
//!  ├─ 2. Rasterise   every block concurrently (spawn_blocking, timeout)
//!  ├─ 3. Substitute  block span → [Code Image <id>] / [Table Image <id>]
//!  ├─ 4. Normalize   strip Markdown around protected placeholders
//!  ├─ 5. Segment     ≤ 500-char posts, forced breaks at `§§§` lines
//!  └─ 6. Snapshot    posts + asset registry, published atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_md2thread::{convert, ThreadConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ThreadConfig::default();
//!     let thread = convert("# Hello\n\nSome **long** article…", &config).await;
//!     for post in &thread.posts {
//!         println!("{}/{}: {}", post.index + 1, thread.posts.len(), post.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Editors keep a [`ThreadSession`] instead: edits are debounced, runs that
//! finish out of order are dropped, and cursor moves map to the post being
//! edited.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2thread` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-md2thread = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ThreadConfig, ThreadConfigBuilder, DEFAULT_BREAK_MARKER};
pub use convert::{convert, convert_file, convert_sync, write_assets};
pub use error::{BlockError, Md2ThreadError};
pub use output::{
    AssetRegistry, ImageHandle, Post, PostPart, PostSpan, RenderedAsset, SubstitutedSpan, ThreadSnapshot,
    ThreadStats,
};
pub use pipeline::breaks::{count_breaks, insert_break, remove_break, BreakInsertion};
pub use pipeline::lexer::{Block, BlockKind, BlockPayload, CmarkLexer, LexError, MarkdownLexer};
pub use pipeline::raster::{CardRasterizer, RasterError, RasterStyle, SnippetRasterizer};
pub use pipeline::strip::{CmarkStripper, MarkdownStripper, StripOptions};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use session::{RunOutcome, ThreadSession};
pub use stream::{snapshot_stream, snapshot_updates, SnapshotStream};
