//! Configuration for Markdown-to-thread conversion.
//!
//! Every pipeline knob lives in [`ThreadConfig`], built through
//! [`ThreadConfigBuilder`]. The same config drives one-shot conversion
//! ([`crate::convert`]) and editing sessions ([`crate::ThreadSession`]).

use crate::error::Md2ThreadError;
use crate::pipeline::lexer::{BlockKind, MarkdownLexer};
use crate::pipeline::raster::{RasterStyle, SnippetRasterizer};
use crate::pipeline::strip::{MarkdownStripper, StripOptions};
use crate::progress::PipelineProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Default break marker. A line containing only this forces a post boundary.
pub const DEFAULT_BREAK_MARKER: &str = "§§§";

/// Configuration for a thread conversion.
///
/// # Example
/// ```rust
/// use edgequake_md2thread::ThreadConfig;
///
/// let config = ThreadConfig::builder()
///     .max_post_chars(280)
///     .rasterize_tables(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_post_chars, 280);
/// ```
#[derive(Clone)]
pub struct ThreadConfig {
    /// Maximum characters per post (Unicode scalar values). Default: 500.
    ///
    /// A single line longer than this is still emitted as one oversized post;
    /// lines are never cut in the middle.
    pub max_post_chars: usize,

    /// Manual break marker. Default: `§§§`.
    pub break_marker: String,

    /// Quiet period after the last edit before a session recomputes. Default: 500.
    pub debounce_ms: u64,

    /// Minimum interval between cursor recomputations in a session. Default: 100.
    pub cursor_throttle_ms: u64,

    /// Render fenced code blocks as images. Default: true.
    pub rasterize_code: bool,

    /// Render GFM tables as images. Default: true.
    pub rasterize_tables: bool,

    /// Per-block rasterisation timeout in milliseconds. Default: 10 000.
    ///
    /// A block that takes longer degrades to text; the rest of the run is
    /// unaffected.
    pub raster_timeout_ms: u64,

    /// Largest allowed image width or height in pixels. Default: 4096.
    pub max_image_px: u32,

    /// Plain-text stripping options.
    pub strip: StripOptions,

    /// Visual style for the built-in rasteriser.
    pub style: RasterStyle,

    /// Custom rasteriser. If None, uses [`crate::pipeline::raster::CardRasterizer`].
    pub rasterizer: Option<Arc<dyn SnippetRasterizer>>,

    /// Custom block lexer. If None, uses [`crate::pipeline::lexer::CmarkLexer`].
    pub lexer: Option<Arc<dyn MarkdownLexer>>,

    /// Custom stripper. If None, uses [`crate::pipeline::strip::CmarkStripper`].
    pub stripper: Option<Arc<dyn MarkdownStripper>>,

    /// Receives per-run and per-block events.
    pub progress_callback: Option<Arc<dyn PipelineProgressCallback>>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            max_post_chars: 500,
            break_marker: DEFAULT_BREAK_MARKER.to_string(),
            debounce_ms: 500,
            cursor_throttle_ms: 100,
            rasterize_code: true,
            rasterize_tables: true,
            raster_timeout_ms: 10_000,
            max_image_px: 4096,
            strip: StripOptions::default(),
            style: RasterStyle::default(),
            rasterizer: None,
            lexer: None,
            stripper: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("max_post_chars", &self.max_post_chars)
            .field("break_marker", &self.break_marker)
            .field("debounce_ms", &self.debounce_ms)
            .field("cursor_throttle_ms", &self.cursor_throttle_ms)
            .field("rasterize_code", &self.rasterize_code)
            .field("rasterize_tables", &self.rasterize_tables)
            .field("raster_timeout_ms", &self.raster_timeout_ms)
            .field("max_image_px", &self.max_image_px)
            .field("strip", &self.strip)
            .field("style", &self.style)
            .field(
                "rasterizer",
                &self.rasterizer.as_ref().map(|_| "<dyn SnippetRasterizer>"),
            )
            .field("lexer", &self.lexer.as_ref().map(|_| "<dyn MarkdownLexer>"))
            .field(
                "stripper",
                &self.stripper.as_ref().map(|_| "<dyn MarkdownStripper>"),
            )
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl ThreadConfig {
    /// Create a new builder for `ThreadConfig`.
    pub fn builder() -> ThreadConfigBuilder {
        ThreadConfigBuilder {
            config: Self::default(),
        }
    }

    /// Should blocks of this kind be rendered as images?
    pub fn rasterizes(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::Code => self.rasterize_code,
            BlockKind::Table => self.rasterize_tables,
        }
    }
}

/// Builder for [`ThreadConfig`].
#[derive(Debug)]
pub struct ThreadConfigBuilder {
    config: ThreadConfig,
}

impl ThreadConfigBuilder {
    pub fn max_post_chars(mut self, n: usize) -> Self {
        self.config.max_post_chars = n.max(1);
        self
    }

    pub fn break_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.break_marker = marker.into();
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn cursor_throttle_ms(mut self, ms: u64) -> Self {
        self.config.cursor_throttle_ms = ms;
        self
    }

    pub fn rasterize_code(mut self, v: bool) -> Self {
        self.config.rasterize_code = v;
        self
    }

    pub fn rasterize_tables(mut self, v: bool) -> Self {
        self.config.rasterize_tables = v;
        self
    }

    pub fn raster_timeout_ms(mut self, ms: u64) -> Self {
        self.config.raster_timeout_ms = ms.max(1);
        self
    }

    pub fn max_image_px(mut self, px: u32) -> Self {
        self.config.max_image_px = px.max(64);
        self
    }

    pub fn strip_options(mut self, options: StripOptions) -> Self {
        self.config.strip = options;
        self
    }

    pub fn style(mut self, style: RasterStyle) -> Self {
        self.config.style = style;
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn SnippetRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn lexer(mut self, lexer: Arc<dyn MarkdownLexer>) -> Self {
        self.config.lexer = Some(lexer);
        self
    }

    pub fn stripper(mut self, stripper: Arc<dyn MarkdownStripper>) -> Self {
        self.config.stripper = Some(stripper);
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn PipelineProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ThreadConfig, Md2ThreadError> {
        let c = &self.config;
        if c.max_post_chars == 0 {
            return Err(Md2ThreadError::InvalidConfig(
                "max_post_chars must be ≥ 1".into(),
            ));
        }
        if c.break_marker.trim().is_empty() {
            return Err(Md2ThreadError::InvalidConfig(
                "break marker must not be blank".into(),
            ));
        }
        if c.break_marker.contains(['\n', '\r']) {
            return Err(Md2ThreadError::InvalidConfig(format!(
                "break marker must be a single line, got {:?}",
                c.break_marker
            )));
        }
        if c.style.pixel_ratio == 0 || c.style.pixel_ratio > 4 {
            return Err(Md2ThreadError::InvalidConfig(format!(
                "pixel ratio must be 1–4, got {}",
                c.style.pixel_ratio
            )));
        }
        Ok(self.config)
    }
}
