//! Rasterisation: a code block or table → PNG card.
//!
//! The [`SnippetRasterizer`] trait is the seam for real renderers (a headless
//! browser, a font rasteriser, a remote service). The built-in
//! [`CardRasterizer`] needs no fonts: it colours the snippet with syntect
//! and paints each visible character as a glyph-sized bar, which keeps the
//! shape, indentation and colouring of the code recognisable in a preview.
//!
//! ## Why spawn_blocking?
//!
//! Highlighting and PNG encoding are CPU-bound. Running them on the blocking
//! pool keeps the runtime responsive while a run fans out over many blocks.

use crate::output::ImageHandle;
use crate::pipeline::encode::encode_png;
use crate::pipeline::lexer::{Block, BlockPayload};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use thiserror::Error;
use tracing::debug;

/// Hard cap on canvas size, independent of configuration.
pub const MAX_CANVAS_PX: u32 = 16_384;

const DEFAULT_THEME: &str = "base16-ocean.dark";

static SYNTAXES: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEMES: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

/// Errors from a [`SnippetRasterizer`].
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("image {width}x{height} exceeds the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("syntax highlighting failed: {0}")]
    Highlight(String),

    #[error("unknown theme '{0}'")]
    UnknownTheme(String),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("rasteriser task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Other(String),
}

/// Visual settings for rendered cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterStyle {
    /// Card background. Default: `#1e1e1e`.
    pub background: [u8; 3],
    /// Padding around the content, in CSS pixels. Default: 20.
    pub padding_px: u32,
    /// Device pixels per CSS pixel. Default: 2.
    pub pixel_ratio: u32,
    /// Minimum card width in CSS pixels. Default: 590.
    pub min_width_px: u32,
    /// Advance per character cell. Default: 8.
    pub char_width_px: u32,
    /// Height of one text line. Default: 18.
    pub line_height_px: u32,
    /// syntect theme name. Default: `base16-ocean.dark`.
    pub theme: String,
}

impl Default for RasterStyle {
    fn default() -> Self {
        Self {
            background: [0x1e, 0x1e, 0x1e],
            padding_px: 20,
            pixel_ratio: 2,
            min_width_px: 590,
            char_width_px: 8,
            line_height_px: 18,
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

/// Renders a block into an image.
///
/// Implementations must be side-effect free: a superseded run's requests
/// are not cancelled, their results are simply dropped.
#[async_trait]
pub trait SnippetRasterizer: Send + Sync {
    async fn rasterize(&self, block: &Block, style: &RasterStyle) -> Result<ImageHandle, RasterError>;
}

/// Built-in font-free card renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardRasterizer;

#[async_trait]
impl SnippetRasterizer for CardRasterizer {
    async fn rasterize(&self, block: &Block, style: &RasterStyle) -> Result<ImageHandle, RasterError> {
        let block = block.clone();
        let style = style.clone();
        tokio::task::spawn_blocking(move || -> Result<ImageHandle, RasterError> {
            let img = paint_block(&block, &style)?;
            debug!(
                "Painted block {} ({}) → {}x{} px",
                block.index,
                block.kind(),
                img.width(),
                img.height()
            );
            Ok(encode_png(img)?)
        })
        .await
        .map_err(|e| RasterError::Task(e.to_string()))?
    }
}

// ── Languages ────────────────────────────────────────────────────────────────

/// Syntax tokens to try for an info-string language, most specific first.
fn language_candidates(language: &str) -> Vec<&str> {
    match language.to_ascii_lowercase().as_str() {
        "" | "plaintext" | "text" | "txt" => vec![],
        "ts" | "typescript" | "tsx" => vec!["typescript", "ts", "js"],
        "jsx" => vec!["jsx", "js"],
        "docker" | "dockerfile" => vec!["Dockerfile", "dockerfile", "sh"],
        "shell" | "sh" | "zsh" | "bash" => vec!["bash", "sh"],
        "csharp" | "c#" => vec!["cs"],
        "cpp" | "c++" => vec!["cpp"],
        "yml" => vec!["yaml"],
        _ => vec![language],
    }
}

/// Syntax definition for a language, falling back to plain text.
pub fn syntax_for(language: Option<&str>) -> &'static SyntaxReference {
    let syntaxes: &'static SyntaxSet = &SYNTAXES;
    language
        .map(language_candidates)
        .unwrap_or_default()
        .into_iter()
        .find_map(|token| syntaxes.find_syntax_by_token(token))
        .unwrap_or_else(|| syntaxes.find_syntax_plain_text())
}

fn theme(name: &str) -> Result<&'static Theme, RasterError> {
    let themes: &'static ThemeSet = &THEMES;
    themes
        .themes
        .get(name)
        .or_else(|| themes.themes.get(DEFAULT_THEME))
        .ok_or_else(|| RasterError::UnknownTheme(name.to_string()))
}

// ── Card layout ──────────────────────────────────────────────────────────────

type Rgb = [u8; 3];

const TABLE_HEADER: Rgb = [0xe6, 0xe6, 0xe6];
const TABLE_BODY: Rgb = [0xb4, 0xb4, 0xb4];
const TABLE_RULE: Rgb = [0x5a, 0x5a, 0x5a];

struct CardLine {
    spans: Vec<(Rgb, String)>,
    rule_below: bool,
}

impl CardLine {
    fn columns(&self) -> usize {
        self.spans.iter().map(|(_, t)| display_columns(t)).sum()
    }
}

fn display_columns(text: &str) -> usize {
    text.chars().fold(0, |col, c| if c == '\t' { col + 4 - col % 4 } else { col + 1 })
}

fn paint_block(block: &Block, style: &RasterStyle) -> Result<RgbaImage, RasterError> {
    let lines = match &block.payload {
        BlockPayload::Code { language, code } => highlight_code(language.as_deref(), code, &style.theme)?,
        BlockPayload::Table { header, rows, .. } => table_lines(header, rows),
    };
    paint(&lines, style)
}

fn highlight_code(language: Option<&str>, code: &str, theme_name: &str) -> Result<Vec<CardLine>, RasterError> {
    let mut hl = HighlightLines::new(syntax_for(language), theme(theme_name)?);
    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        let ranges = hl
            .highlight_line(line, &SYNTAXES)
            .map_err(|e| RasterError::Highlight(e.to_string()))?;
        let spans = ranges
            .into_iter()
            .map(|(s, text)| {
                let fg = s.foreground;
                ([fg.r, fg.g, fg.b], text.trim_end_matches(['\n', '\r']).to_string())
            })
            .collect();
        lines.push(CardLine {
            spans,
            rule_below: false,
        });
    }
    if lines.is_empty() {
        lines.push(CardLine {
            spans: Vec::new(),
            rule_below: false,
        });
    }
    Ok(lines)
}

fn table_lines(header: &[String], rows: &[Vec<String>]) -> Vec<CardLine> {
    let cols = rows.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(0);
    let mut widths = vec![0usize; cols];
    for row in std::iter::once(header).chain(rows.iter().map(Vec::as_slice)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let render = |cells: &[String], color: Rgb| {
        let mut spans = Vec::with_capacity(cols * 2);
        for (i, width) in widths.iter().enumerate() {
            if i > 0 {
                spans.push((TABLE_RULE, " | ".to_string()));
            }
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let pad = width.saturating_sub(cell.chars().count());
            spans.push((color, format!("{cell}{}", " ".repeat(pad))));
        }
        spans
    };

    let mut lines = vec![CardLine {
        spans: render(header, TABLE_HEADER),
        rule_below: true,
    }];
    lines.extend(rows.iter().map(|row| CardLine {
        spans: render(row, TABLE_BODY),
        rule_below: false,
    }));
    lines
}

fn paint(lines: &[CardLine], style: &RasterStyle) -> Result<RgbaImage, RasterError> {
    let ratio = u64::from(style.pixel_ratio.max(1));
    let pad = u64::from(style.padding_px);
    let char_w = u64::from(style.char_width_px.max(2));
    let line_h = u64::from(style.line_height_px.max(2));
    let glyph_h = (line_h * 5 / 9).max(1);

    let cols = lines.iter().map(CardLine::columns).max().unwrap_or(0) as u64;
    let css_w = (cols * char_w + 2 * pad).max(u64::from(style.min_width_px));
    let css_h = lines.len() as u64 * line_h + 2 * pad;
    let (width, height) = (css_w * ratio, css_h * ratio);

    let max = u64::from(MAX_CANVAS_PX);
    if width > max || height > max {
        return Err(RasterError::TooLarge {
            width: width.min(u64::from(u32::MAX)) as u32,
            height: height.min(u64::from(u32::MAX)) as u32,
            max: MAX_CANVAS_PX,
        });
    }

    let [r, g, b] = style.background;
    let mut img = RgbaImage::from_pixel(width as u32, height as u32, Rgba([r, g, b, 255]));

    for (row, line) in lines.iter().enumerate() {
        let top = pad + row as u64 * line_h;
        let glyph_y = (top + (line_h - glyph_h) / 2) * ratio;
        let mut col = 0u64;
        for (color, text) in &line.spans {
            for c in text.chars() {
                if c == '\t' {
                    col += 4 - col % 4;
                    continue;
                }
                if !c.is_whitespace() {
                    let x = (pad + col * char_w + 1) * ratio;
                    fill_rect(&mut img, x, glyph_y, (char_w - 2) * ratio, glyph_h * ratio, *color);
                }
                col += 1;
            }
        }
        if line.rule_below {
            let y = (top + line_h) * ratio - ratio;
            fill_rect(&mut img, pad * ratio, y, width - 2 * pad * ratio, ratio, TABLE_RULE);
        }
    }
    Ok(img)
}

fn fill_rect(img: &mut RgbaImage, x: u64, y: u64, w: u64, h: u64, color: Rgb) {
    let (iw, ih) = (u64::from(img.width()), u64::from(img.height()));
    let [r, g, b] = color;
    for py in y..(y + h).min(ih) {
        for px in x..(x + w).min(iw) {
            img.put_pixel(px as u32, py as u32, Rgba([r, g, b, 255]));
        }
    }
}
