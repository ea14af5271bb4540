//! Block lexing: find fenced code blocks and GFM tables with exact byte spans.
//!
//! ## Why offsets, not patterns?
//!
//! A block is later replaced in the document by a placeholder token. Deriving
//! a search pattern from the block's content would replace *every* textual
//! copy of a duplicated block with the first block's token. pulldown-cmark's
//! offset iterator gives the exact byte range of each block, so every block
//! is replaced exactly once, at its own position, in source order.

use pulldown_cmark::{Alignment, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// The two block kinds that are rendered as images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Code,
    Table,
}

impl BlockKind {
    /// Capitalised label used inside placeholder tokens (`[Code Image …]`).
    pub fn label(self) -> &'static str {
        match self {
            BlockKind::Code => "Code",
            BlockKind::Table => "Table",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Code => f.write_str("code"),
            BlockKind::Table => f.write_str("table"),
        }
    }
}

/// Column alignment declared in a table's delimiter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnAlign {
    #[default]
    None,
    Left,
    Center,
    Right,
}

impl From<Alignment> for ColumnAlign {
    fn from(a: Alignment) -> Self {
        match a {
            Alignment::None => ColumnAlign::None,
            Alignment::Left => ColumnAlign::Left,
            Alignment::Center => ColumnAlign::Center,
            Alignment::Right => ColumnAlign::Right,
        }
    }
}

/// Block-specific data handed to the rasteriser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockPayload {
    /// Fenced code: the info-string language (first word) and the code text
    /// without the trailing newline.
    Code {
        language: Option<String>,
        code: String,
    },
    /// GFM table: cell text with inline markup removed.
    Table {
        alignments: Vec<ColumnAlign>,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// A fenced code block or table found in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position among all blocks of this document, in source order.
    pub index: usize,
    /// Byte range of the block in the document, delimiters included,
    /// trailing line terminator excluded.
    pub span: Range<usize>,
    /// The exact source text covered by `span`.
    pub raw: String,
    pub payload: BlockPayload,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self.payload {
            BlockPayload::Code { .. } => BlockKind::Code,
            BlockPayload::Table { .. } => BlockKind::Table,
        }
    }

    /// Info-string language of a code block, if any.
    pub fn language(&self) -> Option<&str> {
        match &self.payload {
            BlockPayload::Code { language, .. } => language.as_deref(),
            BlockPayload::Table { .. } => None,
        }
    }

    /// Content handed to a rasteriser: the code text, or the table as HTML.
    pub fn content(&self) -> String {
        match &self.payload {
            BlockPayload::Code { code, .. } => code.clone(),
            BlockPayload::Table {
                alignments,
                header,
                rows,
            } => table_to_html(alignments, header, rows),
        }
    }
}

/// Errors from a [`MarkdownLexer`]. Any lexer error makes the pipeline treat
/// the whole document as plain text for that run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("block span {start}..{end} is not a valid UTF-8 range of the document")]
    InvalidByteRange { start: usize, end: usize },

    #[error("lexer failed: {0}")]
    Other(String),
}

/// Splits a Markdown document into the blocks that should become images.
///
/// Implementations must return blocks in source order with non-overlapping
/// spans that index into `text`.
pub trait MarkdownLexer: Send + Sync {
    fn lex(&self, text: &str) -> Result<Vec<Block>, LexError>;
}

/// Default lexer backed by pulldown-cmark with GFM extensions.
#[derive(Debug, Clone, Copy)]
pub struct CmarkLexer {
    options: Options,
}

impl Default for CmarkLexer {
    fn default() -> Self {
        Self {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_FOOTNOTES,
        }
    }
}

enum Capture {
    Code {
        range: Range<usize>,
        language: Option<String>,
        code: String,
    },
    Table {
        range: Range<usize>,
        alignments: Vec<ColumnAlign>,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
        row: Vec<String>,
        cell: String,
    },
}

impl MarkdownLexer for CmarkLexer {
    fn lex(&self, text: &str) -> Result<Vec<Block>, LexError> {
        let mut blocks = Vec::new();
        let mut capture: Option<Capture> = None;

        for (event, range) in Parser::new_ext(text, self.options).into_offset_iter() {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) if capture.is_none() => {
                    let language = info
                        .split_whitespace()
                        .next()
                        .map(|s| s.to_string());
                    capture = Some(Capture::Code {
                        range,
                        language,
                        code: String::new(),
                    });
                }
                Event::Start(Tag::Table(alignments)) if capture.is_none() => {
                    capture = Some(Capture::Table {
                        range,
                        alignments: alignments.into_iter().map(ColumnAlign::from).collect(),
                        header: Vec::new(),
                        rows: Vec::new(),
                        row: Vec::new(),
                        cell: String::new(),
                    });
                }
                Event::End(TagEnd::CodeBlock) => match capture.take() {
                    Some(Capture::Code {
                        range,
                        language,
                        mut code,
                    }) => {
                        if code.ends_with('\n') {
                            code.pop();
                            if code.ends_with('\r') {
                                code.pop();
                            }
                        }
                        let (span, raw) = block_span(text, range)?;
                        blocks.push(Block {
                            index: blocks.len(),
                            span,
                            raw,
                            payload: BlockPayload::Code { language, code },
                        });
                    }
                    other => capture = other,
                },
                Event::End(TagEnd::Table) => match capture.take() {
                    Some(Capture::Table {
                        range,
                        alignments,
                        header,
                        rows,
                        ..
                    }) => {
                        let (span, raw) = block_span(text, range)?;
                        blocks.push(Block {
                            index: blocks.len(),
                            span,
                            raw,
                            payload: BlockPayload::Table {
                                alignments,
                                header,
                                rows,
                            },
                        });
                    }
                    other => capture = other,
                },
                event => {
                    if let Some(capture) = capture.as_mut() {
                        feed_capture(capture, event);
                    }
                }
            }
        }

        debug!("Lexed {} blocks", blocks.len());
        Ok(blocks)
    }
}

fn feed_capture(capture: &mut Capture, event: Event<'_>) {
    match capture {
        Capture::Code { code, .. } => {
            if let Event::Text(t) = event {
                code.push_str(&t);
            }
        }
        Capture::Table {
            header,
            rows,
            row,
            cell,
            ..
        } => match event {
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => row.clear(),
            Event::End(TagEnd::TableHead) => *header = std::mem::take(row),
            Event::End(TagEnd::TableRow) => rows.push(std::mem::take(row)),
            Event::Start(Tag::TableCell) => cell.clear(),
            Event::End(TagEnd::TableCell) => row.push(std::mem::take(cell).trim().to_string()),
            Event::Text(t) | Event::Code(t) => cell.push_str(&t),
            Event::SoftBreak | Event::HardBreak => cell.push(' '),
            _ => {}
        },
    }
}

/// Validate a parser range and trim its trailing line terminator.
fn block_span(text: &str, range: Range<usize>) -> Result<(Range<usize>, String), LexError> {
    let Range { start, mut end } = range;
    if start > end || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end)
    {
        return Err(LexError::InvalidByteRange { start, end });
    }
    while end > start && matches!(text.as_bytes()[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    Ok((start..end, text[start..end].to_string()))
}

fn table_to_html(alignments: &[ColumnAlign], header: &[String], rows: &[Vec<String>]) -> String {
    fn cell(html: &mut String, tag: &str, align: Option<&ColumnAlign>, text: &str) {
        let style = match align {
            Some(ColumnAlign::Left) => " style=\"text-align: left\"",
            Some(ColumnAlign::Center) => " style=\"text-align: center\"",
            Some(ColumnAlign::Right) => " style=\"text-align: right\"",
            _ => "",
        };
        html.push_str(&format!("<{tag}{style}>{}</{tag}>", escape_html(text)));
    }

    let mut html = String::from("<table>\n<thead>\n<tr>");
    for (i, h) in header.iter().enumerate() {
        cell(&mut html, "th", alignments.get(i), h);
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in rows {
        html.push_str("<tr>");
        for (i, c) in row.iter().enumerate() {
            cell(&mut html, "td", alignments.get(i), c);
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<Block> {
        CmarkLexer::default().lex(text).expect("lex should succeed")
    }

    #[test]
    fn finds_fenced_code_with_language() {
        let text = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        let blocks = lex(text);
        assert_eq!(blocks.len(), 1);
        let b = &blocks[0];
        assert_eq!(b.kind(), BlockKind::Code);
        assert_eq!(b.language(), Some("rust"));
        assert_eq!(b.content(), "fn main() {}");
        assert_eq!(b.raw, "```rust\nfn main() {}\n```");
        assert_eq!(&text[b.span.clone()], b.raw);
    }

    #[test]
    fn language_is_first_word_of_info_string() {
        let blocks = lex("```python title=\"x.py\"\nprint(1)\n```");
        assert_eq!(blocks[0].language(), Some("python"));
    }

    #[test]
    fn code_without_language() {
        let blocks = lex("```\nplain\n```");
        assert_eq!(blocks[0].language(), None);
        assert_eq!(blocks[0].content(), "plain");
    }

    #[test]
    fn indented_code_is_not_a_block() {
        let blocks = lex("Para\n\n    indented code\n");
        assert!(blocks.is_empty());
    }

    #[test]
    fn finds_table_cells() {
        let text = "| Name | Qty |\n|:-----|----:|\n| **apple** | 3 |\n| pear | `10` |\n\nAfter";
        let blocks = lex(text);
        assert_eq!(blocks.len(), 1);
        match &blocks[0].payload {
            BlockPayload::Table {
                alignments,
                header,
                rows,
            } => {
                assert_eq!(alignments, &vec![ColumnAlign::Left, ColumnAlign::Right]);
                assert_eq!(header, &vec!["Name".to_string(), "Qty".to_string()]);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0], vec!["apple".to_string(), "3".to_string()]);
                assert_eq!(rows[1], vec!["pear".to_string(), "10".to_string()]);
            }
            other => panic!("expected table, got {other:?}"),
        }
        assert!(!blocks[0].raw.ends_with('\n'));
        assert!(blocks[0].raw.ends_with("| pear | `10` |"));
    }

    #[test]
    fn duplicate_blocks_get_distinct_spans() {
        let text = "```\nsame\n```\n\ntext\n\n```\nsame\n```";
        let blocks = lex(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].raw, blocks[1].raw);
        assert!(blocks[0].span.end <= blocks[1].span.start);
        assert_eq!(blocks[1].index, 1);
    }

    #[test]
    fn table_html_escapes_cells() {
        let blocks = lex("| a |\n|---|\n| <b> & c |");
        let html = blocks[0].content();
        assert!(html.contains("<th>a</th>"));
        assert!(html.contains("&lt;b&gt; &amp; c"));
    }

    #[test]
    fn block_span_rejects_out_of_range() {
        let err = block_span("abc", 1..10).unwrap_err();
        assert_eq!(err, LexError::InvalidByteRange { start: 1, end: 10 });
    }

    #[test]
    fn multibyte_text_keeps_valid_spans() {
        let text = "Café ☕\n\n```\nlet s = \"é\";\n```";
        let blocks = lex(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&text[blocks[0].span.clone()], "```\nlet s = \"é\";\n```");
    }
}
