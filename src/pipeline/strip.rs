//! Markdown → plain text.
//!
//! The target platforms render no Markdown at all, so every construct is
//! reduced to the text a reader would see. List leaders are kept by default
//! because a bare list loses its structure without them; everything else
//! (emphasis, headings, link syntax, HTML) disappears.
//!
//! Fenced code that reaches the stripper (disabled or failed rasterisation)
//! keeps its fence lines, so the segmenter can still treat it as one unit.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Knobs for [`MarkdownStripper::strip`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripOptions {
    /// Remove list leaders (`-`, `*`, `1.`). Default: false.
    pub strip_list_leaders: bool,
    /// When leaders are stripped, replace them with this character.
    /// Default: None (leaders vanish).
    pub list_unicode_char: Option<char>,
    /// Recognise GFM tables, strikethrough, task lists and footnotes. Default: true.
    pub gfm: bool,
    /// Keep image alt text in the output. Default: false (images vanish).
    pub use_img_alt_text: bool,
}

impl Default for StripOptions {
    fn default() -> Self {
        Self {
            strip_list_leaders: false,
            list_unicode_char: None,
            gfm: true,
            use_img_alt_text: false,
        }
    }
}

/// Reduces Markdown to plain text.
pub trait MarkdownStripper: Send + Sync {
    fn strip(&self, text: &str, options: &StripOptions) -> String;
}

/// Default stripper walking the pulldown-cmark event stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmarkStripper;

impl MarkdownStripper for CmarkStripper {
    fn strip(&self, text: &str, options: &StripOptions) -> String {
        let mut parser_options = Options::empty();
        if options.gfm {
            parser_options |= Options::ENABLE_TABLES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_FOOTNOTES;
        }

        let mut w = PlainWriter::new(text, options);
        for (event, range) in Parser::new_ext(text, parser_options).into_offset_iter() {
            w.event(event, range);
        }
        w.finish()
    }
}

struct PlainWriter<'a> {
    source: &'a str,
    options: &'a StripOptions,
    out: String,
    list_depth: usize,
    /// A list item just wrote its leader; its first paragraph must not break.
    item_open: bool,
    image_depth: usize,
    skip_depth: usize,
    indented_code: bool,
    /// Closing fence line of the open fenced block, if the source closed it.
    fence_close: Option<String>,
    cell_index: usize,
}

impl<'a> PlainWriter<'a> {
    fn new(source: &'a str, options: &'a StripOptions) -> Self {
        Self {
            source,
            options,
            out: String::with_capacity(source.len()),
            list_depth: 0,
            item_open: false,
            image_depth: 0,
            skip_depth: 0,
            indented_code: false,
            fence_close: None,
            cell_index: 0,
        }
    }

    fn event(&mut self, event: Event<'_>, range: Range<usize>) {
        if self.skip_depth > 0 {
            match event {
                Event::Start(Tag::MetadataBlock(_)) => self.skip_depth += 1,
                Event::End(TagEnd::MetadataBlock(_)) => self.skip_depth -= 1,
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(tag) => self.start(tag, range),
            Event::End(tag) => self.end(tag),
            Event::Text(t) => {
                if self.indented_code || (self.image_depth > 0 && !self.options.use_img_alt_text) {
                    return;
                }
                self.push(&t);
            }
            Event::Code(t) => self.push(&t),
            Event::SoftBreak | Event::HardBreak => self.out.push('\n'),
            Event::TaskListMarker(done) => self.push(if done { "[x] " } else { "[ ] " }),
            // HTML, rules, footnote references and math carry no reader-visible text.
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>, range: Range<usize>) {
        match tag {
            Tag::Paragraph => {
                if self.item_open {
                    self.item_open = false;
                } else {
                    self.block_break();
                }
            }
            Tag::Heading { .. } | Tag::BlockQuote(_) | Tag::FootnoteDefinition(_) => {
                self.item_open = false;
                self.block_break();
            }
            Tag::CodeBlock(kind) => {
                self.item_open = false;
                self.block_break();
                let raw = self.source.get(range).unwrap_or_default();
                match kind {
                    CodeBlockKind::Indented => {
                        // Keep indentation so a second pass sees the same block.
                        self.out.push_str(raw.trim_end_matches(['\n', '\r']));
                        self.indented_code = true;
                    }
                    CodeBlockKind::Fenced(info) => {
                        let opener = fence_run(raw);
                        self.out.push_str(opener);
                        self.out.push_str(&info);
                        self.out.push('\n');
                        self.fence_close = closing_fence(raw, opener).map(str::to_string);
                    }
                }
            }
            Tag::List(_) => {
                if self.list_depth == 0 {
                    self.block_break();
                } else {
                    self.line_break();
                }
                self.list_depth += 1;
            }
            Tag::Item => {
                self.line_break();
                let indent = "  ".repeat(self.list_depth.saturating_sub(1));
                self.out.push_str(&indent);
                if !self.options.strip_list_leaders {
                    let leader = self.leader_at(range.start);
                    self.out.push_str(leader);
                    self.out.push(' ');
                } else if let Some(c) = self.options.list_unicode_char {
                    self.out.push(c);
                    self.out.push(' ');
                }
                self.item_open = true;
            }
            Tag::Table(_) => self.block_break(),
            Tag::TableHead | Tag::TableRow => {
                self.line_break();
                self.cell_index = 0;
            }
            Tag::TableCell => {
                if self.cell_index > 0 {
                    self.out.push_str(" | ");
                }
            }
            Tag::Image { .. } => self.image_depth += 1,
            Tag::MetadataBlock(_) => self.skip_depth += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::CodeBlock => {
                self.indented_code = false;
                match self.fence_close.take() {
                    Some(close) => {
                        self.line_break();
                        self.out.push_str(&close);
                    }
                    None => {
                        while self.out.ends_with('\n') {
                            self.out.pop();
                        }
                    }
                }
            }
            TagEnd::List(_) => {
                self.list_depth = self.list_depth.saturating_sub(1);
                self.item_open = false;
            }
            TagEnd::Item => self.item_open = false,
            TagEnd::TableCell => self.cell_index += 1,
            TagEnd::Image => self.image_depth = self.image_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn push(&mut self, s: &str) {
        self.item_open = false;
        self.out.push_str(s);
    }

    /// The list marker as written in the source (`-`, `*`, `+`, `3.`, `2)`).
    fn leader_at(&self, start: usize) -> &'a str {
        let rest = self.source.get(start..).unwrap_or_default();
        let rest = rest.trim_start_matches([' ', '\t']);
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let leader = &rest[..end];
        if leader.is_empty() {
            "-"
        } else {
            leader
        }
    }

    fn line_break(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn block_break(&mut self) {
        if self.out.is_empty() {
            return;
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn finish(mut self) -> String {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
        self.out
    }
}

/// Opening fence run (backticks or tildes) at the start of `raw`.
fn fence_run(raw: &str) -> &str {
    let trimmed = raw.trim_start_matches(' ');
    let Some(first) = trimmed.chars().next().filter(|c| *c == '`' || *c == '~') else {
        return "```";
    };
    let rest = trimmed.trim_start_matches(first);
    &trimmed[..trimmed.len() - rest.len()]
}

/// The closing fence line of a fenced block's source, if it has one.
///
/// Container prefixes (`>`, indentation) are ignored. An unclosed block
/// runs to the end of the document and gets no closing line.
fn closing_fence<'s>(raw: &'s str, opener: &str) -> Option<&'s str> {
    let body = raw.trim_end_matches(['\n', '\r']);
    let (_, last) = body.rsplit_once('\n')?;
    let last = last.trim_start_matches([' ', '\t', '>']).trim_end();
    let fence_char = opener.chars().next()?;
    let closes = last.len() >= opener.len() && last.chars().all(|c| c == fence_char);
    closes.then_some(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(text: &str) -> String {
        CmarkStripper.strip(text, &StripOptions::default())
    }

    #[test]
    fn removes_emphasis_and_headings() {
        assert_eq!(
            strip("# Title\n\nSome **bold** and _italic_ text."),
            "Title\n\nSome bold and italic text."
        );
    }

    #[test]
    fn keeps_line_structure_of_paragraphs() {
        assert_eq!(strip("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn links_keep_their_text() {
        assert_eq!(strip("See [the docs](https://example.org)."), "See the docs.");
    }

    #[test]
    fn images_vanish_by_default() {
        assert_eq!(strip("Look: ![a cat](cat.png) here"), "Look:  here");
    }

    #[test]
    fn image_alt_text_kept_when_asked() {
        let opts = StripOptions {
            use_img_alt_text: true,
            ..Default::default()
        };
        assert_eq!(CmarkStripper.strip("![a cat](cat.png)", &opts), "a cat");
    }

    #[test]
    fn list_leaders_kept_verbatim() {
        assert_eq!(strip("- one\n- two"), "- one\n- two");
        assert_eq!(strip("3. three\n4. four"), "3. three\n4. four");
        assert_eq!(strip("* star"), "* star");
    }

    #[test]
    fn list_leaders_stripped_when_asked() {
        let opts = StripOptions {
            strip_list_leaders: true,
            ..Default::default()
        };
        assert_eq!(CmarkStripper.strip("- one\n- two", &opts), "one\ntwo");
        let bullets = StripOptions {
            strip_list_leaders: true,
            list_unicode_char: Some('•'),
            ..Default::default()
        };
        assert_eq!(CmarkStripper.strip("- one", &bullets), "• one");
    }

    #[test]
    fn nested_lists_are_indented() {
        assert_eq!(strip("- a\n  - b\n- c"), "- a\n  - b\n- c");
    }

    #[test]
    fn fenced_code_keeps_its_fences() {
        let once = strip("Intro\n\n```js\nlet x = 1;\n```\n\nOutro");
        assert_eq!(once, "Intro\n\n```js\nlet x = 1;\n```\n\nOutro");
        assert_eq!(strip(&once), once);
        assert_eq!(strip("~~~~\na\n~~~~~"), "~~~~\na\n~~~~~");
    }

    #[test]
    fn unclosed_fence_gets_no_closing_line() {
        assert_eq!(strip("```\na\nb"), "```\na\nb");
        assert_eq!(strip("```\n"), "```");
    }

    #[test]
    fn fence_inside_blockquote() {
        assert_eq!(strip("> ```\n> a\n> ```"), "```\na\n```");
    }

    #[test]
    fn indented_code_keeps_indentation() {
        let once = strip("Para\n\n    code line\n");
        assert_eq!(once, "Para\n\n    code line");
        assert_eq!(strip(&once), once);
    }

    #[test]
    fn tables_flatten_to_rows() {
        assert_eq!(
            strip("| A | B |\n|---|---|\n| 1 | 2 |"),
            "A | B\n1 | 2"
        );
    }

    #[test]
    fn blockquote_and_html_removed() {
        assert_eq!(strip("> quoted <b>text</b>"), "quoted text");
    }

    #[test]
    fn task_markers_kept() {
        assert_eq!(strip("- [x] done\n- [ ] todo"), "- [x] done\n- [ ] todo");
    }

    #[test]
    fn placeholder_lookalike_survives_as_text() {
        assert_eq!(strip("[Code Image 1-0]"), "[Code Image 1-0]");
    }
}
