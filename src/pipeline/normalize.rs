//! Normalization: substituted Markdown → plain text with protected placeholders.
//!
//! The target platforms show text verbatim, so Markdown syntax must go. The
//! placeholder tokens must survive untouched: they look like link reference
//! text (`[Code Image 1-0]`) and a stripper could otherwise mangle them.
//!
//! ## Rule Order
//!
//! 1. Split around registered placeholders; strip only the text between them
//! 2. Remove leftover `**x**` pairs
//! 3. Remove leftover `*x*` pairs
//! 4. Remove leftover `` `x` `` pairs
//! 5. Collapse runs of blank lines to exactly one
//! 6. Trim
//!
//! Rules 2–4 catch delimiters that survive stripping when they were split
//! across segments or were not valid CommonMark emphasis. Rules 2–5 never
//! touch a fenced region: code left as text keeps its asterisks, backticks
//! and blank lines.
//!
//! ## Fixed Point
//!
//! Normalizing the output again changes nothing for ordinary prose. Text
//! that was only literal because of an escape (`\# x`, `\_a\_`, `&lt;b&gt;`)
//! is unescaped by the first pass and may be read as Markdown by a second.

use crate::output::AssetRegistry;
use crate::pipeline::placeholder::{split_tokens, Piece};
use crate::pipeline::segment::fenced_aware_lines;
use crate::pipeline::strip::{MarkdownStripper, StripOptions};
use once_cell::sync::Lazy;
use regex::Regex;

/// Stripper plus options, applied around placeholders.
#[derive(Clone, Copy)]
pub struct Normalizer<'a> {
    stripper: &'a dyn MarkdownStripper,
    options: &'a StripOptions,
}

impl<'a> Normalizer<'a> {
    pub fn new(stripper: &'a dyn MarkdownStripper, options: &'a StripOptions) -> Self {
        Self { stripper, options }
    }

    /// Normalize `text`, protecting tokens whose id is in `assets`.
    pub fn normalize(&self, text: &str, assets: &AssetRegistry) -> String {
        self.normalize_with(text, |id| assets.contains(id))
    }

    /// Normalize `text`, protecting tokens for which `is_known(id)` holds.
    pub fn normalize_with(&self, text: &str, is_known: impl Fn(&str) -> bool) -> String {
        let stripped = self.strip_around_tokens(text, is_known);
        let s = outside_fences(&stripped, |chunk| {
            let s = remove_strong_pairs(chunk);
            let s = remove_emphasis_pairs(&s);
            let s = remove_code_pairs(&s);
            collapse_blank_lines(&s)
        });
        s.trim().to_string()
    }

    // ── Rule 1: Strip between protected tokens ───────────────────────────────

    fn strip_around_tokens(&self, text: &str, is_known: impl Fn(&str) -> bool) -> String {
        let mut out = String::with_capacity(text.len());
        let mut after_token = false;

        for piece in split_tokens(text, is_known) {
            match piece {
                Piece::Token(m) => {
                    // A token replaced a whole block; keep it on its own line.
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(m.text);
                    after_token = true;
                }
                Piece::Text(segment) => {
                    if segment.trim().is_empty() {
                        let breaks = newline_count(segment).clamp(1, 2);
                        push_newlines(&mut out, breaks);
                        after_token = false;
                        continue;
                    }

                    let lead = newline_count(leading_ws(segment)).min(2);
                    let lead = if after_token { lead.max(1) } else { lead };
                    let trail = newline_count(trailing_ws(segment)).min(2);

                    let core = segment.trim_matches(|c| c == '\n' || c == '\r');
                    let plain = self.stripper.strip(core, self.options);

                    if !out.is_empty() {
                        push_newlines(&mut out, lead);
                    }
                    out.push_str(&plain);
                    push_newlines(&mut out, trail);
                    after_token = false;
                }
            }
        }
        out
    }
}

fn leading_ws(s: &str) -> &str {
    &s[..s.len() - s.trim_start().len()]
}

fn trailing_ws(s: &str) -> &str {
    &s[s.trim_end().len()..]
}

fn newline_count(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

fn push_newlines(out: &mut String, n: usize) {
    for _ in 0..n {
        out.push('\n');
    }
}

/// Apply `rules` to every stretch of lines outside fenced regions.
///
/// Fenced regions are copied verbatim. At most one blank line is kept on
/// either side of a fence.
fn outside_fences(text: &str, rules: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut plain: Vec<&str> = Vec::new();
    let mut after_fence = false;

    for (unit, fenced) in fenced_aware_lines(text) {
        if !fenced {
            plain.push(unit);
            continue;
        }
        if !plain.is_empty() {
            push_plain(&mut out, &rules(&plain.join("\n")), after_fence);
            plain.clear();
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(unit);
        after_fence = true;
    }
    if !plain.is_empty() {
        push_plain(&mut out, &rules(&plain.join("\n")), after_fence);
    }
    out
}

fn push_plain(out: &mut String, chunk: &str, after_fence: bool) {
    if after_fence {
        // The chunk starts on the line after the fence.
        let body = chunk.trim_start_matches('\n');
        out.push('\n');
        if body.len() < chunk.len() {
            out.push('\n');
        }
        out.push_str(body);
    } else {
        out.push_str(chunk);
    }
}

// ── Rule 2: Leftover strong emphasis ─────────────────────────────────────────

static RE_STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());

fn remove_strong_pairs(input: &str) -> String {
    RE_STRONG.replace_all(input, "$1").into_owned()
}

// ── Rule 3: Leftover emphasis ────────────────────────────────────────────────

static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());

fn remove_emphasis_pairs(input: &str) -> String {
    RE_EMPHASIS.replace_all(input, "$1").into_owned()
}

// ── Rule 4: Leftover inline code ─────────────────────────────────────────────

static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.*?)`").unwrap());

fn remove_code_pairs(input: &str) -> String {
    RE_INLINE_CODE.replace_all(input, "$1").into_owned()
}

// ── Rule 5: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}
