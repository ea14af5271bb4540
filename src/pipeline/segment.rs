//! Segmentation: normalized text → ordered, length-bounded posts.
//!
//! ```text
//! text ──▶ units ──▶ candidates ──▶ posts
//!        (lines,    (split at      (≤ L kept whole,
//!         fences     marker lines)  else greedy by unit)
//!         atomic)
//! ```
//!
//! A fenced region is a single unit: its inner newlines are never split
//! points and a marker line inside it is ordinary content. A unit longer
//! than the limit is emitted on its own; it is never cut.

use crate::pipeline::breaks::is_marker_line;
use tracing::debug;

/// Splits normalized text into posts.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter<'a> {
    max_chars: usize,
    marker: &'a str,
}

impl<'a> Segmenter<'a> {
    pub fn new(max_chars: usize, marker: &'a str) -> Self {
        Self {
            max_chars: max_chars.max(1),
            marker,
        }
    }

    /// Posts in order. Each post is trimmed; empty posts are dropped.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let mut posts = Vec::new();
        for candidate in self.candidates(text) {
            let joined = candidate.join("\n");
            let trimmed = joined.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.chars().count() <= self.max_chars {
                posts.push(trimmed.to_string());
            } else {
                self.split_by_unit(&candidate, &mut posts);
            }
        }
        debug!("Segmented {} chars into {} posts", text.len(), posts.len());
        posts
    }

    /// Units grouped between marker lines.
    fn candidates<'t>(&self, text: &'t str) -> Vec<Vec<&'t str>> {
        let mut candidates = vec![Vec::new()];
        for unit in units(text) {
            if !unit.fenced && is_marker_line(unit.text, self.marker) {
                candidates.push(Vec::new());
            } else if let Some(current) = candidates.last_mut() {
                current.push(unit.text);
            }
        }
        candidates
    }

    /// Greedy accumulation: close the buffer when the next unit plus its
    /// separating newline would overflow it.
    fn split_by_unit(&self, units: &[&str], posts: &mut Vec<String>) {
        let mut buf = String::new();
        let mut buf_chars = 0usize;
        for unit in units {
            let unit_chars = unit.chars().count();
            if !buf.is_empty() && buf_chars + 1 + unit_chars > self.max_chars {
                push_trimmed(posts, &buf);
                buf.clear();
                buf.push_str(unit);
                buf_chars = unit_chars;
            } else if buf.is_empty() {
                buf.push_str(unit);
                buf_chars = unit_chars;
            } else {
                buf.push('\n');
                buf.push_str(unit);
                buf_chars += 1 + unit_chars;
            }
        }
        push_trimmed(posts, &buf);
    }
}

/// Segment with the given limit and marker.
pub fn segment(text: &str, max_chars: usize, marker: &str) -> Vec<String> {
    Segmenter::new(max_chars, marker).segment(text)
}

fn push_trimmed(posts: &mut Vec<String>, buf: &str) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        posts.push(trimmed.to_string());
    }
}

/// Units of `text` as `(text, fenced)` pairs.
pub(crate) fn fenced_aware_lines(text: &str) -> impl Iterator<Item = (&str, bool)> {
    units(text).into_iter().map(|u| (u.text, u.fenced))
}

struct Unit<'t> {
    text: &'t str,
    fenced: bool,
}

/// Lines of `text`, with each fenced region collapsed into one unit.
///
/// An unclosed fence runs to the end of the text.
fn units(text: &str) -> Vec<Unit<'_>> {
    let mut out = Vec::new();
    let mut fence: Option<(usize, &str)> = None;
    let mut pos = 0;

    for line in text.split('\n') {
        let line_start = pos;
        let line_end = pos + line.len();
        pos = line_end + 1;

        match fence {
            Some((start, opener)) => {
                if closes_fence(line, opener) {
                    out.push(Unit {
                        text: &text[start..line_end],
                        fenced: true,
                    });
                    fence = None;
                }
            }
            None => match fence_opener(line) {
                Some(opener) => fence = Some((line_start, opener)),
                None => out.push(Unit {
                    text: line,
                    fenced: false,
                }),
            },
        }
    }

    if let Some((start, _)) = fence {
        out.push(Unit {
            text: &text[start..],
            fenced: true,
        });
    }
    out
}

/// The fence run (three or more backticks or tildes) opening a fenced region.
fn fence_opener(line: &str) -> Option<&str> {
    let trimmed = line.trim_start_matches(' ');
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }
    let run = trimmed.len() - trimmed.trim_start_matches(first).len();
    (run >= 3).then(|| &trimmed[..run])
}

fn closes_fence(line: &str, opener: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with(opener) && trimmed.chars().all(|c| Some(c) == opener.chars().next())
}
