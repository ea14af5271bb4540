//! The break marker micro-syntax.
//!
//! A line that contains only the marker (default `§§§`, surrounding spaces
//! and tabs allowed) ends a post. Inside a fenced region it is plain
//! content. Insertion adds line breaks only where needed and reports the
//! exact inserted range, so removing that range restores the document
//! byte for byte.

use crate::pipeline::segment::fenced_aware_lines;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Is `line` a break line for `marker`?
pub fn is_marker_line(line: &str, marker: &str) -> bool {
    !marker.is_empty() && line.trim_matches([' ', '\t', '\r']) == marker
}

/// Result of [`insert_break`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakInsertion {
    /// Document with the marker inserted.
    pub text: String,
    /// Byte range of everything that was inserted (marker plus any line breaks).
    pub range: Range<usize>,
    /// Character offset just after the inserted text.
    pub cursor: usize,
}

/// Insert `marker` on its own line at character offset `char_offset`
/// (clamped to the end of `text`).
pub fn insert_break(text: &str, char_offset: usize, marker: &str) -> BreakInsertion {
    let at = char_to_byte(text, char_offset);
    let (before, after) = text.split_at(at);

    let mut inserted = String::with_capacity(marker.len() + 2);
    if !before.is_empty() && !before.ends_with('\n') {
        inserted.push('\n');
    }
    inserted.push_str(marker);
    if !after.starts_with('\n') {
        inserted.push('\n');
    }

    let mut out = String::with_capacity(text.len() + inserted.len());
    out.push_str(before);
    out.push_str(&inserted);
    out.push_str(after);

    BreakInsertion {
        cursor: before.chars().count() + inserted.chars().count(),
        range: at..at + inserted.len(),
        text: out,
    }
}

/// Undo an insertion by deleting `range`.
///
/// Returns `None` if `range` is not a valid byte range of `text`.
pub fn remove_break(text: &str, range: Range<usize>) -> Option<String> {
    if range.start > range.end || !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
        return None;
    }
    let mut out = String::with_capacity(text.len() - (range.end - range.start));
    out.push_str(&text[..range.start]);
    out.push_str(&text[range.end..]);
    Some(out)
}

/// Number of marker lines outside fenced regions.
pub fn count_breaks(text: &str, marker: &str) -> usize {
    fenced_aware_lines(text)
        .filter(|(line, fenced)| !fenced && is_marker_line(line, marker))
        .count()
}

/// Byte index of character `char_offset`, clamped to `text.len()`.
pub(crate) fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}
