//! Placeholder tokens: `[Code Image <id>]` and `[Table Image <id>]`.
//!
//! A token stands in for a rasterised block inside the text that is being
//! normalised and segmented. It is plain text on purpose: consumers that
//! do not know about images still see a readable marker.

use crate::pipeline::lexer::BlockKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(Code|Table) Image ([A-Za-z0-9_-]+)\]").unwrap());

/// Build the literal token for a block.
pub fn token(kind: BlockKind, id: &str) -> String {
    format!("[{} Image {}]", kind.label(), id)
}

/// Short opaque id, unique within one run.
///
/// The generation prefix keeps ids from different runs apart, so a token
/// from a stale run never resolves against a newer registry.
pub fn placeholder_id(generation: u64, block_index: usize) -> String {
    format!("{generation:x}-{block_index:x}")
}

/// A placeholder occurrence in some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMatch<'a> {
    pub range: Range<usize>,
    pub kind: BlockKind,
    pub id: &'a str,
    pub text: &'a str,
}

/// All token-shaped substrings in `text`, registered or not.
pub fn find_tokens(text: &str) -> impl Iterator<Item = TokenMatch<'_>> {
    RE_PLACEHOLDER.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let kind = match caps.get(1)?.as_str() {
            "Code" => BlockKind::Code,
            _ => BlockKind::Table,
        };
        Some(TokenMatch {
            range: whole.range(),
            kind,
            id: caps.get(2)?.as_str(),
            text: whole.as_str(),
        })
    })
}

/// A run of plain text or a protected token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'a> {
    Text(&'a str),
    Token(TokenMatch<'a>),
}

/// Split `text` around the tokens for which `is_known(id)` holds.
///
/// Unknown token-shaped text (a user typing `[Code Image x]` by hand) stays
/// inside the surrounding text piece.
pub fn split_tokens<'a>(text: &'a str, is_known: impl Fn(&str) -> bool) -> Vec<Piece<'a>> {
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for m in find_tokens(text).filter(|m| is_known(m.id)) {
        if m.range.start > cursor {
            pieces.push(Piece::Text(&text[cursor..m.range.start]));
        }
        cursor = m.range.end;
        pieces.push(Piece::Token(m));
    }
    if cursor < text.len() {
        pieces.push(Piece::Text(&text[cursor..]));
    }
    pieces
}
