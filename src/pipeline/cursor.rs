//! Cursor tracking: raw cursor offset → index of the post being edited.
//!
//! The raw prefix before the cursor goes through the same substitution and
//! normalization as the document. Its length is then moved into cursor
//! space, where post `i` covers `[start, start + len]` and the next post
//! starts one past its end. A cursor exactly on a boundary belongs to the
//! earlier post.
//!
//! Posts are separated in the normalized text by blank lines or marker
//! lines, not by a single character. Positions are therefore moved into
//! cursor space through each post's real offset, so a cursor deep in a
//! long document does not drift into the next post.

use crate::output::{AssetRegistry, Post, PostSpan, SubstitutedSpan};
use crate::pipeline::breaks::char_to_byte;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::placeholder::token;

/// Cursor-space checkpoints for posts of the given character lengths.
pub fn post_spans(lengths: impl IntoIterator<Item = usize>) -> Vec<PostSpan> {
    let mut start = 0;
    lengths
        .into_iter()
        .map(|len| {
            let span = PostSpan {
                start,
                end: start + len,
            };
            start = span.end + 1;
            span
        })
        .collect()
}

/// First post whose inclusive span contains `pos`.
pub fn find_post(spans: &[PostSpan], pos: usize) -> Option<usize> {
    let idx = spans.partition_point(|s| s.end < pos);
    spans.get(idx).filter(|s| s.contains(pos)).map(|_| idx)
}

/// Move a normalized-text position into cursor space.
///
/// A position between two posts (on a separator or marker line) maps to
/// the end of the earlier post.
pub fn to_cursor_space(posts: &[Post], normalized_pos: usize) -> usize {
    let idx = posts.partition_point(|p| p.offset <= normalized_pos);
    let Some(post) = idx.checked_sub(1).and_then(|i| posts.get(i)) else {
        return 0;
    };
    let local = normalized_pos - post.offset;
    if local <= post.char_count {
        post.span.start + local
    } else {
        post.span.end
    }
}

/// Projects raw cursor offsets into normalized text.
pub struct CursorProjector<'a> {
    pub normalizer: Normalizer<'a>,
    pub assets: &'a AssetRegistry,
    pub substitutions: &'a [SubstitutedSpan],
}

impl CursorProjector<'_> {
    /// Normalized length of `raw[..cursor]`, where `cursor` counts chars.
    ///
    /// A block the cursor sits inside counts as its whole placeholder.
    /// Substitutions whose span no longer matches `raw` are ignored, so a
    /// document edited since the snapshot was built degrades gracefully.
    pub fn project(&self, raw: &str, cursor: usize) -> usize {
        let cut = char_to_byte(raw, cursor);
        let prefix = self.substituted_prefix(raw, cut);
        self.normalizer
            .normalize(&prefix, self.assets)
            .chars()
            .count()
    }

    fn substituted_prefix(&self, raw: &str, cut: usize) -> String {
        let mut out = String::with_capacity(cut);
        let mut last = 0;
        for sub in self.substitutions {
            if sub.raw.start >= cut {
                break;
            }
            if sub.raw.start < last || raw.get(sub.raw.clone()) != Some(sub.raw_source.as_str()) {
                continue;
            }
            out.push_str(&raw[last..sub.raw.start]);
            out.push_str(&token(sub.kind, &sub.id));
            last = sub.raw.end;
            if last >= cut {
                return out;
            }
        }
        out.push_str(&raw[last..cut]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lexer::BlockKind;
    use crate::pipeline::strip::{CmarkStripper, StripOptions};

    #[test]
    fn spans_leave_one_separator() {
        let spans = post_spans([3, 5, 1]);
        assert_eq!(
            spans,
            vec![
                PostSpan { start: 0, end: 3 },
                PostSpan { start: 4, end: 9 },
                PostSpan { start: 10, end: 11 },
            ]
        );
    }

    #[test]
    fn boundary_goes_to_earlier_post() {
        let spans = post_spans([3, 5]);
        assert_eq!(find_post(&spans, 3), Some(0));
        assert_eq!(find_post(&spans, 4), Some(1));
        assert_eq!(find_post(&spans, 0), Some(0));
        assert_eq!(find_post(&spans, 9), Some(1));
        assert_eq!(find_post(&spans, 10), None);
        assert_eq!(find_post(&[], 0), None);
    }

    fn post(offset: usize, len: usize, span: PostSpan) -> Post {
        Post {
            index: 0,
            text: "x".repeat(len),
            char_count: len,
            offset,
            span,
            assets: Vec::new(),
        }
    }

    #[test]
    fn cursor_space_skips_separators() {
        // "AAA\n\nBB": posts at offsets 0 and 5.
        let spans = post_spans([3, 2]);
        let posts = vec![post(0, 3, spans[0]), post(5, 2, spans[1])];
        assert_eq!(to_cursor_space(&posts, 0), 0);
        assert_eq!(to_cursor_space(&posts, 3), 3);
        assert_eq!(to_cursor_space(&posts, 4), 3);
        assert_eq!(to_cursor_space(&posts, 5), 4);
        assert_eq!(to_cursor_space(&posts, 7), 6);
        assert_eq!(to_cursor_space(&[], 7), 0);
    }

    fn projector<'a>(
        options: &'a StripOptions,
        assets: &'a AssetRegistry,
        subs: &'a [SubstitutedSpan],
    ) -> CursorProjector<'a> {
        CursorProjector {
            normalizer: Normalizer::new(&CmarkStripper, options),
            assets,
            substitutions: subs,
        }
    }

    #[test]
    fn projection_drops_markup() {
        let options = StripOptions::default();
        let assets = AssetRegistry::new();
        let p = projector(&options, &assets, &[]);
        assert_eq!(p.project("**A**\n§§§\nB", 100), 7);
        assert_eq!(p.project("**A**", 2), 0);
        assert_eq!(p.project("**A**", 5), 1);
    }

    #[test]
    fn stale_substitution_is_ignored() {
        let options = StripOptions::default();
        let assets = AssetRegistry::new();
        let subs = vec![SubstitutedSpan {
            id: "1-0".into(),
            kind: BlockKind::Code,
            raw: 0..3,
            raw_source: "xyz".into(),
        }];
        let p = projector(&options, &assets, &subs);
        assert_eq!(p.project("abc", 3), 3);
    }

    #[test]
    fn prefix_substitutes_blocks_before_and_around_cursor() {
        let options = StripOptions::default();
        let assets = AssetRegistry::new();
        let raw = "Hi\n\n```\ncode\n```\n\nBye";
        let subs = vec![SubstitutedSpan {
            id: "1-0".into(),
            kind: BlockKind::Code,
            raw: 4..16,
            raw_source: raw[4..16].to_string(),
        }];
        let p = projector(&options, &assets, &subs);
        assert_eq!(p.substituted_prefix(raw, 2), "Hi");
        assert_eq!(p.substituted_prefix(raw, 8), "Hi\n\n[Code Image 1-0]");
        assert_eq!(p.substituted_prefix(raw, raw.len()), "Hi\n\n[Code Image 1-0]\n\nBye");
    }
}
