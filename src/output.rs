//! Output types: posts, rendered assets and the published snapshot.
//!
//! A [`ThreadSnapshot`] is immutable once built. Sessions publish it behind
//! an `Arc`, so readers never see posts from one run next to assets from
//! another.

use crate::error::{BlockError, Md2ThreadError};
use crate::pipeline::lexer::{Block, BlockKind};
use crate::pipeline::placeholder::{split_tokens, Piece};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// An encoded image. `data` is base64 without the `data:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub mime_type: String,
    pub data: String,
    pub width: u32,
    pub height: u32,
}

impl ImageHandle {
    /// `data:<mime>;base64,<data>`, ready for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Raw image bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            _ => "png",
        }
    }
}

/// A block that was rendered into an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedAsset {
    pub id: String,
    pub kind: BlockKind,
    pub image: ImageHandle,
    /// The source block, kept for alt text and re-rendering.
    pub block: Block,
}

/// Placeholder id → rendered asset. Rebuilt wholesale on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRegistry(BTreeMap<String, RenderedAsset>);

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, asset: RenderedAsset) {
        self.0.insert(asset.id.clone(), asset);
    }

    pub fn get(&self, id: &str) -> Option<&RenderedAsset> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Assets in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderedAsset> {
        self.0.values()
    }
}

/// Where a substituted block sat in the raw document.
///
/// The cursor tracker uses these to project raw cursor offsets into the
/// normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutedSpan {
    pub id: String,
    pub kind: BlockKind,
    /// Byte range in the raw document.
    pub raw: Range<usize>,
    /// The exact raw text that was replaced.
    pub raw_source: String,
}

/// Character range of a post in cursor space.
///
/// Consecutive posts satisfy `next.start == prev.end + 1`; the extra
/// position stands for whatever separated the two posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSpan {
    pub start: usize,
    pub end: usize,
}

impl PostSpan {
    /// Inclusive on both ends.
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }
}

/// One post of the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Position in the thread, 0-based.
    pub index: usize,
    /// Post text, placeholders included.
    pub text: String,
    /// Length of `text` in characters.
    pub char_count: usize,
    /// Character offset of `text` inside [`ThreadSnapshot::normalized`].
    pub offset: usize,
    pub span: PostSpan,
    /// Ids of the assets referenced by this post, in order of appearance.
    pub assets: Vec<String>,
}

/// A piece of a post for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPart<'a> {
    Text(&'a str),
    Asset { id: &'a str, kind: BlockKind },
}

static RE_EXTRA_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

impl Post {
    /// Whether the post exceeds `max_chars` (possible only for a single
    /// unsplittable unit).
    pub fn is_oversized(&self, max_chars: usize) -> bool {
        self.char_count > max_chars
    }

    /// Split into text runs and asset references, in order.
    ///
    /// Only ids this post references are treated as assets; other
    /// token-shaped text stays text.
    pub fn parts(&self) -> Vec<PostPart<'_>> {
        split_tokens(&self.text, |id| self.assets.iter().any(|a| a == id))
            .into_iter()
            .map(|piece| match piece {
                Piece::Text(t) => PostPart::Text(t),
                Piece::Token(m) => PostPart::Asset {
                    id: m.id,
                    kind: m.kind,
                },
            })
            .collect()
    }

    /// The post text without image placeholders, as pasted into a
    /// platform that receives the images separately.
    pub fn plain_text(&self) -> String {
        let mut text = String::with_capacity(self.text.len());
        for part in self.parts() {
            if let PostPart::Text(t) = part {
                text.push_str(t);
            }
        }
        RE_EXTRA_BLANKS
            .replace_all(&text, "\n\n")
            .trim()
            .to_string()
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    /// Characters in the raw document.
    pub source_chars: usize,
    /// Characters in the normalized text.
    pub normalized_chars: usize,
    pub post_count: usize,
    /// Blocks found by the lexer.
    pub block_count: usize,
    pub rendered_blocks: usize,
    pub failed_blocks: usize,
    /// Posts longer than the limit.
    pub oversized_posts: usize,
    pub elapsed_ms: u64,
}

/// Result of one pipeline run. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Run generation. 0 for the empty initial snapshot.
    pub generation: u64,
    pub posts: Vec<Post>,
    pub assets: AssetRegistry,
    /// Full normalized text the posts were cut from.
    pub normalized: String,
    pub substitutions: Vec<SubstitutedSpan>,
    /// Blocks that degraded to text.
    pub failures: Vec<BlockError>,
    pub stats: ThreadStats,
}

impl ThreadSnapshot {
    /// The snapshot a session holds before its first run.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn post(&self, index: usize) -> Option<&Post> {
        self.posts.get(index)
    }

    /// Post texts only, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.posts.iter().map(|p| p.text.as_str()).collect()
    }

    /// The asset a post references, resolved through this snapshot's registry.
    pub fn asset(&self, id: &str) -> Option<&RenderedAsset> {
        self.assets.get(id)
    }

    /// Serialise to pretty JSON.
    pub fn to_json(&self) -> Result<String, Md2ThreadError> {
        serde_json::to_string_pretty(self).map_err(|e| Md2ThreadError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lexer::BlockPayload;

    fn post(text: &str, assets: &[&str]) -> Post {
        Post {
            index: 0,
            text: text.to_string(),
            char_count: text.chars().count(),
            offset: 0,
            span: PostSpan {
                start: 0,
                end: text.chars().count(),
            },
            assets: assets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parts_split_registered_tokens() {
        let p = post("Look:\n[Code Image 1-0]\nNice", &["1-0"]);
        assert_eq!(
            p.parts(),
            vec![
                PostPart::Text("Look:\n"),
                PostPart::Asset {
                    id: "1-0",
                    kind: BlockKind::Code
                },
                PostPart::Text("\nNice"),
            ]
        );
    }

    #[test]
    fn parts_leave_unknown_tokens_as_text() {
        let p = post("typed [Code Image nope] by hand", &[]);
        assert_eq!(p.parts(), vec![PostPart::Text("typed [Code Image nope] by hand")]);
    }

    #[test]
    fn plain_text_drops_placeholders() {
        let p = post("Before\n\n[Table Image 2-1]\n\nAfter", &["2-1"]);
        assert_eq!(p.plain_text(), "Before\n\nAfter");
    }

    #[test]
    fn plain_text_of_image_only_post_is_empty() {
        let p = post("[Code Image 2-0]", &["2-0"]);
        assert_eq!(p.plain_text(), "");
    }

    #[test]
    fn post_span_is_inclusive() {
        let span = PostSpan { start: 5, end: 10 };
        assert!(span.contains(5));
        assert!(span.contains(10));
        assert!(!span.contains(11));
    }

    #[test]
    fn image_handle_data_url_and_decode() {
        let handle = ImageHandle {
            mime_type: "image/png".into(),
            data: STANDARD.encode([1u8, 2, 3]),
            width: 1,
            height: 1,
        };
        assert!(handle.to_data_url().starts_with("data:image/png;base64,"));
        assert_eq!(handle.decode().unwrap(), vec![1, 2, 3]);
        assert_eq!(handle.extension(), "png");
    }

    #[test]
    fn registry_lookup() {
        let mut reg = AssetRegistry::new();
        reg.insert(RenderedAsset {
            id: "1-0".into(),
            kind: BlockKind::Code,
            image: ImageHandle {
                mime_type: "image/png".into(),
                data: String::new(),
                width: 1,
                height: 1,
            },
            block: Block {
                index: 0,
                span: 0..3,
                raw: "```".into(),
                payload: BlockPayload::Code {
                    language: None,
                    code: String::new(),
                },
            },
        });
        assert!(reg.contains("1-0"));
        assert!(!reg.contains("1-1"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn empty_snapshot_serialises() {
        let json = ThreadSnapshot::empty().to_json().unwrap();
        assert!(json.contains("\"generation\": 0"));
    }
}
