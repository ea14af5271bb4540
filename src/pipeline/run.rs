//! One pipeline run: document → immutable [`ThreadSnapshot`].
//!
//! Runs never fail. Every degradation (lexer error, failed block) is
//! absorbed into the snapshot, so callers always have something to show.

use crate::config::ThreadConfig;
use crate::output::{Post, PostSpan, ThreadSnapshot, ThreadStats};
use crate::pipeline::cursor::{find_post, post_spans, to_cursor_space, CursorProjector};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::placeholder::find_tokens;
use crate::pipeline::segment::Segmenter;
use crate::pipeline::strip::{CmarkStripper, MarkdownStripper};
use crate::pipeline::substitute::{substitute_blocks, Substitution};
use std::time::Instant;
use tracing::info;

/// Run every stage over `text` and build the snapshot for `generation`.
pub async fn run_pipeline(text: &str, generation: u64, config: &ThreadConfig) -> ThreadSnapshot {
    let started = Instant::now();
    info!("Run {} started: {} chars", generation, text.chars().count());

    // ── Step 1: Lex, rasterise, substitute ───────────────────────────────
    let substitution = substitute_blocks(text, generation, config).await;

    // ── Step 2: Normalize, segment, assemble ─────────────────────────────
    let snapshot = assemble(text, generation, substitution, config, started);

    info!(
        "Run {} complete: {} posts, {}/{} blocks rendered, {}ms",
        generation,
        snapshot.stats.post_count,
        snapshot.stats.rendered_blocks,
        snapshot.stats.block_count,
        snapshot.stats.elapsed_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(generation, snapshot.posts.len(), snapshot.failures.len());
    }
    snapshot
}

fn assemble(
    text: &str,
    generation: u64,
    substitution: Substitution,
    config: &ThreadConfig,
    started: Instant,
) -> ThreadSnapshot {
    let Substitution {
        text: substituted,
        assets,
        spans: substitutions,
        failures,
        block_count,
    } = substitution;

    let default_stripper = CmarkStripper;
    let stripper = stripper_for(config, &default_stripper);
    let normalized = Normalizer::new(stripper, &config.strip).normalize(&substituted, &assets);

    let texts = Segmenter::new(config.max_post_chars, &config.break_marker).segment(&normalized);
    let spans = post_spans(texts.iter().map(|t| t.chars().count()));
    let offsets = post_offsets(&normalized, &texts);

    let posts: Vec<Post> = texts
        .into_iter()
        .zip(spans)
        .zip(offsets)
        .enumerate()
        .map(|(index, ((text, span), offset))| {
            let post_assets = find_tokens(&text)
                .filter(|m| assets.contains(m.id))
                .map(|m| m.id.to_string())
                .collect();
            Post {
                index,
                char_count: span.end - span.start,
                text,
                offset,
                span,
                assets: post_assets,
            }
        })
        .collect();

    let stats = ThreadStats {
        source_chars: text.chars().count(),
        normalized_chars: normalized.chars().count(),
        post_count: posts.len(),
        block_count,
        rendered_blocks: assets.len(),
        failed_blocks: failures.len(),
        oversized_posts: posts
            .iter()
            .filter(|p| p.is_oversized(config.max_post_chars))
            .count(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    ThreadSnapshot {
        generation,
        posts,
        assets,
        normalized,
        substitutions,
        failures,
        stats,
    }
}

/// Character offset of each post inside `normalized`.
///
/// Posts appear in order, so each search resumes where the previous post
/// ended. A post that cannot be found verbatim is placed right after the
/// previous one.
fn post_offsets(normalized: &str, texts: &[String]) -> Vec<usize> {
    let mut byte_cursor = 0;
    let mut char_cursor = 0;
    texts
        .iter()
        .map(|text| match normalized[byte_cursor..].find(text.as_str()) {
            Some(found) => {
                let start = byte_cursor + found;
                char_cursor += normalized[byte_cursor..start].chars().count();
                let offset = char_cursor;
                byte_cursor = start + text.len();
                char_cursor += text.chars().count();
                offset
            }
            None => {
                let offset = char_cursor;
                char_cursor += text.chars().count();
                offset
            }
        })
        .collect()
}

/// Index of the post containing raw cursor offset `cursor` (in chars).
///
/// `raw` should be the document `snapshot` was built from. Substitutions
/// that no longer match it are skipped, so a slightly newer document still
/// maps sensibly.
pub fn active_post(
    snapshot: &ThreadSnapshot,
    raw: &str,
    cursor: usize,
    config: &ThreadConfig,
) -> Option<usize> {
    if snapshot.posts.is_empty() {
        return None;
    }
    let default_stripper = CmarkStripper;
    let projector = CursorProjector {
        normalizer: Normalizer::new(stripper_for(config, &default_stripper), &config.strip),
        assets: &snapshot.assets,
        substitutions: &snapshot.substitutions,
    };
    let pos = to_cursor_space(&snapshot.posts, projector.project(raw, cursor));
    let spans: Vec<PostSpan> = snapshot.posts.iter().map(|p| p.span).collect();
    find_post(&spans, pos)
}

fn stripper_for<'a>(
    config: &'a ThreadConfig,
    default: &'a CmarkStripper,
) -> &'a dyn MarkdownStripper {
    match config.stripper.as_deref() {
        Some(stripper) => stripper,
        None => default,
    }
}
