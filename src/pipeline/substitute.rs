//! Block substitution: rasterise every block concurrently, then replace each
//! rendered block's own byte span with its placeholder token.
//!
//! A block that fails (rasteriser error, timeout, panic, oversized image)
//! stays in the text as Markdown and is recorded as a [`BlockError`]. A
//! lexer failure leaves the whole document as plain text. Nothing here
//! fails the run.

use crate::config::ThreadConfig;
use crate::error::BlockError;
use crate::output::{AssetRegistry, ImageHandle, RenderedAsset, SubstitutedSpan};
use crate::pipeline::lexer::{Block, CmarkLexer, MarkdownLexer};
use crate::pipeline::placeholder::{placeholder_id, token};
use crate::pipeline::raster::{CardRasterizer, RasterError, SnippetRasterizer};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Output of [`substitute_blocks`].
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    /// Document with rendered blocks replaced by placeholder tokens.
    pub text: String,
    pub assets: AssetRegistry,
    /// One entry per replaced block, in source order.
    pub spans: Vec<SubstitutedSpan>,
    /// Blocks that stayed as text, in source order.
    pub failures: Vec<BlockError>,
    /// Blocks found by the lexer, rasterised or not.
    pub block_count: usize,
}

impl Substitution {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }
}

/// Lex `text`, rasterise its blocks and substitute the successful ones.
pub async fn substitute_blocks(text: &str, generation: u64, config: &ThreadConfig) -> Substitution {
    let default_lexer = CmarkLexer::default();
    let lexer: &dyn MarkdownLexer = config.lexer.as_deref().unwrap_or(&default_lexer);

    let blocks = match lexer.lex(text) {
        Ok(blocks) => blocks,
        Err(e) => {
            warn!("Lexer failed, treating run {} as plain text: {}", generation, e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_run_start(generation, 0);
            }
            return Substitution::unchanged(text);
        }
    };
    let block_count = blocks.len();

    let selected: Vec<Block> = blocks
        .into_iter()
        .filter(|b| config.rasterizes(b.kind()))
        .collect();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(generation, selected.len());
    }

    let mut results = rasterize_all(selected, generation, config).await;
    results.sort_by_key(|(block, _)| block.index);

    let mut out = Substitution {
        text: String::with_capacity(text.len()),
        block_count,
        ..Substitution::default()
    };
    let mut last = 0;

    for (block, result) in results {
        let image = match result {
            Ok(image) => image,
            Err(e) => {
                out.failures.push(e);
                continue;
            }
        };
        let span = block.span.clone();
        if span.start < last || text.get(span.clone()) != Some(block.raw.as_str()) {
            warn!(
                "Block {} has a span {:?} that does not match the document; left as text",
                block.index, span
            );
            continue;
        }

        let id = placeholder_id(generation, block.index);
        let kind = block.kind();
        out.text.push_str(&text[last..span.start]);
        out.text.push_str(&token(kind, &id));
        last = span.end;

        out.spans.push(SubstitutedSpan {
            id: id.clone(),
            kind,
            raw: span,
            raw_source: block.raw.clone(),
        });
        out.assets.insert(RenderedAsset {
            id,
            kind,
            image,
            block,
        });
    }
    out.text.push_str(&text[last..]);

    debug!(
        "Run {}: {} blocks, {} substituted, {} failed",
        generation,
        block_count,
        out.spans.len(),
        out.failures.len()
    );
    out
}

/// Rasterise every block at once; results arrive in completion order.
async fn rasterize_all(
    blocks: Vec<Block>,
    generation: u64,
    config: &ThreadConfig,
) -> Vec<(Block, Result<ImageHandle, BlockError>)> {
    let total = blocks.len();
    let rasterizer: Arc<dyn SnippetRasterizer> = config
        .rasterizer
        .clone()
        .unwrap_or_else(|| Arc::new(CardRasterizer));

    stream::iter(blocks.into_iter().map(|block| {
        let rasterizer = Arc::clone(&rasterizer);
        let config = config.clone();
        async move {
            let result = rasterize_one(rasterizer, &block, &config).await;
            if let Some(ref cb) = config.progress_callback {
                match &result {
                    Ok(_) => cb.on_block_rendered(generation, block.index, total),
                    Err(e) => cb.on_block_failed(generation, block.index, &e.to_string()),
                }
            }
            if let Err(ref e) = result {
                warn!("{}", e);
            }
            (block, result)
        }
    }))
    .buffer_unordered(total.max(1))
    .collect()
    .await
}

/// One block on its own task, so a panicking rasteriser only loses its block.
async fn rasterize_one(
    rasterizer: Arc<dyn SnippetRasterizer>,
    block: &Block,
    config: &ThreadConfig,
) -> Result<ImageHandle, BlockError> {
    let ms = config.raster_timeout_ms;
    let style = config.style.clone();
    let task_block = block.clone();
    let handle = tokio::spawn(async move {
        tokio::time::timeout(
            Duration::from_millis(ms),
            rasterizer.rasterize(&task_block, &style),
        )
        .await
    });

    let (index, kind) = (block.index, block.kind());
    let image = match handle.await {
        Ok(Ok(Ok(image))) => image,
        Ok(Ok(Err(RasterError::TooLarge { width, height, max }))) => {
            return Err(BlockError::TooLarge {
                block: index,
                kind,
                width,
                height,
                max,
            })
        }
        Ok(Ok(Err(e))) => {
            return Err(BlockError::RasterisationFailed {
                block: index,
                kind,
                detail: e.to_string(),
            })
        }
        Ok(Err(_elapsed)) => return Err(BlockError::Timeout { block: index, kind, ms }),
        Err(join) => {
            return Err(BlockError::RasterisationFailed {
                block: index,
                kind,
                detail: format!("rasteriser task failed: {join}"),
            })
        }
    };

    let max = config.max_image_px;
    if image.width > max || image.height > max {
        return Err(BlockError::TooLarge {
            block: index,
            kind,
            width: image.width,
            height: image.height,
            max,
        });
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lexer::{BlockKind, LexError};
    use crate::pipeline::raster::RasterStyle;
    use async_trait::async_trait;

    struct FixedRasterizer;

    #[async_trait]
    impl SnippetRasterizer for FixedRasterizer {
        async fn rasterize(&self, block: &Block, _style: &RasterStyle) -> Result<ImageHandle, RasterError> {
            if block.content().contains("FAIL") {
                return Err(RasterError::Other("refused".into()));
            }
            if block.content().contains("PANIC") {
                panic!("rasteriser blew up");
            }
            Ok(ImageHandle {
                mime_type: "image/png".into(),
                data: String::new(),
                width: 100,
                height: 50,
            })
        }
    }

    struct BrokenLexer;

    impl MarkdownLexer for BrokenLexer {
        fn lex(&self, _text: &str) -> Result<Vec<Block>, LexError> {
            Err(LexError::Other("nope".into()))
        }
    }

    fn config() -> ThreadConfig {
        ThreadConfig::builder()
            .rasterizer(Arc::new(FixedRasterizer))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_blocks_each_get_their_own_token() {
        let text = "```\nsame\n```\n\nmiddle\n\n```\nsame\n```";
        let sub = substitute_blocks(text, 1, &config()).await;
        assert_eq!(sub.text, "[Code Image 1-0]\n\nmiddle\n\n[Code Image 1-1]");
        assert_eq!(sub.assets.len(), 2);
        assert_eq!(sub.spans.len(), 2);
        assert_eq!(sub.spans[1].raw_source, "```\nsame\n```");
    }

    #[tokio::test]
    async fn failed_block_stays_as_text() {
        let text = "```\nFAIL\n```\n\n| a |\n|---|\n| 1 |";
        let sub = substitute_blocks(text, 3, &config()).await;
        assert_eq!(sub.text, "```\nFAIL\n```\n\n[Table Image 3-1]");
        assert_eq!(sub.failures.len(), 1);
        assert_eq!(sub.failures[0].block(), 0);
        assert!(sub.assets.contains("3-1"));
    }

    #[tokio::test]
    async fn panicking_rasteriser_only_loses_its_block() {
        let text = "```\nPANIC\n```\n\n```\nok\n```";
        let sub = substitute_blocks(text, 1, &config()).await;
        assert_eq!(sub.failures.len(), 1);
        assert_eq!(sub.assets.len(), 1);
        assert!(sub.text.starts_with("```\nPANIC\n```"));
    }

    #[tokio::test]
    async fn lexer_failure_means_plain_text() {
        let cfg = ThreadConfig::builder()
            .rasterizer(Arc::new(FixedRasterizer))
            .lexer(Arc::new(BrokenLexer))
            .build()
            .unwrap();
        let text = "```\ncode\n```";
        let sub = substitute_blocks(text, 1, &cfg).await;
        assert_eq!(sub.text, text);
        assert!(sub.assets.is_empty());
        assert!(sub.failures.is_empty());
    }

    #[tokio::test]
    async fn disabled_kind_is_left_alone() {
        let cfg = ThreadConfig::builder()
            .rasterizer(Arc::new(FixedRasterizer))
            .rasterize_tables(false)
            .build()
            .unwrap();
        let text = "| a |\n|---|\n| 1 |\n\n```\nx\n```";
        let sub = substitute_blocks(text, 2, &cfg).await;
        assert_eq!(sub.text, "| a |\n|---|\n| 1 |\n\n[Code Image 2-1]");
        assert_eq!(sub.block_count, 2);
        assert!(sub.failures.is_empty());
        assert_eq!(sub.spans[0].kind, BlockKind::Code);
    }

    #[tokio::test]
    async fn oversized_image_is_a_failure() {
        let cfg = ThreadConfig::builder()
            .rasterizer(Arc::new(FixedRasterizer))
            .max_image_px(64)
            .build()
            .unwrap();
        let sub = substitute_blocks("```\nx\n```", 1, &cfg).await;
        assert!(matches!(
            sub.failures[0],
            BlockError::TooLarge { width: 100, max: 64, .. }
        ));
    }
}
