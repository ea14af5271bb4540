//! One-shot conversion entry points.
//!
//! Use these when the whole document is at hand and nobody is typing into
//! it. Interactive editors should hold a [`crate::session::ThreadSession`]
//! instead, which debounces edits and drops results of superseded runs.

use crate::config::ThreadConfig;
use crate::error::Md2ThreadError;
use crate::output::ThreadSnapshot;
use crate::pipeline::{input, run};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Generation used by one-shot conversions.
///
/// Placeholder ids embed it, so a fresh conversion of the same text always
/// yields the same ids.
pub const ONE_SHOT_GENERATION: u64 = 1;

/// Convert a Markdown document into a thread.
///
/// Never fails: blocks that cannot be rasterised stay in the text and are
/// listed on [`ThreadSnapshot::failures`].
pub async fn convert(markdown: impl AsRef<str>, config: &ThreadConfig) -> ThreadSnapshot {
    run::run_pipeline(markdown.as_ref(), ONE_SHOT_GENERATION, config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally, so it must not be called
/// from inside another runtime.
pub fn convert_sync(
    markdown: impl AsRef<str>,
    config: &ThreadConfig,
) -> Result<ThreadSnapshot, Md2ThreadError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| Md2ThreadError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(convert(markdown, config)))
}

/// Read a Markdown file and convert it.
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &ThreadConfig,
) -> Result<ThreadSnapshot, Md2ThreadError> {
    let path = path.as_ref();
    info!("Converting {}", path.display());
    let markdown = input::read_markdown_file(path)?;
    Ok(convert(markdown, config).await)
}

/// Write every rendered asset of `snapshot` into `dir` as `<id>.<ext>`.
///
/// Files are written to a temporary name and renamed into place, so a
/// reader never sees a half-written image. Returns the written paths in id
/// order.
pub async fn write_assets(
    snapshot: &ThreadSnapshot,
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, Md2ThreadError> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Md2ThreadError::AssetWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let mut written = Vec::with_capacity(snapshot.assets.len());
    for asset in snapshot.assets.iter() {
        let bytes = asset
            .image
            .decode()
            .map_err(|e| Md2ThreadError::AssetDecodeFailed {
                id: asset.id.clone(),
                detail: e.to_string(),
            })?;

        let path = dir.join(format!("{}.{}", asset.id, asset.image.extension()));
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| Md2ThreadError::AssetWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
            }
            return Err(Md2ThreadError::AssetWriteFailed { path, source: e });
        }

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ImageHandle;
    use crate::pipeline::lexer::Block;
    use crate::pipeline::raster::{RasterError, RasterStyle, SnippetRasterizer};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Arc;

    struct BytesRasterizer(String);

    #[async_trait]
    impl SnippetRasterizer for BytesRasterizer {
        async fn rasterize(&self, _block: &Block, _style: &RasterStyle) -> Result<ImageHandle, RasterError> {
            Ok(ImageHandle {
                mime_type: "image/png".into(),
                data: self.0.clone(),
                width: 2,
                height: 2,
            })
        }
    }

    fn config(data: &str) -> ThreadConfig {
        ThreadConfig::builder()
            .rasterizer(Arc::new(BytesRasterizer(data.to_string())))
            .build()
            .unwrap()
    }

    const DOC: &str = "Intro\n\n```sh\nls\n```\n\n| a | b |\n|---|---|\n| 1 | 2 |\n";

    #[tokio::test]
    async fn writes_one_file_per_asset() {
        let snap = convert(DOC, &config(&STANDARD.encode(b"png"))).await;
        assert_eq!(snap.assets.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let paths = write_assets(&snap, dir.path().join("assets")).await.unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert_eq!(std::fs::read(path).unwrap(), b"png");
            assert_eq!(path.extension().unwrap(), "png");
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("assets"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let snap = convert(DOC, &config(&STANDARD.encode(b"png"))).await;
        let dir = tempfile::tempdir().unwrap();
        // A directory where the first image should go makes the rename fail.
        std::fs::create_dir(dir.path().join("1-0.png")).unwrap();

        let err = write_assets(&snap, dir.path()).await.unwrap_err();
        assert!(matches!(err, Md2ThreadError::AssetWriteFailed { .. }));
        assert!(!dir.path().join("1-0.tmp").exists());
    }

    #[tokio::test]
    async fn undecodable_asset_is_reported() {
        let snap = convert(DOC, &config("!!not base64!!")).await;
        let dir = tempfile::tempdir().unwrap();
        let err = write_assets(&snap, dir.path()).await.unwrap_err();
        assert!(matches!(err, Md2ThreadError::AssetDecodeFailed { .. }));
    }

    #[tokio::test]
    async fn convert_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Title\n\nBody").unwrap();
        let snap = convert_file(&path, &config("")).await.unwrap();
        assert_eq!(snap.texts(), vec!["Title\n\nBody"]);
        assert_eq!(snap.generation, ONE_SHOT_GENERATION);
    }

    #[tokio::test]
    async fn convert_file_missing() {
        let err = convert_file("/nonexistent/notes.md", &config("")).await.unwrap_err();
        assert!(matches!(err, Md2ThreadError::FileNotFound { .. }));
    }

    #[test]
    fn sync_wrapper_runs_outside_runtime() {
        let snap = convert_sync("Hello", &config("")).unwrap();
        assert_eq!(snap.texts(), vec!["Hello"]);
    }
}
