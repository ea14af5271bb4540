//! Progress-callback trait for pipeline runs.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ThreadConfigBuilder::progress_callback`] to receive events
//! as each run lexes, rasterises and publishes.
//!
//! # Example
//!
//! ```rust
//! use edgequake_md2thread::{PipelineProgressCallback, ThreadConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_block_rendered(&self, _generation: u64, _block: usize, _total: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//! let config = ThreadConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline during a run.
///
/// Block events fire from concurrently running rasterisation tasks, in
/// completion order rather than source order. Implementations guard shared
/// state with atomics or a `Mutex`. Every method defaults to a no-op.
pub trait PipelineProgressCallback: Send + Sync {
    /// A run started.
    ///
    /// # Arguments
    /// * `generation`   — run generation
    /// * `total_blocks` — blocks that will be rasterised in this run
    fn on_run_start(&self, generation: u64, total_blocks: usize) {
        let _ = (generation, total_blocks);
    }

    /// A block was rendered into an image.
    fn on_block_rendered(&self, generation: u64, block: usize, total_blocks: usize) {
        let _ = (generation, block, total_blocks);
    }

    /// A block failed and will stay as text.
    fn on_block_failed(&self, generation: u64, block: usize, error: &str) {
        let _ = (generation, block, error);
    }

    /// A run finished and its snapshot was assembled.
    ///
    /// # Arguments
    /// * `post_count`   — posts in the snapshot
    /// * `failed_blocks` — blocks that degraded to text
    fn on_run_complete(&self, generation: u64, post_count: usize, failed_blocks: usize) {
        let _ = (generation, post_count, failed_blocks);
    }

    /// A session run finished after a newer one had started; its result was dropped.
    fn on_run_discarded(&self, generation: u64) {
        let _ = generation;
    }
}

/// A no-op implementation. Used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ThreadConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
