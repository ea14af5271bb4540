//! Integration tests for the editing session.
//!
//! Time is paused, so debounce and throttle windows are driven explicitly
//! and slow rasterisers cost no wall-clock time.

use async_trait::async_trait;
use edgequake_md2thread::{
    snapshot_updates, Block, ImageHandle, PipelineProgressCallback, RasterError, RasterStyle, RunOutcome,
    SnippetRasterizer, ThreadConfig, ThreadSession,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_test::{assert_pending, task};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Takes a second for blocks containing `slow`, answers at once otherwise.
struct PacedRasterizer;

#[async_trait]
impl SnippetRasterizer for PacedRasterizer {
    async fn rasterize(&self, block: &Block, _style: &RasterStyle) -> Result<ImageHandle, RasterError> {
        if block.content().contains("slow") {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(ImageHandle {
            mime_type: "image/png".into(),
            data: String::new(),
            width: 1,
            height: 1,
        })
    }
}

#[derive(Default)]
struct Discards(AtomicUsize);

impl PipelineProgressCallback for Discards {
    fn on_run_discarded(&self, _generation: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn session_with(discards: Option<Arc<Discards>>) -> ThreadSession {
    let mut builder = ThreadConfig::builder()
        .rasterizer(Arc::new(PacedRasterizer))
        .raster_timeout_ms(60_000)
        .debounce_ms(500)
        .cursor_throttle_ms(100);
    if let Some(cb) = discards {
        builder = builder.progress_callback(cb);
    }
    ThreadSession::new(builder.build().unwrap())
}

fn session() -> ThreadSession {
    session_with(None)
}

// ── Debounce ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn edits_are_debounced_into_one_run() {
    let s = session();
    let mut rx = s.subscribe();

    s.edit("a");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(300)).await;
    s.edit("ab");
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(s.snapshot().generation, 0, "fired before the quiet period ended");
    assert_eq!(s.latest_generation(), 0);

    rx.changed().await.unwrap();
    let snap = s.snapshot();
    assert_eq!(snap.generation, 1);
    assert_eq!(snap.texts(), vec!["ab"]);
    assert_eq!(s.latest_generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_cancels_the_pending_timer() {
    let s = session();
    s.edit("now");
    let outcome = s.flush().await.unwrap();
    assert!(outcome.is_published());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(s.latest_generation(), 1, "debounce timer still fired");
    assert_eq!(s.snapshot().texts(), vec!["now"]);
}

// ── Last input wins ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_stale_run_never_overwrites_newer_result() {
    let discards = Arc::new(Discards::default());
    let s = session_with(Some(Arc::clone(&discards)));

    let slow = s.submit_now("old\n\n```\nslow\n```");
    let fast = s.submit_now("new");

    let fast = fast.await.unwrap();
    assert_eq!(
        fast,
        RunOutcome::Published {
            generation: 2,
            post_count: 1
        }
    );
    assert_eq!(s.snapshot().texts(), vec!["new"]);

    let slow = slow.await.unwrap();
    assert_eq!(slow, RunOutcome::Discarded { generation: 1, latest: 2 });
    assert_eq!(s.snapshot().generation, 2);
    assert_eq!(s.snapshot().texts(), vec!["new"]);
    assert!(s.snapshot().assets.is_empty());
    assert_eq!(discards.0.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn published_generations_only_increase() {
    let s = session();
    let mut updates = snapshot_updates(&s);

    let a = s.submit_now("one\n\n```\nslow\n```");
    let b = s.submit_now("two");
    let c = s.submit_now("three\n\n```\nslow\n```");
    let outcomes = [a.await.unwrap(), b.await.unwrap(), c.await.unwrap()];
    assert_eq!(
        outcomes.iter().filter(|o| o.is_published()).count(),
        1,
        "{outcomes:?}"
    );

    let published = updates.next().await.unwrap();
    assert_eq!(published.generation, 3);
    assert_eq!(published.texts(), vec!["three\n\n[Code Image 3-0]"]);
    assert!(published.asset("3-0").is_some());
}

// ── Cursor ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cursor_queries_are_throttled() {
    let s = session();
    let raw = "A\n§§§\nB";
    s.submit_now(raw).await.unwrap();
    let end = raw.chars().count();

    assert_eq!(s.cursor_moved(0), Some(0));
    assert_eq!(s.cursor_moved(end), Some(0), "inside the window the cached answer is kept");
    assert_eq!(s.active_post(end), Some(1));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(s.cursor_moved(end), Some(1));
}

#[tokio::test(start_paused = true)]
async fn last_move_inside_the_window_is_resolved_when_it_closes() {
    let s = session();
    let raw = "A\n§§§\nB";
    s.submit_now(raw).await.unwrap();
    let end = raw.chars().count();

    assert_eq!(s.cursor_moved(0), Some(0));
    let mut rx = s.subscribe_cursor();
    assert_eq!(s.cursor_moved(2), Some(0));
    assert_eq!(s.cursor_moved(end), Some(0));
    {
        let mut changed = task::spawn(rx.changed());
        assert_pending!(changed.poll());
    }
    assert_eq!(s.cursor_post(), Some(0));

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), Some(1));
    assert_eq!(s.cursor_post(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn final_cursor_position_wins() {
    let s = session();
    let raw = "A\n§§§\nB";
    s.submit_now(raw).await.unwrap();
    let end = raw.chars().count();

    assert_eq!(s.cursor_moved(0), Some(0));
    assert_eq!(s.cursor_moved(end), Some(0));
    tokio::time::advance(Duration::from_millis(150)).await;
    s.cursor_moved(0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(s.cursor_post(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn cursor_reads_published_snapshot_during_a_run() {
    let s = session();
    s.submit_now("A\n§§§\nB").await.unwrap();

    let pending = s.submit_now("A\n§§§\nB\n\n```\nslow\n```");
    assert_eq!(s.snapshot().generation, 1);
    assert_eq!(s.active_post(0), Some(0));
    assert!(pending.await.unwrap().is_published());
    assert_eq!(s.snapshot().generation, 2);
}

// ── Breaks ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn break_insertion_round_trips() {
    let s = session();
    s.submit_now("Hello world").await.unwrap();

    let (insertion, run) = s.insert_break(5);
    run.await.unwrap();
    assert_eq!(s.document(), "Hello\n§§§\n world");
    assert_eq!(s.snapshot().texts(), vec!["Hello", "world"]);

    let run = s.remove_break(insertion.range).expect("marker still there");
    run.await.unwrap();
    assert_eq!(s.document(), "Hello world");
    assert_eq!(s.snapshot().texts(), vec!["Hello world"]);
}
