//! Editing session: debounced recompute with last-input-wins publication.
//!
//! ## Concurrency model
//!
//! ```text
//! edit ──▶ debounce timer ──▶ run (gen N) ──┐
//! edit ──▶ (timer re-armed)                 ├──▶ publish if N is the latest
//! flush ───────────────────▶ run (gen N+1) ─┘    started and newer than shown
//! ```
//!
//! * Re-arming the debounce only aborts the pending *timer*. A run that
//!   already started is never cancelled; it finishes and is discarded if a
//!   newer run started meanwhile.
//! * Generations are taken when a run starts, so they follow start order.
//! * Publication swaps one `Arc<ThreadSnapshot>` inside a `watch` channel.
//!   Posts and assets of a snapshot always arrive together.
//! * Cursor queries read the published snapshot only. They never wait on a
//!   run in flight.
//! * Cursor moves are throttled on both edges: the first move in a window
//!   is answered at once, the last one is answered when the window closes
//!   and published on [`ThreadSession::subscribe_cursor`].
//!
//! All methods that start work spawn tokio tasks, so they must be called
//! from within a tokio runtime.

use crate::config::ThreadConfig;
use crate::output::ThreadSnapshot;
use crate::pipeline::breaks::{self, is_marker_line, BreakInsertion};
use crate::pipeline::run;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// What became of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The snapshot is now the session's current one.
    Published { generation: u64, post_count: usize },
    /// A newer run started before this one finished.
    Discarded { generation: u64, latest: u64 },
}

impl RunOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            RunOutcome::Published { generation, .. } | RunOutcome::Discarded { generation, .. } => *generation,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, RunOutcome::Published { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct CursorSample {
    at: Instant,
    post: Option<usize>,
}

#[derive(Default)]
struct CursorThrottle {
    sample: Option<CursorSample>,
    /// Latest offset seen inside the current window.
    pending: Option<usize>,
    trailing: Option<JoinHandle<()>>,
}

struct Inner {
    config: ThreadConfig,
    document: Mutex<String>,
    /// Highest generation handed out so far.
    started: AtomicU64,
    snapshot_tx: watch::Sender<Arc<ThreadSnapshot>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every re-arm or cancel; a timer only fires if its ticket
    /// is still current.
    debounce_ticket: AtomicU64,
    cursor: Mutex<CursorThrottle>,
    cursor_tx: watch::Sender<Option<usize>>,
}

/// A live document and the thread derived from it.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct ThreadSession {
    inner: Arc<Inner>,
}

impl ThreadSession {
    /// New session with an empty document and the empty snapshot.
    pub fn new(config: ThreadConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(ThreadSnapshot::empty()));
        let (cursor_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                document: Mutex::new(String::new()),
                started: AtomicU64::new(0),
                snapshot_tx,
                pending: Mutex::new(None),
                debounce_ticket: AtomicU64::new(0),
                cursor: Mutex::new(CursorThrottle::default()),
                cursor_tx,
            }),
        }
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.inner.config
    }

    /// Replace the document and (re)arm the debounce timer.
    pub fn edit(&self, text: impl Into<String>) {
        *lock(&self.inner.document) = text.into();
        self.arm_debounce();
    }

    /// Cancel any pending debounce and run on the current document now.
    pub fn flush(&self) -> JoinHandle<RunOutcome> {
        self.cancel_pending();
        start_run(&self.inner)
    }

    /// Replace the document and run immediately, skipping the debounce.
    pub fn submit_now(&self, text: impl Into<String>) -> JoinHandle<RunOutcome> {
        *lock(&self.inner.document) = text.into();
        self.flush()
    }

    /// The current document.
    pub fn document(&self) -> String {
        lock(&self.inner.document).clone()
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> Arc<ThreadSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every publication.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ThreadSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Highest generation started so far. 0 before the first run.
    pub fn latest_generation(&self) -> u64 {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Post containing raw cursor offset `cursor` (in chars), unthrottled.
    pub fn active_post(&self, cursor: usize) -> Option<usize> {
        self.inner.active_post(cursor)
    }

    /// Throttled [`Self::active_post`] for cursor-move events.
    ///
    /// Within `cursor_throttle_ms` of the last computed answer the cached
    /// answer is returned without touching the snapshot, and the offset is
    /// remembered. When the window closes the last remembered offset is
    /// resolved and published on [`Self::subscribe_cursor`].
    pub fn cursor_moved(&self, cursor: usize) -> Option<usize> {
        let window = Duration::from_millis(self.inner.config.cursor_throttle_ms);
        let now = Instant::now();
        let mut throttle = lock(&self.inner.cursor);

        if let Some(sample) = throttle.sample {
            if now.duration_since(sample.at) < window {
                throttle.pending = Some(cursor);
                if throttle.trailing.is_none() {
                    throttle.trailing = Some(schedule_trailing(&self.inner, sample.at + window));
                }
                return sample.post;
            }
        }

        throttle.pending = None;
        if let Some(trailing) = throttle.trailing.take() {
            trailing.abort();
        }
        let post = self.inner.active_post(cursor);
        self.inner.record_cursor(&mut throttle, now, post);
        post
    }

    /// Latest throttled answer, including trailing updates.
    pub fn cursor_post(&self) -> Option<usize> {
        *self.inner.cursor_tx.borrow()
    }

    /// Receiver notified whenever the throttled active post changes.
    pub fn subscribe_cursor(&self) -> watch::Receiver<Option<usize>> {
        self.inner.cursor_tx.subscribe()
    }

    /// Insert the break marker at character offset `cursor` and run now.
    ///
    /// Pass the returned [`BreakInsertion::range`] to [`Self::remove_break`]
    /// to undo it.
    pub fn insert_break(&self, cursor: usize) -> (BreakInsertion, JoinHandle<RunOutcome>) {
        let insertion = {
            let mut document = lock(&self.inner.document);
            let insertion = breaks::insert_break(&document, cursor, &self.inner.config.break_marker);
            *document = insertion.text.clone();
            insertion
        };
        debug!("Inserted break at byte {}", insertion.range.start);
        (insertion, self.flush())
    }

    /// Remove a break previously inserted at `range` and run now.
    ///
    /// Returns `None`, leaving the document untouched, when `range` no
    /// longer holds a marker line.
    pub fn remove_break(&self, range: Range<usize>) -> Option<JoinHandle<RunOutcome>> {
        {
            let mut document = lock(&self.inner.document);
            let holds_marker = document
                .get(range.clone())
                .is_some_and(|s| is_marker_line(s.trim_matches('\n'), &self.inner.config.break_marker));
            if !holds_marker {
                return None;
            }
            *document = breaks::remove_break(&document, range)?;
        }
        Some(self.flush())
    }

    fn arm_debounce(&self) {
        let delay = Duration::from_millis(self.inner.config.debounce_ms);
        let ticket = self.inner.debounce_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                if inner.debounce_ticket.load(Ordering::SeqCst) == ticket {
                    start_run(&inner);
                }
            }
        });
        if let Some(previous) = lock(&self.inner.pending).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_pending(&self) {
        self.inner.debounce_ticket.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = lock(&self.inner.pending).take() {
            timer.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = pending.take() {
            timer.abort();
        }
        let throttle = self.cursor.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(trailing) = throttle.trailing.take() {
            trailing.abort();
        }
    }
}

/// Resolve the last offset seen in the window once the window closes.
fn schedule_trailing(inner: &Arc<Inner>, deadline: Instant) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut throttle = lock(&inner.cursor);
        throttle.trailing = None;
        if let Some(cursor) = throttle.pending.take() {
            let post = inner.active_post(cursor);
            debug!("Trailing cursor update: offset {} → post {:?}", cursor, post);
            inner.record_cursor(&mut throttle, Instant::now(), post);
        }
    })
}

/// Take the next generation and run the current document on its own task.
fn start_run(inner: &Arc<Inner>) -> JoinHandle<RunOutcome> {
    let generation = inner.started.fetch_add(1, Ordering::SeqCst) + 1;
    let text = lock(&inner.document).clone();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let snapshot = run::run_pipeline(&text, generation, &inner.config).await;
        inner.publish(snapshot)
    })
}

impl Inner {
    fn active_post(&self, cursor: usize) -> Option<usize> {
        let snapshot = self.snapshot_tx.borrow().clone();
        let document = lock(&self.document).clone();
        run::active_post(&snapshot, &document, cursor, &self.config)
    }

    fn record_cursor(&self, throttle: &mut CursorThrottle, at: Instant, post: Option<usize>) {
        throttle.sample = Some(CursorSample { at, post });
        self.cursor_tx.send_if_modified(|current| {
            let changed = *current != post;
            *current = post;
            changed
        });
    }

    fn publish(&self, snapshot: ThreadSnapshot) -> RunOutcome {
        let generation = snapshot.generation;
        let post_count = snapshot.posts.len();
        let mut pending = Some(snapshot);

        let published = self.snapshot_tx.send_if_modified(|current| {
            let latest = self.started.load(Ordering::SeqCst);
            if generation != latest || generation <= current.generation {
                return false;
            }
            match pending.take() {
                Some(snapshot) => {
                    *current = Arc::new(snapshot);
                    true
                }
                None => false,
            }
        });

        if published {
            info!("Published run {}: {} posts", generation, post_count);
            RunOutcome::Published {
                generation,
                post_count,
            }
        } else {
            let latest = self.started.load(Ordering::SeqCst);
            debug!("Discarded run {} (latest started: {})", generation, latest);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_run_discarded(generation);
            }
            RunOutcome::Discarded { generation, latest }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ThreadSession {
        let config = ThreadConfig::builder()
            .rasterize_code(false)
            .rasterize_tables(false)
            .build()
            .unwrap();
        ThreadSession::new(config)
    }

    #[tokio::test]
    async fn starts_empty() {
        let s = session();
        assert_eq!(s.snapshot().generation, 0);
        assert!(s.snapshot().posts.is_empty());
        assert_eq!(s.latest_generation(), 0);
        assert_eq!(s.active_post(0), None);
    }

    #[tokio::test]
    async fn submit_now_publishes() {
        let s = session();
        let outcome = s.submit_now("Hello **world**").await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Published {
                generation: 1,
                post_count: 1
            }
        );
        assert_eq!(s.snapshot().texts(), vec!["Hello world"]);
    }

    #[tokio::test]
    async fn older_run_finishing_last_is_discarded() {
        let s = session();
        *lock(&s.inner.document) = "first".into();
        let first = start_run(&s.inner);
        let second = s.submit_now("second");
        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert!(b.is_published());
        assert_eq!(a, RunOutcome::Discarded { generation: 1, latest: 2 });
        assert_eq!(s.snapshot().texts(), vec!["second"]);
    }

    #[tokio::test]
    async fn remove_break_rejects_foreign_range() {
        let s = session();
        s.submit_now("abc").await.unwrap();
        assert!(s.remove_break(0..2).is_none());
        assert_eq!(s.document(), "abc");
    }

    #[test]
    fn outcome_accessors() {
        let o = RunOutcome::Discarded { generation: 3, latest: 4 };
        assert_eq!(o.generation(), 3);
        assert!(!o.is_published());
    }
}
