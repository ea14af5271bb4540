//! Streaming API: receive every snapshot a session publishes.
//!
//! A preview pane can drive itself from this stream instead of polling
//! [`ThreadSession::snapshot`]. Intermediate snapshots may be skipped when
//! publications outpace the consumer; the latest one is always delivered.

use crate::output::ThreadSnapshot;
use crate::session::ThreadSession;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

/// A boxed stream of published snapshots.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Arc<ThreadSnapshot>> + Send>>;

/// Stream of snapshots published by `session`, starting with the current one.
pub fn snapshot_stream(session: &ThreadSession) -> SnapshotStream {
    Box::pin(WatchStream::new(session.subscribe()))
}

/// Like [`snapshot_stream`] but only yields snapshots published after the call.
pub fn snapshot_updates(session: &ThreadSession) -> SnapshotStream {
    let current = session.snapshot().generation;
    Box::pin(WatchStream::new(session.subscribe()).filter(move |s| s.generation > current))
}
