//! Live change feeds.
//!
//! Every committed write is published to the feeds registered on its table.
//! Each feed owns an unbounded queue, so a slow consumer never blocks the
//! write path:
//!
//! ```text
//! Write Path:
//!   insert/update/delete → tree.insert() → registry.publish() → return
//!
//! Consumer:
//!   feed.next() → initial snapshot, then live changes in commit order
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::query::Query;

/// A before/after pair for a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Document before the write, if it existed (and matched the feed).
    pub old_val: Option<Value>,
    /// Document after the write, if it still exists (and matches the feed).
    pub new_val: Option<Value>,
}

impl Change {
    /// A change describing a freshly inserted document.
    pub fn inserted(doc: Value) -> Self {
        Self {
            old_val: None,
            new_val: Some(doc),
        }
    }
}

struct FeedEntry {
    query: Query,
    tx: mpsc::UnboundedSender<Change>,
}

/// Registry of open feeds, keyed by feed id.
pub(crate) struct FeedRegistry {
    feeds: DashMap<u64, FeedEntry>,
    next_feed_id: AtomicU64,
}

impl FeedRegistry {
    pub(crate) fn new() -> Self {
        Self {
            feeds: DashMap::new(),
            next_feed_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&self, query: Query) -> (u64, mpsc::UnboundedReceiver<Change>) {
        let feed_id = self.next_feed_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(feed_id, table = %query.table, "change feed registered");
        self.feeds.insert(feed_id, FeedEntry { query, tx });
        (feed_id, rx)
    }

    pub(crate) fn unregister(&self, feed_id: u64) -> bool {
        let removed = self.feeds.remove(&feed_id).is_some();
        if removed {
            tracing::debug!(feed_id, "change feed closed");
        }
        removed
    }

    /// Deliver a committed change to every feed watching `table`.
    pub(crate) fn publish(&self, table: &str, change: &Change) {
        let mut dead = Vec::new();

        for entry in self.feeds.iter() {
            let feed = entry.value();
            if feed.query.table != table {
                continue;
            }
            let Some(projected) = feed.query.project(change) else {
                continue;
            };
            if feed.tx.send(projected).is_err() {
                dead.push(*entry.key());
            }
        }

        for feed_id in dead {
            self.unregister(feed_id);
        }
    }

    /// Drop every sender; open feeds drain what they have and then end.
    pub(crate) fn clear(&self) {
        self.feeds.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.feeds.len()
    }
}

/// An open change feed over a filtered query.
///
/// Yields the initial snapshot (when requested) followed by live changes.
/// Closing or dropping the feed unregisters it from the store.
pub struct ChangeFeed {
    id: u64,
    initial: VecDeque<Change>,
    rx: mpsc::UnboundedReceiver<Change>,
    registry: Arc<FeedRegistry>,
    closed: bool,
}

impl ChangeFeed {
    pub(crate) fn new(
        id: u64,
        initial: VecDeque<Change>,
        rx: mpsc::UnboundedReceiver<Change>,
        registry: Arc<FeedRegistry>,
    ) -> Self {
        Self {
            id,
            initial,
            rx,
            registry,
            closed: false,
        }
    }

    /// Feed identifier, unique within a store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next change.
    ///
    /// Returns `None` once the feed is closed or the store stopped feeding
    /// it. Cancel safe.
    pub async fn next(&mut self) -> Option<Change> {
        if let Some(change) = self.initial.pop_front() {
            return Some(change);
        }
        self.rx.recv().await
    }

    /// Close the feed and release its registration.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.initial.clear();
        self.rx.close();
        self.registry.unregister(self.id);
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("id", &self.id)
            .field("pending_initial", &self.initial.len())
            .field("closed", &self.closed)
            .finish()
    }
}
