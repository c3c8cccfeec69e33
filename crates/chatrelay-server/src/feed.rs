//! Change feed adapter.
//!
//! Turns the before/after pairs of a store [`ChangeFeed`] into
//! `"<category> add|remove|edit"` messages on a connection's outbox, until
//! its stop token is cancelled.
//!
//! ```text
//! Starting ──open ok──▶ Streaming ──stop / feed end──▶ Stopped
//!     └──────open failed──▶ Failed
//! ```

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use chatrelay_store::{Change, Query, SharedStore};

use crate::message::Message;
use crate::outbox::Outbox;
use crate::subscription::Category;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
    Edit,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
            Action::Edit => "edit",
        }
    }
}

/// A classified change, ready to be pushed to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub category: Category,
    pub action: Action,
    pub payload: Value,
}

impl ChangeEvent {
    /// Outbound message name, e.g. `"message add"`.
    pub fn name(&self) -> String {
        format!("{} {}", self.category.label(), self.action.label())
    }

    pub fn into_message(self) -> Message {
        Message::new(self.name(), self.payload)
    }
}

/// Classify a before/after pair.
///
/// Adds and edits carry the new record, removals the old one. A pair with
/// neither side present is not an event.
pub fn classify(category: Category, change: Change) -> Option<ChangeEvent> {
    let (action, payload) = match (change.old_val, change.new_val) {
        (None, Some(new)) => (Action::Add, new),
        (Some(old), None) => (Action::Remove, old),
        (Some(_), Some(new)) => (Action::Edit, new),
        (None, None) => return None,
    };

    Some(ChangeEvent {
        category,
        action,
        payload,
    })
}

/// Lifecycle of one subscription worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Starting,
    Streaming,
    Stopped,
    Failed,
}

/// Streams one store query to one connection.
pub struct ChangeFeedAdapter {
    store: SharedStore,
    query: Query,
    category: Category,
    outbox: Outbox,
}

impl ChangeFeedAdapter {
    pub fn new(store: SharedStore, query: Query, category: Category, outbox: Outbox) -> Self {
        Self {
            store,
            query,
            category,
            outbox,
        }
    }

    /// Run until `stop` is cancelled or the feed ends. Returns the final state.
    pub async fn run(self, stop: CancellationToken) -> FeedState {
        let category = self.category;

        if stop.is_cancelled() {
            return FeedState::Stopped;
        }

        let mut feed = match self.store.changes(self.query) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(%category, error = %e, "failed to open change feed");
                self.outbox.send(Message::error(e));
                return FeedState::Failed;
            }
        };

        tracing::debug!(%category, feed_id = feed.id(), "change feed streaming");

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tracing::debug!(%category, feed_id = feed.id(), "closing change feed");
                    feed.close();
                    return FeedState::Stopped;
                }
                change = feed.next() => {
                    let Some(change) = change else {
                        tracing::debug!(%category, feed_id = feed.id(), "change feed ended");
                        return FeedState::Stopped;
                    };
                    match classify(category, change) {
                        Some(event) => {
                            tracing::trace!(
                                %category,
                                action = event.action.label(),
                                "forwarding change"
                            );
                            self.outbox.send(event.into_message());
                        }
                        None => {
                            tracing::warn!(
                                %category,
                                "ignoring change with neither old nor new value"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chatrelay_store::Store;
    use serde_json::json;

    fn change(old_val: Option<Value>, new_val: Option<Value>) -> Change {
        Change { old_val, new_val }
    }

    #[test]
    fn test_classify_add() {
        let event = classify(Category::Channel, change(None, Some(json!({"id": "c1"})))).unwrap();
        assert_eq!(event.action, Action::Add);
        assert_eq!(event.payload["id"], "c1");
        assert_eq!(event.name(), "channel add");
    }

    #[test]
    fn test_classify_remove_carries_old_record() {
        let event = classify(Category::User, change(Some(json!({"id": "u1"})), None)).unwrap();
        assert_eq!(event.action, Action::Remove);
        assert_eq!(event.payload["id"], "u1");
        assert_eq!(event.into_message().name, "user remove");
    }

    #[test]
    fn test_classify_edit_carries_new_record() {
        let event = classify(
            Category::User,
            change(Some(json!({"name": "old"})), Some(json!({"name": "new"}))),
        )
        .unwrap();
        assert_eq!(event.action, Action::Edit);
        assert_eq!(event.payload["name"], "new");
    }

    #[test]
    fn test_classify_empty_pair() {
        assert!(classify(Category::Message, change(None, None)).is_none());
    }

    #[tokio::test]
    async fn test_open_failure_sends_one_error() {
        let store = Arc::new(Store::temporary().unwrap());
        let (outbox, mut rx) = crate::outbox::Outbox::channel();
        let adapter = ChangeFeedAdapter::new(
            store.clone(),
            Query::table(""),
            Category::Channel,
            outbox.clone(),
        );

        let state = adapter.run(CancellationToken::new()).await;
        assert_eq!(state, FeedState::Failed);
        assert_eq!(store.active_feeds(), 0);

        outbox.close();
        assert!(rx.recv().await.unwrap().is_error());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_streams_until_stopped() {
        let store = Arc::new(Store::temporary().unwrap());
        store.insert("channel", json!({"name": "lobby"})).unwrap();

        let (outbox, mut rx) = crate::outbox::Outbox::channel();
        let adapter = ChangeFeedAdapter::new(
            store.clone(),
            Query::table("channel").include_initial(true),
            Category::Channel,
            outbox,
        );
        let stop = CancellationToken::new();
        let worker = tokio::spawn(adapter.run(stop.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "channel add");
        assert_eq!(first.data["name"], "lobby");

        store.insert("channel", json!({"name": "general"})).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.data["name"], "general");

        stop.cancel();
        assert_eq!(worker.await.unwrap(), FeedState::Stopped);
        assert_eq!(store.active_feeds(), 0);

        store.insert("channel", json!({"name": "late"})).unwrap();
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_opens_feed() {
        let store = Arc::new(Store::temporary().unwrap());
        let (outbox, _rx) = crate::outbox::Outbox::channel();
        let adapter =
            ChangeFeedAdapter::new(store.clone(), Query::table("user"), Category::User, outbox);

        let stop = CancellationToken::new();
        stop.cancel();
        assert_eq!(adapter.run(stop).await, FeedState::Stopped);
        assert_eq!(store.active_feeds(), 0);
    }

    #[tokio::test]
    async fn test_feed_end_stops_worker() {
        let store = Arc::new(Store::temporary().unwrap());
        let (outbox, _rx) = crate::outbox::Outbox::channel();
        let adapter =
            ChangeFeedAdapter::new(store.clone(), Query::table("user"), Category::User, outbox);
        let worker = tokio::spawn(adapter.run(CancellationToken::new()));

        while store.active_feeds() == 0 {
            tokio::task::yield_now().await;
        }
        store.close_feeds();
        assert_eq!(worker.await.unwrap(), FeedState::Stopped);
    }
}
