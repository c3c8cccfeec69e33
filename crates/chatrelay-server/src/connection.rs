//! Client connection lifecycle.
//!
//! A connection runs two loops: the read loop decodes inbound envelopes and
//! dispatches them through the [`Router`], and the writer drains the outbox
//! onto the transport. Subscription workers push into the same outbox.
//!
//! ```text
//! transport ─▶ read loop ─▶ handler ─┬─▶ outbox ─▶ writer ─▶ transport
//!                                    └─▶ subscription worker ─▶ outbox
//! ```
//!
//! When the read loop ends (peer gone, bad envelope, or writer failure) the
//! connection is closed exactly once: workers are stopped, the outbox is
//! closed, and the presence record is deleted.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use chatrelay_store::{Query, SharedStore, Store, ID_FIELD};

use crate::error::{self, Error};
use crate::feed::ChangeFeedAdapter;
use crate::message::{Message, User, DEFAULT_USER_NAME, USER_TABLE};
use crate::outbox::{Outbox, OutboxReceiver};
use crate::router::Router;
use crate::subscription::{Category, SubscriptionRegistry};

/// One connected client.
pub struct Connection {
    id: String,
    user_name: String,
    store: SharedStore,
    outbox: Outbox,
    subscriptions: SubscriptionRegistry,
}

impl Connection {
    /// Create a connection and register its presence record.
    ///
    /// The identity is allocated here and never changes. A failed presence
    /// insert is logged; the connection is still usable.
    pub fn open(store: SharedStore, outbox: Outbox) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let user = User {
            id: Some(id.clone()),
            name: DEFAULT_USER_NAME.to_string(),
        };

        let inserted = serde_json::to_value(&user)
            .map_err(Error::Encode)
            .and_then(|doc| Ok(store.insert(USER_TABLE, doc)?));
        match inserted {
            Ok(_) => tracing::info!(connection_id = %id, "connection opened"),
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "failed to register presence")
            }
        }

        Self {
            id,
            user_name: user.name,
            store,
            outbox,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn set_user_name(&mut self, name: impl Into<String>) {
        self.user_name = name.into();
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Enqueue a message for the writer.
    pub fn send(&self, message: Message) -> bool {
        self.outbox.send(message)
    }

    /// Report a failed operation to the client.
    pub fn send_error(&self, error: &Error) {
        tracing::debug!(connection_id = %self.id, error = %error, "operation failed");
        self.send(Message::error(error));
    }

    /// Start a worker for `category`, retiring the current one first.
    pub async fn start_subscription<F, Fut>(&mut self, category: Category, worker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscriptions.replace(category, worker).await;
        tracing::debug!(connection_id = %self.id, %category, "subscription started");
    }

    /// Stream `query` to this client as `category` events.
    pub async fn subscribe(&mut self, category: Category, query: Query) {
        let adapter =
            ChangeFeedAdapter::new(self.store.clone(), query, category, self.outbox.clone());
        let connection_id = self.id.clone();
        self.start_subscription(category, move |stop| async move {
            let state = adapter.run(stop).await;
            tracing::debug!(%connection_id, %category, ?state, "subscription worker finished");
        })
        .await;
    }

    /// Stop the worker for `category`, if any.
    pub async fn stop_subscription(&mut self, category: Category) -> bool {
        let stopped = self.subscriptions.stop(category).await;
        if stopped {
            tracing::debug!(connection_id = %self.id, %category, "subscription stopped");
        }
        stopped
    }

    /// Read and dispatch inbound frames until the transport ends, a frame is
    /// not a valid envelope, or `shutdown` is cancelled by the writer.
    pub async fn read<R>(&mut self, mut reader: R, router: &Router, shutdown: &CancellationToken)
    where
        R: Stream<Item = Result<String, Error>> + Unpin,
    {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(connection_id = %self.id, "writer stopped, ending read loop");
                    break;
                }
                frame = reader.next() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "transport read failed");
                    break;
                }
                None => {
                    tracing::debug!(connection_id = %self.id, "transport closed by peer");
                    break;
                }
            };

            let message = match Message::decode(&text) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "closing connection");
                    break;
                }
            };

            match router.resolve(&message.name) {
                Some(handler) => {
                    tracing::trace!(connection_id = %self.id, name = %message.name, "dispatching");
                    handler(&mut *self, message.data).await;
                }
                None => {
                    tracing::debug!(
                        connection_id = %self.id,
                        name = %message.name,
                        "no handler, message dropped"
                    );
                }
            }
        }
    }

    /// Stop every worker, close the outbox and delete the presence record.
    ///
    /// Consumes the connection, so it runs at most once.
    pub async fn close(mut self) {
        let stopped = self.subscriptions.stop_all().await;
        self.outbox.close();

        let store = self.store.clone();
        let id = self.id.clone();
        match tokio::task::spawn_blocking(move || store.delete(USER_TABLE, &id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(connection_id = %self.id, error = %e, "failed to remove presence")
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "presence removal task failed")
            }
        }

        tracing::info!(connection_id = %self.id, subscriptions = stopped, "connection closed");
    }
}

/// Delete every presence record in the store.
///
/// Presence only describes connections of the running process, so records
/// found at startup were left behind by a previous run.
pub fn purge_presence(store: &Store) -> error::Result<usize> {
    let mut removed = 0;
    for user in store.scan(USER_TABLE)? {
        let Some(id) = user.get(ID_FIELD).and_then(Value::as_str) else {
            continue;
        };
        if store.delete(USER_TABLE, id)?.is_some() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Drain the outbox onto the transport in FIFO order.
///
/// Ends when the outbox is closed and drained, or on the first write
/// failure, in which case `shutdown` is cancelled to stop the read loop.
pub async fn write<W>(mut outbox: OutboxReceiver, mut writer: W, shutdown: CancellationToken)
where
    W: Sink<String> + Unpin,
    W::Error: Display,
{
    while let Some(message) = outbox.recv().await {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(name = %message.name, error = %e, "dropping unencodable message");
                continue;
            }
        };

        if let Err(e) = writer.send(text).await {
            tracing::debug!(error = %e, "transport write failed");
            shutdown.cancel();
            return;
        }
    }

    if let Err(e) = writer.close().await {
        tracing::trace!(error = %e, "transport close failed");
    }
}

/// Run a connection to completion.
///
/// Spawns the writer, runs the read loop on the current task, then closes
/// the connection and waits for the writer to finish draining.
pub async fn serve<R, W>(
    mut connection: Connection,
    outbox: OutboxReceiver,
    router: Arc<Router>,
    reader: R,
    writer: W,
) where
    R: Stream<Item = Result<String, Error>> + Unpin,
    W: Sink<String> + Unpin + Send + 'static,
    W::Error: Display,
{
    let shutdown = CancellationToken::new();
    let writer = tokio::spawn(write(outbox, writer, shutdown.clone()));

    connection.read(reader, &router, &shutdown).await;
    connection.close().await;

    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "writer task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_store::StoreConfig;
    use serde_json::json;

    fn open() -> (Connection, OutboxReceiver, SharedStore) {
        let store = Arc::new(Store::temporary().unwrap());
        let (outbox, rx) = Outbox::channel();
        (Connection::open(store.clone(), outbox), rx, store)
    }

    #[tokio::test]
    async fn test_open_registers_presence() {
        let (connection, _rx, store) = open();

        let user = store.get(USER_TABLE, connection.id()).unwrap().unwrap();
        assert_eq!(user["name"], DEFAULT_USER_NAME);
        assert_eq!(connection.user_name(), DEFAULT_USER_NAME);
    }

    #[tokio::test]
    async fn test_identity_is_unique() {
        let (a, _rx_a, _) = open();
        let (b, _rx_b, _) = open();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_close_cleans_up() {
        let (mut connection, mut rx, store) = open();
        connection
            .subscribe(Category::Channel, Query::table("channel"))
            .await;
        connection.subscribe(Category::User, Query::table("user")).await;
        while store.active_feeds() < 2 {
            tokio::task::yield_now().await;
        }

        let id = connection.id().to_string();
        let outbox = connection.outbox().clone();
        connection.close().await;

        assert!(outbox.is_closed());
        assert_eq!(store.active_feeds(), 0);
        assert!(store.get(USER_TABLE, &id).unwrap().is_none());

        store.insert("channel", json!({"name": "after close"})).unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_subscription() {
        let (mut connection, _rx, store) = open();
        connection.subscribe(Category::User, Query::table("user")).await;
        assert!(connection.subscriptions().is_active(Category::User));

        assert!(connection.stop_subscription(Category::User).await);
        assert!(!connection.stop_subscription(Category::User).await);
        assert!(connection.subscriptions().is_empty());
        assert_eq!(store.active_feeds(), 0);
    }

    #[tokio::test]
    async fn test_purge_presence_after_unclean_exit() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = Arc::new(Store::open(StoreConfig::new(dir.path())).unwrap());
            let (outbox, _rx) = Outbox::channel();
            let connection = Connection::open(store.clone(), outbox);
            drop(connection);
            store.flush().unwrap();
        }

        let store = Store::open(StoreConfig::new(dir.path())).unwrap();
        assert_eq!(store.count(USER_TABLE).unwrap(), 1);

        assert_eq!(purge_presence(&store).unwrap(), 1);
        assert_eq!(store.count(USER_TABLE).unwrap(), 0);
        assert_eq!(purge_presence(&store).unwrap(), 0);

        let mut feed = store
            .changes(Query::table(USER_TABLE).include_initial(true))
            .unwrap();
        store.insert(USER_TABLE, json!({"name": "fresh"})).unwrap();
        let first = feed.next().await.unwrap();
        assert_eq!(first.new_val.unwrap()["name"], "fresh");
    }

    #[tokio::test]
    async fn test_writer_failure_stops_reader() {
        let (connection, rx, _store) = open();
        let (frames_tx, frames_rx) =
            futures::channel::mpsc::unbounded::<Result<String, Error>>();
        let (sink, sink_rx) = futures::channel::mpsc::unbounded::<String>();
        drop(sink_rx);

        connection.send(Message::error("undeliverable"));
        let served = tokio::spawn(serve(connection, rx, Arc::new(Router::new()), frames_rx, sink));

        tokio::time::timeout(std::time::Duration::from_secs(2), served)
            .await
            .expect("connection did not shut down")
            .unwrap();
        drop(frames_tx);
    }
}
