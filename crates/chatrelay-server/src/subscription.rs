//! Per-connection subscription registry.
//!
//! Each category has at most one background worker. A worker is a tokio task
//! bound to a [`CancellationToken`]; stopping it cancels the token and then
//! awaits the task, so the worker has released its change feed by the time
//! `stop` returns. Stopping a worker that already exited returns at once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message::{CHANNEL_TABLE, MESSAGE_TABLE, USER_TABLE};

/// A class of subscribable updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// The channel (room) list.
    Channel,
    /// User presence.
    User,
    /// Messages of one channel.
    Message,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Channel, Category::User, Category::Message];

    /// Prefix of outbound event names, e.g. `"channel add"`.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Channel => "channel",
            Category::User => "user",
            Category::Message => "message",
        }
    }

    /// Store table backing this category.
    pub fn table(&self) -> &'static str {
        match self {
            Category::Channel => CHANNEL_TABLE,
            Category::User => USER_TABLE,
            Category::Message => MESSAGE_TABLE,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A running subscription worker.
struct SubscriptionTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl SubscriptionTask {
    /// Cancel the worker and wait until it has exited.
    async fn stop(self, category: Category) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(%category, error = %e, "subscription worker panicked");
        }
    }
}

/// Active subscription workers of one connection, keyed by category.
#[derive(Default)]
pub struct SubscriptionRegistry {
    tasks: HashMap<Category, SubscriptionTask>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire any worker for `category`, then spawn a fresh one.
    ///
    /// `worker` receives the stop token of the new subscription. The previous
    /// worker has fully exited before the new one is spawned.
    pub async fn replace<F, Fut>(&mut self, category: Category, worker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.stop(category).await {
            tracing::debug!(%category, "replaced active subscription");
        }

        let stop = CancellationToken::new();
        let handle = tokio::spawn(worker(stop.clone()));
        self.tasks.insert(category, SubscriptionTask { stop, handle });
    }

    /// Stop the worker for `category`. Returns whether one was registered.
    pub async fn stop(&mut self, category: Category) -> bool {
        match self.tasks.remove(&category) {
            Some(task) => {
                task.stop(category).await;
                true
            }
            None => false,
        }
    }

    /// Stop every worker. Returns how many were registered.
    pub async fn stop_all(&mut self) -> usize {
        let count = self.tasks.len();
        for (category, task) in self.tasks.drain() {
            task.stop(category).await;
        }
        count
    }

    pub fn is_active(&self, category: Category) -> bool {
        self.tasks.contains_key(&category)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
