//! Dispatch table from inbound message names to handlers.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::connection::Connection;

/// A message handler.
///
/// Handlers run inline in the connection's read loop with exclusive access to
/// the connection, and receive the raw payload to decode themselves.
pub type Handler = for<'c> fn(&'c mut Connection, Value) -> BoxFuture<'c, ()>;

/// Maps message names to handlers.
///
/// Built once at startup and shared read-only by every connection.
#[derive(Default, Clone)]
pub struct Router {
    rules: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler, replacing any previous handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) -> &mut Self {
        let name = name.into();
        if self.rules.insert(name.clone(), handler).is_some() {
            tracing::debug!(name = %name, "handler replaced");
        }
        self
    }

    /// Look up the handler for `name`.
    pub fn resolve(&self, name: &str) -> Option<Handler> {
        self.rules.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Registered message names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("names", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn first(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            connection.send(Message::new("first", Value::Null));
        })
    }

    fn second(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            connection.send(Message::new("second", Value::Null));
        })
    }

    #[test]
    fn test_resolve_unknown_name() {
        let router = Router::new();
        assert!(router.resolve("editUser").is_none());
        assert!(router.is_empty());
    }

    #[test]
    fn test_register_and_resolve() {
        let mut router = Router::new();
        router.register("ping", first).register("pong", second);

        assert!(router.resolve("ping").is_some());
        assert!(router.contains("pong"));
        assert_eq!(router.names(), vec!["ping", "pong"]);
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let mut router = Router::new();
        router.register("ping", first);
        router.register("ping", second);
        assert_eq!(router.len(), 1);

        let store = std::sync::Arc::new(chatrelay_store::Store::temporary().unwrap());
        let (outbox, mut rx) = crate::outbox::Outbox::channel();
        let mut connection = Connection::open(store, outbox);

        let handler = router.resolve("ping").unwrap();
        handler(&mut connection, Value::Null).await;
        assert_eq!(rx.recv().await.unwrap().name, "second");
    }
}
