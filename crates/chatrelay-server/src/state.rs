use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use chatrelay_store::SharedStore;

use crate::config::ServerConfig;
use crate::handlers::default_router;
use crate::message::USER_TABLE;
use crate::router::Router;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub router: Arc<Router>,
    /// Live connections, keyed by connection id, with their open time.
    pub connections: Arc<DashMap<String, DateTime<Utc>>>,
    pub config: ServerConfig,
}

impl AppState {
    /// State with the chat handlers installed.
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        Self::with_router(store, default_router(), config)
    }

    pub fn with_router(store: SharedStore, router: Router, config: ServerConfig) -> Self {
        Self {
            store,
            router: Arc::new(router),
            connections: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn connection_opened(&self, connection_id: &str) {
        self.connections.insert(connection_id.to_string(), Utc::now());
    }

    pub fn connection_closed(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Forget every live connection and delete its presence record.
    ///
    /// Used at shutdown, when upgraded sockets may still be open.
    pub fn release_connections(&self) -> usize {
        let ids: Vec<String> = self.connections.iter().map(|entry| entry.key().clone()).collect();

        let mut released = 0;
        for id in ids {
            self.connections.remove(&id);
            match self.store.delete(USER_TABLE, &id) {
                Ok(Some(_)) => released += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "failed to remove presence")
                }
            }
        }
        released
    }
}
