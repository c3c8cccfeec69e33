//! chatrelay server
//!
//! Relays live changes of the chat store to WebSocket clients:
//! - `{name, data}` envelopes dispatched through a [`Router`](router::Router)
//! - per-connection subscriptions, at most one per category
//! - change feeds normalized into `add` / `remove` / `edit` events

pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod message;
pub mod outbox;
pub mod router;
pub mod routes;
pub mod state;
pub mod subscription;
pub mod ws;

pub use error::{Error, Result};

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .route("/ws", get(ws::ws_connect))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
