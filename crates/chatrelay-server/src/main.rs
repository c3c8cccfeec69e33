//! chatrelay server - WebSocket relay for live chat updates.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay_server::{
    config::{Args, ServerConfig},
    connection::purge_presence,
    create_router,
    state::AppState,
};
use chatrelay_store::{SharedStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("chatrelay_server={log_level},chatrelay_store={log_level},tower_http=info")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chatrelay server");

    let config: ServerConfig = args.into();
    tracing::info!(
        data_path = %config.data_path.display(),
        temporary = config.temporary,
        "configuration loaded"
    );

    let store: SharedStore = Arc::new(Store::open(config.store_config())?);
    let stale = purge_presence(&store)?;
    if stale > 0 {
        tracing::info!(stale, "removed presence records of a previous run");
    }

    let listen_addr = config.listen_addr();
    let state = AppState::new(store.clone(), config);
    let app = create_router(state.clone());

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "listening for WebSocket clients on /ws");

    let shutdown_store = store.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
                std::future::pending::<()>().await;
            }
            tracing::info!("received shutdown signal");
            // Ends every change feed, so subscription workers exit.
            shutdown_store.close_feeds();
        })
        .await?;

    let released = state.release_connections();
    tracing::info!(released, "released open connections");

    store.flush()?;
    tracing::info!("server stopped");

    Ok(())
}
