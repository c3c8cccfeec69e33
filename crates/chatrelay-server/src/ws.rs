use axum::{
    extract::{
        ws::{Message as Frame, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};

use crate::connection::{serve, Connection};
use crate::error::Error;
use crate::outbox::Outbox;
use crate::state::AppState;

/// WebSocket upgrade handler for chat clients
pub async fn ws_connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one upgraded WebSocket until either side goes away
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();

    // Text frames carry envelopes; control frames are handled by axum.
    let reader = stream.filter_map(|frame| {
        future::ready(match frame {
            Ok(Frame::Text(text)) => Some(Ok(text)),
            Ok(Frame::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Some(Ok(text)),
                Err(e) => Some(Err(Error::Transport(format!("binary frame is not utf-8: {e}")))),
            },
            Ok(Frame::Close(_)) | Ok(Frame::Ping(_)) | Ok(Frame::Pong(_)) => None,
            Err(e) => Some(Err(Error::Transport(e.to_string()))),
        })
    });
    let writer = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Frame::Text(text))));

    let (outbox, outbox_rx) = Outbox::channel();
    let connection = Connection::open(state.store.clone(), outbox);
    let connection_id = connection.id().to_string();
    state.connection_opened(&connection_id);
    tracing::debug!(%connection_id, active = state.connection_count(), "client connected");

    serve(connection, outbox_rx, state.router.clone(), reader, writer).await;

    state.connection_closed(&connection_id);
    tracing::debug!(%connection_id, active = state.connection_count(), "client disconnected");
}
