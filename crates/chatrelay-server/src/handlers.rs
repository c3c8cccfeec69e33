//! Inbound message handlers.
//!
//! Mutations decode their payload, update the connection inline and hand the
//! store write to a detached blocking task. Subscriptions start or stop the
//! connection's worker for their category.

use chrono::Utc;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use chatrelay_store::{Direction, Query, Store};

use crate::connection::Connection;
use crate::error::Error;
use crate::message::{
    decode_payload, AddChannel, AddChannelMessage, Channel, ChannelMessage, EditUser, Message,
    SubscribeChannelMessage, CHANNEL_TABLE, MESSAGE_TABLE, USER_TABLE,
};
use crate::router::Router;
use crate::subscription::Category;

pub const EDIT_USER: &str = "editUser";
pub const SUBSCRIBE_USER: &str = "subscribeUser";
pub const UNSUBSCRIBE_USER: &str = "unsubscribeUser";
pub const ADD_CHANNEL: &str = "addChannel";
pub const SUBSCRIBE_CHANNEL: &str = "subscribeChannel";
pub const UNSUBSCRIBE_CHANNEL: &str = "unsubscribeChannel";
pub const ADD_CHANNEL_MESSAGE: &str = "addChannelMessage";
pub const SUBSCRIBE_CHANNEL_MESSAGE: &str = "subscribeChannelMessage";
pub const UNSUBSCRIBE_CHANNEL_MESSAGE: &str = "unsubscribeChannelMessage";

/// Build the router with every chat handler installed.
pub fn default_router() -> Router {
    let mut router = Router::new();
    register_all(&mut router);
    router
}

/// Install every chat handler into `router`.
pub fn register_all(router: &mut Router) {
    router
        .register(EDIT_USER, edit_user)
        .register(SUBSCRIBE_USER, subscribe_user)
        .register(UNSUBSCRIBE_USER, unsubscribe_user)
        .register(ADD_CHANNEL, add_channel)
        .register(SUBSCRIBE_CHANNEL, subscribe_channel)
        .register(UNSUBSCRIBE_CHANNEL, unsubscribe_channel)
        .register(ADD_CHANNEL_MESSAGE, add_channel_message)
        .register(SUBSCRIBE_CHANNEL_MESSAGE, subscribe_channel_message)
        .register(UNSUBSCRIBE_CHANNEL_MESSAGE, unsubscribe_channel_message);
}

/// Decode a payload, reporting a failure to the client.
fn decode<T: DeserializeOwned>(connection: &Connection, name: &str, data: Value) -> Option<T> {
    match decode_payload(name, data) {
        Ok(payload) => Some(payload),
        Err(e) => {
            connection.send_error(&e);
            None
        }
    }
}

/// Run a store write on the blocking pool without waiting for it.
///
/// The only observable outcome of a failure is one `error` message.
fn persist<F>(connection: &Connection, operation: &'static str, write: F)
where
    F: FnOnce(&Store) -> chatrelay_store::Result<()> + Send + 'static,
{
    let store = connection.store().clone();
    let outbox = connection.outbox().clone();
    let connection_id = connection.id().to_string();

    tokio::task::spawn_blocking(move || {
        if let Err(e) = write(&store) {
            tracing::warn!(%connection_id, operation, error = %e, "persistence failed");
            outbox.send(Message::error(Error::from(e)));
        }
    });
}

fn edit_user(connection: &mut Connection, data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(EditUser { name }) = decode::<EditUser>(connection, EDIT_USER, data) else {
            return;
        };

        connection.set_user_name(name.clone());
        let id = connection.id().to_string();
        persist(connection, EDIT_USER, move |store| {
            if !store.update(USER_TABLE, &id, json!({ "name": name }))? {
                tracing::debug!(user_id = %id, "presence record missing, rename not stored");
            }
            Ok(())
        });
    })
}

fn subscribe_user(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let query = Query::table(USER_TABLE).include_initial(true);
        connection.subscribe(Category::User, query).await;
    })
}

fn unsubscribe_user(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        connection.stop_subscription(Category::User).await;
    })
}

fn add_channel(connection: &mut Connection, data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(AddChannel { name }) = decode::<AddChannel>(connection, ADD_CHANNEL, data) else {
            return;
        };

        let channel = Channel { id: None, name };
        persist(connection, ADD_CHANNEL, move |store| {
            store.insert(CHANNEL_TABLE, serde_json::to_value(&channel)?)?;
            Ok(())
        });
    })
}

fn subscribe_channel(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let query = Query::table(CHANNEL_TABLE).include_initial(true);
        connection.subscribe(Category::Channel, query).await;
    })
}

fn unsubscribe_channel(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        connection.stop_subscription(Category::Channel).await;
    })
}

fn add_channel_message(connection: &mut Connection, data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(AddChannelMessage { channel_id, body }) =
            decode::<AddChannelMessage>(connection, ADD_CHANNEL_MESSAGE, data)
        else {
            return;
        };

        let message = ChannelMessage {
            id: None,
            channel_id,
            body,
            author: connection.user_name().to_string(),
            created_at: Utc::now(),
        };
        persist(connection, ADD_CHANNEL_MESSAGE, move |store| {
            store.insert(MESSAGE_TABLE, serde_json::to_value(&message)?)?;
            Ok(())
        });
    })
}

fn subscribe_channel_message(connection: &mut Connection, data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(SubscribeChannelMessage { channel_id }) =
            decode::<SubscribeChannelMessage>(connection, SUBSCRIBE_CHANNEL_MESSAGE, data)
        else {
            return;
        };

        let query = Query::table(MESSAGE_TABLE)
            .filter_eq("channelId", channel_id)
            .order_by("createdAt", Direction::Desc)
            .include_initial(true);
        connection.subscribe(Category::Message, query).await;
    })
}

fn unsubscribe_channel_message(connection: &mut Connection, _data: Value) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        connection.stop_subscription(Category::Message).await;
    })
}
