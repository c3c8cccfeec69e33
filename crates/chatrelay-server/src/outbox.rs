//! Outbound queue of a connection.
//!
//! Many producers (the read loop, detached persistence tasks, subscription
//! workers) share an [`Outbox`]; exactly one writer owns the
//! [`OutboxReceiver`]. Closing the outbox lets the writer drain what is
//! already queued and then end; later sends are rejected.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Producer side of the outbound queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    closed: CancellationToken,
}

/// Consumer side of the outbound queue, owned by the writer.
pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
    closed: CancellationToken,
}

impl Outbox {
    /// Create an unbounded outbound queue.
    pub fn channel() -> (Outbox, OutboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        (
            Outbox {
                tx,
                closed: closed.clone(),
            },
            OutboxReceiver { rx, closed },
        )
    }

    /// Enqueue a message. Returns `false` if the queue is closed.
    pub fn send(&self, message: Message) -> bool {
        if self.closed.is_cancelled() {
            tracing::trace!(name = %message.name, "outbox closed, message dropped");
            return false;
        }
        self.tx.send(message).is_ok()
    }

    /// Close the queue. Only the first call has an effect.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl OutboxReceiver {
    /// Next queued message, or `None` once the outbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            message = self.rx.recv() => message,
            _ = self.closed.cancelled() => {
                self.rx.close();
                self.rx.recv().await
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}
