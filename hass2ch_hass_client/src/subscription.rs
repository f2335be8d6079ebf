use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace};

use crate::{
    client::{ClientInner, ConnectionState, Exchange},
    error::{Result, SubscriptionRejectedSnafu, SubscriptionTimeoutSnafu},
    message::{Command, EventMessage, EventType, ServerMessage},
};

/// Capacity of the per-connection channel between the receive loop and a forwarder.
const FORWARD_BUFFER: usize = 16;

/// A registered subscription, replayed after every reconnect.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    pub key: u64,
    pub event_type: Option<EventType>,
    pub output: mpsc::Sender<EventMessage>,
    pub ct: CancellationToken,
}

/// Stream of events of one subscription.
///
/// The channel is stable across reconnects. Dropping the subscription (or
/// calling [`Subscription::close`]) unsubscribes it.
pub struct Subscription {
    key: u64,
    events: mpsc::Receiver<EventMessage>,
    _guard: DropGuard,
}

impl Subscription {
    pub(crate) fn new(key: u64, events: mpsc::Receiver<EventMessage>, ct: CancellationToken) -> Self {
        Self {
            key,
            events,
            _guard: ct.drop_guard(),
        }
    }

    /// Client-local identifier of the subscription. Unlike the request id it
    /// does not change on reconnect.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Receives the next event. Returns `None` once the subscription ended.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Result<EventMessage, TryRecvError> {
        self.events.try_recv()
    }

    /// Ends the subscription.
    pub fn close(self) {}
}

impl Stream for Subscription {
    type Item = EventMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl ClientInner {
    /// Sends `subscribe_events` for `entry` on the current connection and
    /// starts forwarding its events. Returns the request id.
    pub async fn start_subscription(self: &Arc<Self>, entry: &SubscriptionEntry) -> Result<u64> {
        let command = Command::SubscribeEvents {
            event_type: entry.event_type.clone(),
        };
        let timeout = self.options.subscribe_timeout;
        let (id, mut rx) = self.register(FORWARD_BUFFER).await;

        let reply = match self.exchange(&entry.ct, id, &command, &mut rx, timeout).await {
            Ok(reply) => reply,
            Err(err) => {
                self.unregister(id).await;
                return Err(err);
            }
        };

        let result = match reply {
            Exchange::Reply(result) => result,
            Exchange::TimedOut => {
                self.unregister(id).await;
                return SubscriptionTimeoutSnafu { id, timeout }.fail();
            }
        };

        if !result.success {
            self.unregister(id).await;
            let error = result.error.unwrap_or_default();
            return SubscriptionRejectedSnafu {
                id,
                code: error.code,
                message: error.message,
            }
            .fail();
        }

        debug!(key = entry.key, id, event_type = ?entry.event_type, "subscription acknowledged");

        tokio::spawn(forward_events(
            self.clone(),
            entry.key,
            id,
            rx,
            entry.output.clone(),
            entry.ct.clone(),
        ));

        Ok(id)
    }

    /// Re-sends every registered subscription on the current connection.
    pub async fn replay_subscriptions(self: &Arc<Self>) {
        let _replay = self.replay_lock.lock().await;
        let entries: Vec<SubscriptionEntry> =
            self.subscriptions.lock().await.values().cloned().collect();

        for entry in entries {
            if entry.ct.is_cancelled() || entry.output.is_closed() {
                self.subscriptions.lock().await.remove(&entry.key);
                continue;
            }

            // A failed replay keeps the entry, the next reconnect tries again.
            match self.start_subscription(&entry).await {
                Ok(id) => info!(key = entry.key, id, "replayed subscription"),
                Err(err) => error!(err = ?err, key = entry.key, "failed to replay subscription"),
            }
        }
    }

    /// Forgets the subscription and tells the server to stop sending its events.
    pub async fn remove_subscription(&self, key: u64, id: u64) {
        let removed = self.subscriptions.lock().await.remove(&key).is_some();
        self.unregister(id).await;

        let authenticated = *self.state.borrow() == ConnectionState::Authenticated;
        if !removed || !authenticated || self.ct.is_cancelled() {
            return;
        }

        let command = Command::UnsubscribeEvents { subscription: id };
        match self.request(&self.ct, command).await {
            Ok(_) => debug!(key, id, "unsubscribed from events"),
            Err(err) => debug!(err = ?err, key, id, "failed to unsubscribe from events"),
        }
    }
}

/// Copies events of request `id` onto the subscription output until the
/// connection goes away or the subscription ends.
async fn forward_events(
    inner: Arc<ClientInner>,
    key: u64,
    id: u64,
    mut rx: mpsc::Receiver<ServerMessage>,
    output: mpsc::Sender<EventMessage>,
    ct: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = ct.cancelled() => break,
            message = rx.recv() => message,
        };

        let event = match message {
            Some(ServerMessage::Event(event)) => event,
            Some(other) => {
                debug!(key, id, kind = other.kind(), "ignoring non-event message on subscription");
                continue;
            }
            None => {
                // Replaced connection: the replay starts a new forwarder.
                trace!(key, id, "subscription detached from connection");
                return;
            }
        };

        tokio::select! {
            _ = ct.cancelled() => break,
            sent = output.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    inner.remove_subscription(key, id).await;
}
