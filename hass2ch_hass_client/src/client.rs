use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures_util::SinkExt;
use serde_json::Value;
use snafu::{ResultExt, ensure};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    connection::{ConnectionHandle, WsSink, supervise},
    error::{
        AuthenticationSnafu, CancelledSnafu, ClosedSnafu, CommandFailedSnafu,
        ConnectionLostSnafu, EncodeSnafu, NotConnectedSnafu, ParseResultSnafu,
        RequestTimeoutSnafu, Result, SendSnafu, UnexpectedResponseSnafu,
    },
    message::{AuthMessage, Command, CommandEnvelope, EventType, ResultMessage, ServerMessage, State},
    metrics::ClientMetrics,
    options::HassClientOptions,
    subscription::{Subscription, SubscriptionEntry},
};

/// Lifecycle of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authenticated,
    /// The server answered `auth_invalid`; the session stays unauthenticated.
    AuthRejected,
    Reconnecting,
    Closed,
}

/// Websocket client for the Home Assistant API.
///
/// The client keeps one logical session alive: when the connection drops it
/// reconnects in the background and replays every active subscription onto
/// the channel its caller already holds. Call [`HassClient::close`] to stop it.
#[derive(Clone)]
pub struct HassClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub base_url: String,
    pub token: String,
    pub options: HassClientOptions,
    pub next_id: AtomicU64,
    pub next_subscription: AtomicU64,
    /// Request id to receiver of the responses with that id.
    pub pending: Mutex<HashMap<u64, mpsc::Sender<ServerMessage>>>,
    /// Active subscriptions, replayed after every reconnect.
    pub subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    /// Held by `subscribe_events` from the request until the entry is
    /// registered, and by a replay for its whole run.
    pub replay_lock: Mutex<()>,
    pub writer: Mutex<Option<WsSink>>,
    pub connection: Mutex<ConnectionHandle>,
    pub state: watch::Sender<ConnectionState>,
    pub auth_error: Mutex<Option<String>>,
    /// Generations of connections that failed, consumed by the reconnect supervisor.
    pub lost_tx: mpsc::Sender<u64>,
    pub lost_rx: Mutex<Option<mpsc::Receiver<u64>>>,
    pub closed: AtomicBool,
    pub ct: CancellationToken,
    pub metrics: ClientMetrics,
}

pub(crate) enum Exchange {
    Reply(ResultMessage),
    TimedOut,
}

impl HassClient {
    /// Creates a client for the server at `base_url`, e.g. `ws://homeassistant.local:8123`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        options: HassClientOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (lost_tx, lost_rx) = mpsc::channel(16);

        let inner = ClientInner {
            base_url: base_url.into(),
            token: token.into(),
            options,
            next_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            pending: Mutex::default(),
            subscriptions: Mutex::default(),
            replay_lock: Mutex::default(),
            writer: Mutex::default(),
            connection: Mutex::default(),
            state,
            auth_error: Mutex::default(),
            lost_tx,
            lost_rx: Mutex::new(Some(lost_rx)),
            closed: AtomicBool::new(false),
            ct: CancellationToken::new(),
            metrics: ClientMetrics::default(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// The websocket endpoint this client connects to.
    pub fn endpoint(&self) -> String {
        self.inner.endpoint()
    }

    /// Opens the connection and starts the receive loop.
    ///
    /// A failure here is returned to the caller and does not start the
    /// reconnection loop. Once a connection was established, later
    /// disconnects are recovered automatically.
    pub async fn connect(&self, ct: &CancellationToken) -> Result<()> {
        let result = self.inner.connect(ct).await;

        if result.is_err() {
            self.inner.set_state(ConnectionState::Disconnected);
            return result;
        }

        if let Some(lost_rx) = self.inner.lost_rx.lock().await.take() {
            tokio::spawn(supervise(self.inner.clone(), lost_rx));
        }

        result
    }

    /// Waits until the session is authenticated.
    pub async fn wait_authenticated(&self, ct: &CancellationToken) -> Result<()> {
        let mut state_rx = self.inner.state.subscribe();

        let state = tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            state = state_rx.wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Authenticated
                        | ConnectionState::AuthRejected
                        | ConnectionState::Closed
                )
            }) => match state {
                Ok(state) => *state,
                Err(_) => return ClosedSnafu {}.fail(),
            },
        };

        match state {
            ConnectionState::Authenticated => Ok(()),
            ConnectionState::AuthRejected => {
                let message = self
                    .inner
                    .auth_error
                    .lock()
                    .await
                    .clone()
                    .unwrap_or_else(|| "invalid access token".to_string());
                AuthenticationSnafu { message }.fail()
            }
            _ => ClosedSnafu {}.fail(),
        }
    }

    /// Subscribes to events, optionally restricted to one event type.
    ///
    /// The returned subscription survives reconnects. It ends when it is
    /// dropped, when `ct` is cancelled, or when the client is closed.
    pub async fn subscribe_events(
        &self,
        ct: &CancellationToken,
        event_type: Option<EventType>,
    ) -> Result<Subscription> {
        let inner = &self.inner;
        ensure!(!inner.ct.is_cancelled(), ClosedSnafu {});

        let key = inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (output, events) = mpsc::channel(inner.options.subscription_buffer.max(1));
        let entry = SubscriptionEntry {
            key,
            event_type,
            output,
            ct: ct.child_token(),
        };

        let replay = inner.replay_lock.lock().await;
        let id = inner.start_subscription(&entry).await?;
        let subscription_ct = entry.ct.clone();

        inner.subscriptions.lock().await.insert(key, entry);
        drop(replay);

        // Close or cancellation may have raced with the insert above.
        if inner.ct.is_cancelled() || subscription_ct.is_cancelled() {
            inner.subscriptions.lock().await.remove(&key);
        }

        info!(key, id, "subscribed to events");

        Ok(Subscription::new(key, events, subscription_ct))
    }

    /// Sends a one-shot command and returns its result payload.
    pub async fn request(&self, ct: &CancellationToken, command: Command) -> Result<Value> {
        self.inner.request(ct, command).await
    }

    /// Fetches the current state of every entity.
    pub async fn get_states(&self, ct: &CancellationToken) -> Result<Vec<State>> {
        let result = self.request(ct, Command::GetStates).await?;
        serde_json::from_value(result).context(ParseResultSnafu { kind: "get_states" })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of subscriptions that will be replayed on reconnect.
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().await.len()
    }

    /// Stops the client, closing every subscription channel and the transport.
    ///
    /// Calling it more than once is a no-op.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.ct.cancel();
        inner.state.send_replace(ConnectionState::Closed);
        inner.metrics.record_state(ConnectionState::Closed);

        let writer = {
            let mut connection = inner.connection.lock().await;
            if let Some(ct) = connection.ct.take() {
                ct.cancel();
            }
            inner.writer.lock().await.take()
        };

        inner.pending.lock().await.clear();

        let subscriptions = std::mem::take(&mut *inner.subscriptions.lock().await);
        for entry in subscriptions.into_values() {
            entry.ct.cancel();
        }

        if let Some(mut sink) = writer {
            let closing = tokio::time::timeout(inner.options.connect_timeout, sink.close());
            if let Ok(Err(err)) = closing.await {
                debug!(err = ?err, "failed to close websocket");
            }
        }

        info!("Home Assistant client closed");
    }
}

impl ClientInner {
    pub fn endpoint(&self) -> String {
        format!("{}/api/websocket", self.base_url.trim_end_matches('/'))
    }

    /// Moves to `next` unless the client is closed.
    pub fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            debug!(state = ?next, "connection state changed");
            self.metrics.record_state(next);
        }
    }

    pub async fn register(&self, capacity: usize) -> (u64, mpsc::Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.pending.lock().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        self.pending.lock().await.remove(&id);
    }

    async fn send_text(&self, kind: &'static str, payload: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return NotConnectedSnafu {}.fail();
        };

        sink.send(Message::Text(payload.into()))
            .await
            .context(SendSnafu { kind })
    }

    pub async fn send_command(&self, id: u64, command: &Command) -> Result<()> {
        let kind = command.kind();
        let payload = serde_json::to_string(&CommandEnvelope { id, command })
            .context(EncodeSnafu { kind })?;

        self.send_text(kind, payload).await
    }

    pub async fn send_auth(&self) -> Result<()> {
        let payload = serde_json::to_string(&AuthMessage {
            access_token: &self.token,
        })
        .context(EncodeSnafu { kind: "auth" })?;

        self.send_text("auth", payload).await
    }

    /// Sends `command` under `id` and waits for the matching result.
    pub async fn exchange(
        &self,
        ct: &CancellationToken,
        id: u64,
        command: &Command,
        rx: &mut mpsc::Receiver<ServerMessage>,
        timeout: std::time::Duration,
    ) -> Result<Exchange> {
        self.send_command(id, command).await?;

        let reply = tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            _ = self.ct.cancelled() => return ClosedSnafu {}.fail(),
            reply = tokio::time::timeout(timeout, rx.recv()) => reply,
        };

        match reply {
            Err(_) => Ok(Exchange::TimedOut),
            Ok(None) => ConnectionLostSnafu {}.fail(),
            Ok(Some(ServerMessage::Result(result))) => Ok(Exchange::Reply(result)),
            Ok(Some(other)) => UnexpectedResponseSnafu {
                expected: "result",
                received: other.kind(),
            }
            .fail(),
        }
    }

    pub async fn request(&self, ct: &CancellationToken, command: Command) -> Result<Value> {
        ensure!(!self.ct.is_cancelled(), ClosedSnafu {});

        let kind = command.kind();
        let timeout = self.options.request_timeout;
        let (id, mut rx) = self.register(1).await;
        let reply = self.exchange(ct, id, &command, &mut rx, timeout).await;
        self.unregister(id).await;

        let result = match reply? {
            Exchange::Reply(result) => result,
            Exchange::TimedOut => {
                return RequestTimeoutSnafu { kind, timeout }.fail();
            }
        };

        if !result.success {
            let error = result.error.unwrap_or_default();
            return CommandFailedSnafu {
                kind,
                code: error.code,
                message: error.message,
            }
            .fail();
        }

        debug!(id, kind, "command succeeded");

        Ok(result.result.unwrap_or(Value::Null))
    }
}
