use std::sync::Arc;

use futures_util::{
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use snafu::{ResultExt, ensure};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::USER_AGENT},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    client::{ClientInner, ConnectionState},
    error::{
        CancelledSnafu, ClosedSnafu, ConnectSnafu, ConnectTimeoutSnafu, HassClientError,
        InvalidUrlSnafu, Result,
    },
    message::ServerMessage,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// The current connection. Every new connection bumps the generation so
/// that signals from a replaced connection can be told apart.
#[derive(Default)]
pub(crate) struct ConnectionHandle {
    pub generation: u64,
    pub ct: Option<CancellationToken>,
}

enum SessionOutcome {
    Authenticated,
    Rejected,
    Lost,
    TimedOut,
    Closed,
}

impl ClientInner {
    pub async fn connect(self: &Arc<Self>, ct: &CancellationToken) -> Result<()> {
        ensure!(!self.ct.is_cancelled(), ClosedSnafu {});

        let url = self.endpoint();
        self.set_state(ConnectionState::Connecting);
        info!(url = %url, "connecting to Home Assistant");

        let mut request = url
            .as_str()
            .into_client_request()
            .context(InvalidUrlSnafu { url: url.clone() })?;
        if let Ok(user_agent) = HeaderValue::from_str(&self.options.user_agent) {
            request.headers_mut().insert(USER_AGENT, user_agent);
        }

        let connecting = tokio::time::timeout(self.options.connect_timeout, connect_async(request));
        let stream = tokio::select! {
            _ = ct.cancelled() => return CancelledSnafu {}.fail(),
            _ = self.ct.cancelled() => return ClosedSnafu {}.fail(),
            result = connecting => match result {
                Err(_) => return ConnectTimeoutSnafu { url }.fail(),
                Ok(result) => {
                    let (stream, _response) = result.context(ConnectSnafu { url: url.clone() })?;
                    stream
                }
            },
        };

        let (sink, source) = stream.split();
        let connection_ct = self.ct.child_token();

        let generation = {
            let mut connection = self.connection.lock().await;
            if let Some(previous) = connection.ct.replace(connection_ct.clone()) {
                previous.cancel();
            }
            connection.generation += 1;

            *self.writer.lock().await = Some(sink);
            // Responses of the previous connection will never arrive.
            self.pending.lock().await.clear();

            connection.generation
        };

        *self.auth_error.lock().await = None;
        self.set_state(ConnectionState::AwaitingAuth);

        tokio::spawn(receive_loop(
            self.clone(),
            source,
            generation,
            connection_ct.clone(),
        ));

        if self.ct.is_cancelled() {
            connection_ct.cancel();
            self.writer.lock().await.take();
            return ClosedSnafu {}.fail();
        }

        debug!(url = %url, generation, "connected to Home Assistant");

        Ok(())
    }

    pub async fn current_generation(&self) -> u64 {
        self.connection.lock().await.generation
    }

    /// Called by the receive loop of `generation` when its transport failed.
    async fn connection_lost(&self, generation: u64) {
        {
            let connection = self.connection.lock().await;
            if connection.generation != generation {
                return;
            }

            self.writer.lock().await.take();
            self.pending.lock().await.clear();
        }

        // The server closes the connection after `auth_invalid`, retrying
        // with the same token cannot succeed.
        let rejected = *self.state.borrow() == ConnectionState::AuthRejected;
        if self.ct.is_cancelled() || rejected {
            return;
        }

        self.set_state(ConnectionState::Reconnecting);

        // A full queue already holds a pending reconnect signal.
        let _ = self.lost_tx.try_send(generation);
    }

    /// Tears down the current connection without scheduling a reconnect.
    async fn drop_connection(&self) {
        let mut connection = self.connection.lock().await;
        if let Some(ct) = connection.ct.take() {
            ct.cancel();
        }
        connection.generation += 1;

        self.writer.lock().await.take();
        self.pending.lock().await.clear();
    }

    async fn handle_text(&self, text: &str, ct: &CancellationToken) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(err = ?err, "failed to decode message");
                return;
            }
        };

        match message {
            ServerMessage::AuthRequired { ha_version } => {
                debug!(ha_version = ?ha_version, "authentication required");
                if let Err(err) = self.send_auth().await {
                    error!(err = ?err, "failed to send authentication message");
                }
            }
            ServerMessage::AuthOk { ha_version } => {
                info!(ha_version = ?ha_version, "authenticated with Home Assistant");
                self.set_state(ConnectionState::Authenticated);
            }
            ServerMessage::AuthInvalid { message } => {
                error!(message = ?message, "Home Assistant rejected the access token");
                *self.auth_error.lock().await = message;
                self.set_state(ConnectionState::AuthRejected);
            }
            message => self.dispatch(message, ct).await,
        }
    }

    /// Routes a response to the receiver registered under its id.
    async fn dispatch(&self, message: ServerMessage, ct: &CancellationToken) {
        let Some(id) = message.id() else {
            return;
        };

        let sender = self.pending.lock().await.get(&id).cloned();
        let Some(sender) = sender else {
            warn!(id, kind = message.kind(), "dropping message for unknown request id");
            return;
        };

        tokio::select! {
            _ = ct.cancelled() => {}
            sent = sender.send(message) => {
                if sent.is_err() {
                    trace!(id, "receiver gone, removing request id");
                    self.unregister(id).await;
                }
            }
        }
    }

    async fn wait_session(&self) -> SessionOutcome {
        let mut state_rx = self.state.subscribe();
        let waiting = state_rx.wait_for(|state| {
            !matches!(
                state,
                ConnectionState::Connecting | ConnectionState::AwaitingAuth
            )
        });

        match tokio::time::timeout(self.options.auth_timeout, waiting).await {
            Err(_) => SessionOutcome::TimedOut,
            Ok(Err(_)) => SessionOutcome::Closed,
            Ok(Ok(state)) => match *state {
                ConnectionState::Authenticated => SessionOutcome::Authenticated,
                ConnectionState::AuthRejected => SessionOutcome::Rejected,
                ConnectionState::Closed => SessionOutcome::Closed,
                _ => SessionOutcome::Lost,
            },
        }
    }

    /// Reconnects until a session is authenticated, then replays subscriptions.
    async fn reconnect(self: &Arc<Self>) {
        let backoff = self.options.reconnect.clone();
        let mut interval = backoff.first_interval();
        let mut attempt = 0u64;

        loop {
            if self.ct.is_cancelled() {
                return;
            }

            attempt += 1;
            self.metrics.reconnects.add(1, &[]);
            self.set_state(ConnectionState::Reconnecting);
            info!(attempt, "reconnecting to Home Assistant");

            match self.connect(&self.ct).await {
                Ok(()) => match self.wait_session().await {
                    SessionOutcome::Authenticated => {
                        info!(attempt, "reconnected to Home Assistant");
                        self.replay_subscriptions().await;
                        return;
                    }
                    SessionOutcome::Rejected => {
                        error!("access token rejected after reconnect, giving up");
                        return;
                    }
                    SessionOutcome::Closed => return,
                    SessionOutcome::Lost => {
                        warn!(attempt, "connection lost before authentication");
                    }
                    SessionOutcome::TimedOut => {
                        warn!(
                            attempt,
                            timeout = ?self.options.auth_timeout,
                            "timed out waiting for authentication"
                        );
                        self.drop_connection().await;
                    }
                },
                Err(HassClientError::Closed | HassClientError::Cancelled) => return,
                Err(err) => {
                    warn!(err = ?err, attempt, retry_in = ?interval, "reconnect attempt failed");
                }
            }

            tokio::select! {
                _ = self.ct.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            interval = backoff.next_interval(interval);
        }
    }
}

pub(crate) async fn supervise(inner: Arc<ClientInner>, mut lost_rx: mpsc::Receiver<u64>) {
    loop {
        let generation = tokio::select! {
            _ = inner.ct.cancelled() => break,
            generation = lost_rx.recv() => match generation {
                Some(generation) => generation,
                None => break,
            },
        };

        if generation != inner.current_generation().await {
            trace!(generation, "ignoring signal from a replaced connection");
            continue;
        }

        inner.reconnect().await;
    }

    debug!("reconnect supervisor stopped");
}

async fn receive_loop(
    inner: Arc<ClientInner>,
    mut source: WsSource,
    generation: u64,
    ct: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = ct.cancelled() => {
                debug!(generation, "receive loop stopped");
                return;
            }
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => inner.handle_text(text.as_str(), &ct).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => inner.handle_text(text, &ct).await,
                Err(_) => warn!(len = data.len(), "ignoring non utf-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!(frame = ?frame, "Home Assistant closed the connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(err = ?err, "websocket read failed");
                break;
            }
            None => {
                warn!("websocket stream ended");
                break;
            }
        }
    }

    if ct.is_cancelled() {
        return;
    }

    inner.connection_lost(generation).await;
}
