use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hass2ch_hass_client::{HassClient, HassClientOptions, ReconnectOptions};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

pub const TOKEN: &str = "test-token";

const WAIT: Duration = Duration::from_secs(5);

/// Fake Home Assistant websocket endpoint. Every accepted connection goes
/// through the auth handshake and is then handed to the test.
pub struct MockServer {
    pub url: String,
    connections: mpsc::Receiver<MockConnection>,
}

pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let mut connection = MockConnection { ws };
                    if connection.handshake().await {
                        let _ = tx.send(connection).await;
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            connections: rx,
        }
    }

    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    pub fn client(&self, token: &str) -> HassClient {
        self.client_with(token, options())
    }

    pub fn client_with(&self, token: &str, options: HassClientOptions) -> HassClient {
        HassClient::new(&self.url, token, options)
    }
}

/// Client options with short timeouts and fast reconnects.
pub fn options() -> HassClientOptions {
    HassClientOptions::default()
        .with_subscribe_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectOptions::new(
            Duration::from_millis(50),
            Duration::from_millis(200),
            1.5,
        ))
}

impl MockConnection {
    async fn handshake(&mut self) -> bool {
        self.send_json(json!({"type": "auth_required", "ha_version": "2024.5.0"}))
            .await;

        let auth = self.recv_json().await;
        assert_eq!(auth["type"], "auth");

        if auth["access_token"] == TOKEN {
            self.send_json(json!({"type": "auth_ok", "ha_version": "2024.5.0"}))
                .await;
            true
        } else {
            self.send_json(json!({
                "type": "auth_invalid",
                "message": "Invalid access token or password"
            }))
            .await;
            let _ = self.ws.close(None).await;
            false
        }
    }

    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a client message");

            match frame {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("client sent invalid json");
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send");
    }

    /// Receives the next command, asserting its type, and returns its id.
    pub async fn expect_command(&mut self, kind: &str) -> (u64, Value) {
        let command = self.recv_json().await;
        assert_eq!(command["type"], kind, "unexpected command {command}");
        let id = command["id"].as_u64().expect("command id");
        (id, command)
    }

    pub async fn reply(&mut self, id: u64, result: Value) {
        self.send_json(json!({"id": id, "type": "result", "success": true, "result": result}))
            .await;
    }

    pub async fn reply_error(&mut self, id: u64, code: &str, message: &str) {
        self.send_json(json!({
            "id": id,
            "type": "result",
            "success": false,
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    pub async fn send_state_changed(&mut self, id: u64, entity_id: &str, old: &str, new: &str) {
        self.send_json(state_changed_event(id, entity_id, old, new))
            .await;
    }
}

pub fn state(entity_id: &str, value: &str) -> Value {
    json!({
        "entity_id": entity_id,
        "state": value,
        "attributes": {"friendly_name": entity_id},
        "context": {"id": "01HXCTX"},
        "last_changed": "2024-05-01T10:00:00.123+00:00",
        "last_updated": "2024-05-01T10:00:00.123+00:00"
    })
}

pub fn state_changed_event(id: u64, entity_id: &str, old: &str, new: &str) -> Value {
    json!({
        "id": id,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "time_fired": "2024-05-01T10:00:00.123+00:00",
            "origin": "LOCAL",
            "context": {"id": "01HXCTX", "parent_id": null, "user_id": null},
            "data": {
                "entity_id": entity_id,
                "old_state": state(entity_id, old),
                "new_state": state(entity_id, new)
            }
        }
    })
}
