#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures_util::{StreamExt, stream};
use hass2ch_clickhouse::{ClickHouseError, StatementExecutor};
use hass2ch_hass_client::{
    Event, EventContext, EventData, EventMessage, EventType, HassClientError, State,
};
use hass2ch_ingestor::{EventSource, EventStream, PipelineOptions};
use hass2ch_retry::RetryConfig;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

/// Event source fed by the test through an mpsc channel.
pub struct ChannelSource {
    events: Mutex<Option<mpsc::Receiver<EventMessage>>>,
    requested: Mutex<Vec<Option<EventType>>>,
}

impl ChannelSource {
    pub fn new() -> (Arc<Self>, mpsc::Sender<EventMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let source = Self {
            events: Mutex::new(Some(rx)),
            requested: Mutex::new(Vec::new()),
        };
        (Arc::new(source), tx)
    }

    pub fn requested(&self) -> Vec<Option<EventType>> {
        self.requested.lock().expect("lock").clone()
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn subscribe(
        &self,
        _ct: &CancellationToken,
        event_type: Option<EventType>,
    ) -> Result<EventStream, HassClientError> {
        self.requested.lock().expect("lock").push(event_type);

        let Some(rx) = self.events.lock().expect("lock").take() else {
            return Err(HassClientError::Closed);
        };

        let events = stream::unfold(rx, |mut rx| async move {
            let message = rx.recv().await?;
            Some((message, rx))
        });
        Ok(events.boxed())
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub query: String,
    pub body: Option<Bytes>,
}

impl Statement {
    pub fn rows(&self) -> Vec<Value> {
        let body = self.body.as_ref().expect("statement has no body");
        std::str::from_utf8(body)
            .expect("utf8 body")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json row"))
            .collect()
    }
}

/// Executor that records every statement and fails the ones it was told to.
#[derive(Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<Statement>>,
    failures: Mutex<Vec<(String, ClickHouseError)>>,
}

impl RecordingExecutor {
    /// Fails the next statement starting with `prefix`.
    pub fn fail_next(&self, prefix: &str, error: ClickHouseError) {
        self.failures
            .lock()
            .expect("lock")
            .push((prefix.to_string(), error));
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().expect("lock").clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.query).collect()
    }

    pub fn inserts(&self) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| s.query.starts_with("INSERT"))
            .collect()
    }

    pub async fn wait_for_inserts(&self, count: usize) -> Vec<Statement> {
        tokio::time::timeout(WAIT, async {
            loop {
                let inserts = self.inserts();
                if inserts.len() >= count {
                    return inserts;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for inserts")
    }
}

#[async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn execute(&self, query: &str, body: Option<Bytes>) -> hass2ch_clickhouse::Result<()> {
        self.statements.lock().expect("lock").push(Statement {
            query: query.to_string(),
            body,
        });

        let mut failures = self.failures.lock().expect("lock");
        if let Some(idx) = failures.iter().position(|(prefix, _)| query.starts_with(prefix)) {
            let (_, error) = failures.remove(idx);
            return Err(error);
        }

        Ok(())
    }
}

pub fn unavailable() -> ClickHouseError {
    ClickHouseError::Response {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

pub fn syntax_error() -> ClickHouseError {
    ClickHouseError::Response {
        status: 400,
        message: "Code: 62. DB::Exception: Syntax error".to_string(),
    }
}

pub fn options(max_size: usize, max_wait: Duration) -> PipelineOptions {
    PipelineOptions::default()
        .with_batch(max_size, max_wait)
        .with_retry(
            RetryConfig::default()
                .with_max_retries(3)
                .with_initial_interval(Duration::from_millis(1))
                .with_max_interval(Duration::from_millis(5))
                .with_randomization_factor(0.0),
        )
}

pub fn state(entity_id: &str, value: &str) -> State {
    let ts = Utc
        .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
        .single()
        .expect("timestamp");
    State {
        entity_id: entity_id.to_string(),
        state: value.to_string(),
        attributes: json!({"friendly_name": entity_id}),
        context: json!({"id": "01HX"}),
        last_changed: ts,
        last_updated: ts,
        last_reported: None,
    }
}

pub fn state_changed(entity_id: &str, old: &str, new: &str) -> EventMessage {
    EventMessage {
        id: 1,
        event: Event {
            event_type: EventType::state_changed(),
            time_fired: Utc::now(),
            origin: "LOCAL".to_string(),
            context: EventContext::default(),
            data: EventData {
                entity_id: entity_id.to_string(),
                old_state: Some(state(entity_id, old)),
                new_state: Some(state(entity_id, new)),
            },
        },
    }
}

pub fn other_event(event_type: &str) -> EventMessage {
    let mut message = state_changed("light.hall", "off", "on");
    message.event.event_type = EventType::new(event_type);
    message
}
