use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures_util::StreamExt;
use hass2ch_batcher::{Batch, BatchOptions, batch};
use hass2ch_clickhouse::{ClickHouseError, StatementExecutor, encode_json_each_row};
use hass2ch_hass_client::{EventMessage, EventType, HassClientError};
use hass2ch_observability::KeyValue;
use hass2ch_retry::{RetryConfig, RetryError, RetryObserver, retry_with_observer};
use snafu::{ResultExt, ensure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{CreateDatabaseSnafu, InvalidDatabaseSnafu, Result, SubscribeSnafu},
    metrics::PipelineMetrics,
    resolve::{Destination, ResolveError, StateChange, partition_by_entity_domain, resolve_event},
    schema::{create_database_statement, create_table_statement, insert_statement, is_valid_identifier},
    source::{EventSource, EventStream},
};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Database holding one table per entity domain.
    pub database: String,
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    /// Capacity of the queue between the subscription and the batcher.
    pub buffer_size: usize,
    /// Retry policy of every ClickHouse statement.
    pub retry: RetryConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            database: "hass".to_string(),
            max_batch_size: 100_000,
            max_batch_wait: Duration::from_secs(1),
            buffer_size: 1_000,
            retry: RetryConfig::sink_default(),
        }
    }
}

impl PipelineOptions {
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_batch(mut self, max_size: usize, max_wait: Duration) -> Self {
        self.max_batch_size = max_size;
        self.max_batch_wait = max_wait;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

pub struct Pipeline {
    source: Arc<dyn EventSource>,
    executor: Arc<dyn StatementExecutor>,
    options: PipelineOptions,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn EventSource>,
        executor: Arc<dyn StatementExecutor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            executor,
            options,
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    /// Runs until `ct` is cancelled or the event stream ends.
    ///
    /// Only startup failures are returned. Once events flow, failed batches
    /// are logged and counted.
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let database = self.options.database.clone();
        ensure!(
            is_valid_identifier(&database),
            InvalidDatabaseSnafu { database }
        );

        info!(database = %database, "starting pipeline");

        match self
            .execute_statement(&ct, "create_database", &create_database_statement(&database), None)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => return Ok(()),
            Err(err) => return Err(err).context(CreateDatabaseSnafu { database }),
        }

        let events = match self
            .source
            .subscribe(&ct, Some(EventType::state_changed()))
            .await
        {
            Ok(events) => events,
            Err(HassClientError::Cancelled) => return Ok(()),
            Err(err) => return Err(err).context(SubscribeSnafu {}),
        };

        let (tx, rx) = mpsc::channel(self.options.buffer_size.max(1));
        tokio::spawn(forward_state_changes(
            events,
            tx,
            self.metrics.clone(),
            ct.clone(),
        ));

        let batch_options = BatchOptions::default()
            .with_max_size(self.options.max_batch_size)
            .with_max_wait(self.options.max_batch_wait)
            .with_partition_by(partition_by_entity_domain);
        let (mut batches, mut partition_errors) = batch(rx, batch_options);

        // Tables known to exist, as `database.table`.
        let mut tables = HashSet::new();

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    info!("pipeline stopped");
                    return Ok(());
                }
                Some(err) = partition_errors.recv() => {
                    self.metrics.events_failed.add(1, &[]);
                    warn!(err = ?err, "failed to partition event");
                }
                batch = batches.recv() => {
                    let Some(batch) = batch else {
                        info!("event stream ended, pipeline stopped");
                        return Ok(());
                    };

                    self.handle_batch(&ct, &mut tables, batch).await;
                }
            }
        }
    }

    async fn handle_batch(
        &self,
        ct: &CancellationToken,
        tables: &mut HashSet<String>,
        batch: Batch<EventMessage>,
    ) {
        let start = Instant::now();
        let size = batch.len() as u64;
        self.metrics.batches_processed.add(1, &[]);
        self.metrics.batch_size.record(size, &[]);

        let (destination, rows, errors) = resolve_batch(&self.options.database, &batch);
        if !errors.is_empty() {
            self.metrics.events_failed.add(errors.len() as u64, &[]);
        }
        for err in &errors {
            warn!(err = ?err, partition = %batch.key, "failed to resolve event");
        }

        if let Some(destination) = destination {
            self.write_rows(ct, tables, &destination, &rows).await;
        }

        self.metrics
            .batch_duration
            .record(start.elapsed().as_secs_f64(), &[KeyValue::new("partition", batch.key)]);
    }

    async fn write_rows(
        &self,
        ct: &CancellationToken,
        tables: &mut HashSet<String>,
        destination: &Destination,
        rows: &[StateChange],
    ) {
        let table = destination.qualified_name();
        let count = rows.len() as u64;

        if !tables.contains(&table) {
            info!(table = %table, column_type = destination.column_type, "creating table");

            let statement = create_table_statement(
                &destination.database,
                &destination.table,
                destination.column_type,
            );
            if let Err(err) = self.execute_statement(ct, "create_table", &statement, None).await {
                self.metrics.events_failed.add(count, &[]);
                error!(err = ?err, table = %table, rows = count, "failed to create table, batch lost");
                return;
            }

            tables.insert(table.clone());
        }

        let body = match encode_json_each_row(rows) {
            Ok(body) => body,
            Err(err) => {
                self.metrics.events_failed.add(count, &[]);
                error!(err = ?err, table = %table, rows = count, "failed to encode rows");
                return;
            }
        };

        let statement = insert_statement(&destination.database, &destination.table);
        match self.execute_statement(ct, "insert", &statement, Some(body)).await {
            Ok(()) => {
                self.metrics.events_processed.add(count, &[]);
                info!(table = %table, rows = count, "inserted rows");
            }
            Err(err) => {
                self.metrics.events_failed.add(count, &[]);
                error!(err = ?err, table = %table, rows = count, "failed to insert rows");
            }
        }
    }

    async fn execute_statement(
        &self,
        ct: &CancellationToken,
        operation: &'static str,
        statement: &str,
        body: Option<Bytes>,
    ) -> Result<(), RetryError<ClickHouseError>> {
        let start = Instant::now();
        let executor = &self.executor;
        let observer = StatementObserver {
            operation,
            metrics: &self.metrics,
        };

        let result = retry_with_observer(
            ct,
            &self.options.retry,
            ClickHouseError::is_retryable,
            &observer,
            move || executor.execute(statement, body.clone()),
        )
        .await;

        match &result {
            Ok(()) => self.metrics.record_success(operation, start.elapsed()),
            Err(_) => self.metrics.record_failure(operation),
        }

        result
    }
}

/// Resolves every event of `batch`. Returns the batch destination, the rows
/// and the errors of the events that were dropped.
///
/// The first resolved event fixes the destination, later events resolving
/// elsewhere are dropped.
fn resolve_batch(
    database: &str,
    batch: &Batch<EventMessage>,
) -> (Option<Destination>, Vec<StateChange>, Vec<ResolveError>) {
    let mut destination: Option<Destination> = None;
    let mut rows = Vec::with_capacity(batch.len());
    let mut errors = Vec::new();

    for message in &batch.items {
        let (resolved, row) = match resolve_event(database, &message.event) {
            Ok(resolved) => resolved,
            Err(err) => {
                errors.push(err);
                continue;
            }
        };

        if let Some(current) = &destination {
            if *current != resolved {
                errors.push(ResolveError::ConflictingDestination {
                    expected: current.qualified_name(),
                    found: resolved.qualified_name(),
                });
                continue;
            }
        } else {
            destination = Some(resolved);
        }

        rows.push(row);
    }

    (destination, rows, errors)
}

/// Counts incoming events and passes the `state_changed` ones on.
async fn forward_state_changes(
    mut events: EventStream,
    tx: mpsc::Sender<EventMessage>,
    metrics: Arc<PipelineMetrics>,
    ct: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = ct.cancelled() => break,
            message = events.next() => message,
        };

        let Some(message) = message else {
            debug!("event subscription closed");
            break;
        };

        metrics.events_received.add(1, &[]);

        if !message.event.event_type.is_state_changed() {
            metrics.events_filtered.add(1, &[]);
            debug!(event_type = %message.event.event_type, "ignoring event");
            continue;
        }

        tokio::select! {
            _ = ct.cancelled() => break,
            sent = tx.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

struct StatementObserver<'a> {
    operation: &'static str,
    metrics: &'a PipelineMetrics,
}

impl RetryObserver<ClickHouseError> for StatementObserver<'_> {
    fn on_retry_attempt(&self, attempt: u32, error: &ClickHouseError, next_backoff: Duration) {
        self.metrics
            .retry_attempts
            .add(1, &[KeyValue::new("operation", self.operation)]);
        warn!(
            err = ?error,
            operation = self.operation,
            attempt,
            backoff = ?next_backoff,
            "statement failed, retrying"
        );
    }

    fn on_retry_success(&self, attempt: u32) {
        self.metrics
            .retry_successes
            .add(1, &[KeyValue::new("operation", self.operation)]);
        info!(operation = self.operation, attempt, "statement succeeded after retry");
    }

    fn on_retry_failure(&self, attempt: u32, error: &ClickHouseError) {
        error!(
            err = ?error,
            operation = self.operation,
            attempt,
            "statement failed, giving up"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use hass2ch_hass_client::{Event, EventContext, EventData, State};
    use serde_json::json;

    use super::*;

    fn message(entity_id: &str, old: &str, new: &str) -> EventMessage {
        let state = |value: &str| State {
            entity_id: entity_id.to_string(),
            state: value.to_string(),
            attributes: json!({}),
            context: json!({}),
            last_changed: Utc::now(),
            last_updated: Utc::now(),
            last_reported: None,
        };

        EventMessage {
            id: 1,
            event: Event {
                event_type: EventType::state_changed(),
                time_fired: Utc::now(),
                origin: "LOCAL".to_string(),
                context: EventContext::default(),
                data: EventData {
                    entity_id: entity_id.to_string(),
                    old_state: Some(state(old)),
                    new_state: Some(state(new)),
                },
            },
        }
    }

    #[test]
    fn test_conflicting_destination_is_dropped() {
        let batch = Batch {
            key: "switch".to_string(),
            items: vec![
                message("switch.a", "off", "on"),
                message("light.b", "off", "on"),
                message("switch.c", "on", "off"),
            ],
        };

        let (destination, rows, errors) = resolve_batch("hass", &batch);

        let destination = destination.expect("destination");
        assert_eq!(destination.qualified_name(), "hass.switch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].entity_id, "switch.c");
        assert_eq!(
            errors,
            vec![ResolveError::ConflictingDestination {
                expected: "hass.switch".to_string(),
                found: "hass.light".to_string(),
            }]
        );
    }

    #[test]
    fn test_unresolvable_events_are_reported() {
        let batch = Batch {
            key: "light".to_string(),
            items: vec![
                message("light.a", "on", "unavailable"),
                message("light.a", "unavailable", "off"),
            ],
        };

        let (destination, rows, errors) = resolve_batch("hass", &batch);

        assert_eq!(destination.map(|d| d.table).as_deref(), Some("light"));
        assert_eq!(rows.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ResolveError::SkippedState { .. }));
    }
}
