use std::time::Duration;

use hass2ch_observability::{Counter, Histogram, KeyValue};

pub struct PipelineMetrics {
    pub events_received: Counter<u64>,
    pub events_filtered: Counter<u64>,
    pub events_processed: Counter<u64>,
    pub events_failed: Counter<u64>,
    pub batches_processed: Counter<u64>,
    pub batch_size: Histogram<u64>,
    pub batch_duration: Histogram<f64>,
    pub database_operations: Counter<u64>,
    pub query_duration: Histogram<f64>,
    pub retry_attempts: Counter<u64>,
    pub retry_successes: Counter<u64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        let meter = hass2ch_observability::meter("ingestion");
        Self {
            events_received: meter
                .u64_counter("hass2ch.events.received")
                .with_unit("{event}")
                .with_description("events received from Home Assistant")
                .build(),
            events_filtered: meter
                .u64_counter("hass2ch.events.filtered")
                .with_unit("{event}")
                .with_description("events dropped because of their type")
                .build(),
            events_processed: meter
                .u64_counter("hass2ch.events.processed")
                .with_unit("{event}")
                .with_description("events written to ClickHouse")
                .build(),
            events_failed: meter
                .u64_counter("hass2ch.events.failed")
                .with_unit("{event}")
                .with_description("events that could not be resolved or written")
                .build(),
            batches_processed: meter
                .u64_counter("hass2ch.batches.processed")
                .with_unit("{batch}")
                .with_description("batches handled by the pipeline")
                .build(),
            batch_size: meter
                .u64_histogram("hass2ch.batch.size")
                .with_unit("{event}")
                .with_description("number of events per batch")
                .with_boundaries(vec![10.0, 100.0, 1_000.0, 10_000.0, 100_000.0])
                .build(),
            batch_duration: meter
                .f64_histogram("hass2ch.batch.duration")
                .with_unit("s")
                .with_description("time spent writing a batch")
                .build(),
            database_operations: meter
                .u64_counter("hass2ch.database.operations")
                .with_unit("{operation}")
                .with_description("ClickHouse statements by operation and status")
                .build(),
            query_duration: meter
                .f64_histogram("hass2ch.query.duration")
                .with_unit("s")
                .with_description("duration of successful ClickHouse statements, retries included")
                .build(),
            retry_attempts: meter
                .u64_counter("hass2ch.retry.attempts")
                .with_unit("{attempt}")
                .with_description("retried ClickHouse statements")
                .build(),
            retry_successes: meter
                .u64_counter("hass2ch.retry.successes")
                .with_unit("{operation}")
                .with_description("ClickHouse statements that succeeded after a retry")
                .build(),
        }
    }
}

impl PipelineMetrics {
    pub fn record_success(&self, operation: &'static str, elapsed: Duration) {
        self.count_operation(operation, "success");
        self.query_duration.record(
            elapsed.as_secs_f64(),
            &[KeyValue::new("operation", operation)],
        );
    }

    pub fn record_failure(&self, operation: &'static str) {
        self.count_operation(operation, "error");
    }

    fn count_operation(&self, operation: &'static str, status: &'static str) {
        self.database_operations.add(
            1,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("status", status),
            ],
        );
    }
}
