use hass2ch_clickhouse::ClickHouseError;
use hass2ch_hass_client::HassClientError;
use hass2ch_retry::RetryError;
use snafu::Snafu;

/// Failures that stop the pipeline before it starts consuming events.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("invalid database name {database}"))]
    InvalidDatabase { database: String },
    #[snafu(display("failed to create database {database}"))]
    CreateDatabase {
        database: String,
        source: RetryError<ClickHouseError>,
    },
    #[snafu(display("failed to subscribe to state changes"))]
    Subscribe { source: HassClientError },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
