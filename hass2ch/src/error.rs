use hass2ch_clickhouse::ClickHouseError;
use hass2ch_hass_client::HassClientError;
use hass2ch_ingestor::PipelineError;
use hass2ch_observability::ObservabilityError;
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Failed to initialize logging and metrics"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Home Assistant {operation} failed"))]
    HomeAssistant {
        operation: &'static str,
        source: HassClientError,
    },
    #[snafu(display("Invalid ClickHouse configuration"))]
    ClickHouse { source: ClickHouseError },
    #[snafu(display("Pipeline failed"))]
    Pipeline { source: PipelineError },
    #[snafu(display("JSON encode error"))]
    JsonEncode { source: serde_json::Error },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
