use std::{borrow::Cow, fmt, str::FromStr, time::Duration};

use opentelemetry::global;
use opentelemetry_otlp::{ExporterBuildError, MetricExporter};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, Layer, prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter},
};

use crate::format::CompactFormat;

mod format;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const DEFAULT_LEVEL: &str = "info";
const EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to build metrics exporter"))]
    Exporter { source: ExporterBuildError },
    #[snafu(display("invalid log filter {filter}"))]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
}

/// How log lines are rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Colourised single line output.
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}, expected pretty or json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Filter directives, e.g. `info` or `hass2ch_ingestor=debug`.
    /// Defaults to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    pub format: LogFormat,
}

/// Keeps the meter provider alive. Dropping it flushes pending metrics.
pub struct ObservabilityGuard {
    meter_provider: SdkMeterProvider,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Err(err) = self.meter_provider.shutdown() {
            tracing::debug!(err = ?err, "failed to shut down meter provider");
        }
    }
}

pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
    options: LogOptions,
) -> Result<ObservabilityGuard, ObservabilityError> {
    // The otel sdk ignores OTEL_SDK_DISABLED, and exporting stays off unless
    // it is explicitly set to false.
    let sdk_disabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v != "false")
        .unwrap_or(true);

    let meter_provider = metrics(package_name, package_version, !sdk_disabled)?;
    let filter = env_filter(options.level.as_deref())?;

    tracing_subscriber::registry()
        .with(stdout(options.format).with_filter(filter))
        .init();

    Ok(ObservabilityGuard { meter_provider })
}

fn env_filter(level: Option<&str>) -> Result<EnvFilter, ObservabilityError> {
    match level {
        Some(filter) => EnvFilter::try_new(filter).context(FilterSnafu { filter }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))),
    }
}

fn stdout<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(CompactFormat::default())
            .fmt_fields(CompactFormat::default())
            .boxed(),
    }
}

fn metrics(
    package_name: impl Into<Cow<'static, str>>,
    version: impl Into<Cow<'static, str>>,
    sdk_enabled: bool,
) -> Result<SdkMeterProvider, ObservabilityError> {
    let resource = Resource::builder()
        .with_service_name(package_name.into().to_string())
        .with_attribute(KeyValue::new("service.version", version.into().to_string()))
        .build();

    let mut meter_provider = SdkMeterProvider::builder().with_resource(resource);

    if sdk_enabled {
        let exporter = MetricExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu {})?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(EXPORT_INTERVAL)
            .build();

        meter_provider = meter_provider.with_reader(reader);
    }

    let meter_provider = meter_provider.build();
    global::set_meter_provider(meter_provider.clone());

    Ok(meter_provider)
}
