use std::{sync::Arc, time::Duration};

use clap::Args;
use hass2ch_clickhouse::{ClickHouseClient, ClickHouseOptions};
use hass2ch_ingestor::{Pipeline, PipelineOptions};
use hass2ch_retry::RetryConfig;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::{ClickHouseSnafu, InvalidArgumentSnafu, PipelineSnafu, Result},
    hass_args::HassArgs,
};

#[derive(Debug, Args)]
pub struct PipelineArgs {
    #[clap(flatten)]
    hass: HassArgs,
    /// ClickHouse HTTP interface
    #[arg(long, default_value = "http://localhost:8123")]
    clickhouse_url: String,
    /// Database holding one table per entity domain
    #[arg(long, default_value = "hass")]
    clickhouse_database: String,
    #[arg(long, default_value = "default")]
    clickhouse_username: String,
    #[arg(long, env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    clickhouse_password: Option<String>,
    /// Retries of a failed statement
    #[arg(long, default_value_t = 5)]
    max_retries: u32,
    #[arg(long, default_value_t = 500)]
    initial_interval_millis: u64,
    #[arg(long, default_value_t = 30_000)]
    max_interval_millis: u64,
    #[arg(long, default_value_t = 2.0)]
    retry_multiplier: f64,
    /// Jitter applied to retry delays, between 0 and 1
    #[arg(long, default_value_t = 0.5)]
    randomization_factor: f64,
    /// Timeout of a ClickHouse request
    #[arg(long, default_value_t = 60_000)]
    timeout_millis: u64,
    /// Events per batch before it is written
    #[arg(long, default_value_t = 100_000)]
    batch_max_size: usize,
    /// Time a batch may wait for more events
    #[arg(long, default_value_t = 1_000)]
    batch_max_wait_millis: u64,
}

impl PipelineArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let retry = self.retry_config()?;
        ensure!(
            self.batch_max_size > 0,
            InvalidArgumentSnafu {
                name: "batch-max-size",
                message: "must be greater than zero",
            }
        );

        let clickhouse = ClickHouseClient::new(
            ClickHouseOptions::new(&self.clickhouse_url)
                .with_credentials(&self.clickhouse_username, self.clickhouse_password.clone())
                .with_timeout(Duration::from_millis(self.timeout_millis)),
        )
        .context(ClickHouseSnafu {})?;

        let options = PipelineOptions::default()
            .with_database(&self.clickhouse_database)
            .with_batch(
                self.batch_max_size,
                Duration::from_millis(self.batch_max_wait_millis),
            )
            .with_retry(retry);

        let client = self.hass.connect(&ct).await?;

        info!(
            clickhouse = %clickhouse.url(),
            database = %self.clickhouse_database,
            "starting Home Assistant to ClickHouse pipeline"
        );

        let pipeline = Pipeline::new(Arc::new(client.clone()), Arc::new(clickhouse), options);
        let result = pipeline.run(ct).await.context(PipelineSnafu {});

        client.close().await;
        result
    }

    fn retry_config(&self) -> Result<RetryConfig> {
        ensure!(
            (0.0..=1.0).contains(&self.randomization_factor),
            InvalidArgumentSnafu {
                name: "randomization-factor",
                message: "must be between 0 and 1",
            }
        );
        ensure!(
            self.retry_multiplier >= 1.0,
            InvalidArgumentSnafu {
                name: "retry-multiplier",
                message: "must be at least 1.0",
            }
        );

        Ok(RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_initial_interval(Duration::from_millis(self.initial_interval_millis))
            .with_max_interval(Duration::from_millis(self.max_interval_millis))
            .with_multiplier(self.retry_multiplier)
            .with_randomization_factor(self.randomization_factor))
    }
}
