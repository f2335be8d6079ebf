use clap::{Parser, Subcommand};
use hass2ch_observability::{LogFormat, LogOptions, init_observability};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    dump::DumpArgs,
    error::{ObservabilitySnafu, Result},
    pipeline::PipelineArgs,
};

mod dump;
mod error;
mod hass_args;
mod pipeline;

#[derive(Parser)]
#[command(name = "hass2ch")]
#[command(about = "Stream Home Assistant state changes into ClickHouse")]
#[command(version)]
struct Cli {
    /// Log filter directives, e.g. `info` or `hass2ch_ingestor=debug`
    #[arg(long, env = "RUST_LOG", global = true)]
    log_level: Option<String>,
    /// Log output format: pretty or json
    #[arg(long, env = "RUST_LOG_FORMAT", default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every Home Assistant event as JSON
    Dump {
        #[clap(flatten)]
        inner: DumpArgs,
    },
    /// Write state changes to ClickHouse
    Pipeline {
        #[clap(flatten)]
        inner: PipelineArgs,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_observability(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        LogOptions {
            level: cli.log_level,
            format: cli.log_format,
        },
    )
    .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Dump { inner } => inner.run(ct).await,
        Commands::Pipeline { inner } => inner.run(ct).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::parse_from(["hass2ch", "--log-format", "json", "dump", "--token", "abc"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Dump { .. }));

        let cli = Cli::try_parse_from(["hass2ch", "--log-format", "xml", "dump", "--token", "abc"]);
        assert!(cli.is_err());
    }
}
