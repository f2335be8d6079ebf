use std::time::Duration;

use clap::Args;
use hass2ch_hass_client::{HassClient, HassClientOptions, ReconnectOptions};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{HomeAssistantSnafu, InvalidArgumentSnafu, Result};

/// Arguments for connecting to Home Assistant.
#[derive(Args, Debug, Clone)]
pub struct HassArgs {
    /// Home Assistant host and port
    #[arg(long, default_value = "homeassistant.local:8123")]
    pub host: String,
    /// Connect with wss instead of ws
    #[arg(long)]
    pub secure: bool,
    /// Long-lived access token
    #[arg(long, env = "HASS_TOKEN", hide_env_values = true)]
    pub token: String,
    /// Delay before the first reconnection attempt
    #[arg(long, default_value_t = 1_000)]
    pub reconnect_initial_millis: u64,
    /// Upper bound of the delay between reconnection attempts
    #[arg(long, default_value_t = 30_000)]
    pub reconnect_max_millis: u64,
    #[arg(long, default_value_t = 1.5)]
    pub reconnect_multiplier: f64,
}

impl HassArgs {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.host)
    }

    fn client(&self) -> Result<HassClient> {
        ensure!(
            !self.host.is_empty() && !self.host.contains("://"),
            InvalidArgumentSnafu {
                name: "host",
                message: "expected host[:port] without a scheme",
            }
        );
        ensure!(
            !self.token.is_empty(),
            InvalidArgumentSnafu {
                name: "token",
                message: "must not be empty",
            }
        );
        ensure!(
            self.reconnect_multiplier >= 1.0,
            InvalidArgumentSnafu {
                name: "reconnect-multiplier",
                message: "must be at least 1.0",
            }
        );

        let reconnect = ReconnectOptions::new(
            Duration::from_millis(self.reconnect_initial_millis),
            Duration::from_millis(self.reconnect_max_millis),
            self.reconnect_multiplier,
        );
        let options = HassClientOptions::default().with_reconnect(reconnect);

        Ok(HassClient::new(self.base_url(), &self.token, options))
    }

    /// Connects and waits for the session to be authenticated.
    pub async fn connect(&self, ct: &CancellationToken) -> Result<HassClient> {
        let client = self.client()?;
        info!(endpoint = %client.endpoint(), "connecting to Home Assistant");

        client
            .connect(ct)
            .await
            .context(HomeAssistantSnafu { operation: "connect" })?;

        if let Err(err) = client.wait_authenticated(ct).await {
            client.close().await;
            return Err(err).context(HomeAssistantSnafu {
                operation: "authentication",
            });
        }

        info!("authenticated with Home Assistant");
        Ok(client)
    }
}
