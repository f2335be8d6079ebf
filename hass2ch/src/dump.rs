use clap::Args;
use hass2ch_hass_client::{EventType, HassClient, HassClientError};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::{HomeAssistantSnafu, JsonEncodeSnafu, Result},
    hass_args::HassArgs,
};

#[derive(Debug, Args)]
pub struct DumpArgs {
    #[clap(flatten)]
    hass: HassArgs,
    /// Only print events of this type, e.g. `state_changed`
    #[arg(long)]
    event_type: Option<String>,
}

impl DumpArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let client = self.hass.connect(&ct).await?;

        let result = self.dump(&client, &ct).await;
        client.close().await;
        result
    }

    async fn dump(
        &self,
        client: &HassClient,
        ct: &CancellationToken,
    ) -> Result<()> {
        let event_type = self.event_type.clone().map(EventType::new);
        let mut subscription = match client.subscribe_events(ct, event_type).await {
            Ok(subscription) => subscription,
            Err(HassClientError::Cancelled) => return Ok(()),
            Err(err) => {
                return Err(err).context(HomeAssistantSnafu {
                    operation: "subscribe_events",
                });
            }
        };

        loop {
            let event = tokio::select! {
                _ = ct.cancelled() => break,
                event = subscription.recv() => event,
            };

            let Some(event) = event else {
                info!("subscription closed");
                break;
            };

            let json = serde_json::to_string_pretty(&event).context(JsonEncodeSnafu {})?;
            println!("{json}");
        }

        Ok(())
    }
}
