use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use hass2ch_hass_client::{EventMessage, EventType, HassClient, HassClientError};
use tokio_util::sync::CancellationToken;

pub type EventStream = BoxStream<'static, EventMessage>;

/// Source of Home Assistant events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribes to events of `event_type`, or to every event if `None`.
    async fn subscribe(
        &self,
        ct: &CancellationToken,
        event_type: Option<EventType>,
    ) -> Result<EventStream, HassClientError>;
}

#[async_trait]
impl EventSource for HassClient {
    async fn subscribe(
        &self,
        ct: &CancellationToken,
        event_type: Option<EventType>,
    ) -> Result<EventStream, HassClientError> {
        let subscription = self.subscribe_events(ct, event_type).await?;
        Ok(subscription.boxed())
    }
}
