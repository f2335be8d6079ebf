use hass2ch_observability::{Counter, Gauge};

use crate::client::ConnectionState;

pub struct ClientMetrics {
    pub reconnects: Counter<u64>,
    pub connection_state: Gauge<u64>,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        let meter = hass2ch_observability::meter("hass_client");
        Self {
            reconnects: meter
                .u64_counter("hass2ch.hass.reconnects")
                .with_unit("{attempt}")
                .with_description("number of reconnection attempts to Home Assistant")
                .build(),
            connection_state: meter
                .u64_gauge("hass2ch.hass.connection_state")
                .with_description(
                    "connection state (0 disconnected, 1 connecting, 2 awaiting auth, \
                     3 authenticated, 4 auth rejected, 5 reconnecting, 6 closed)",
                )
                .build(),
        }
    }
}

impl ClientMetrics {
    pub fn record_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_gauge_value(), &[]);
    }
}

impl ConnectionState {
    fn as_gauge_value(self) -> u64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::AwaitingAuth => 2,
            ConnectionState::Authenticated => 3,
            ConnectionState::AuthRejected => 4,
            ConnectionState::Reconnecting => 5,
            ConnectionState::Closed => 6,
        }
    }
}
