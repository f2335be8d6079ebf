//! Client for the Home Assistant websocket API.
//!
//! [`HassClient`] authenticates with a long-lived access token, correlates
//! commands with their results by request id and keeps event subscriptions
//! alive across reconnects.
mod client;
mod connection;
pub mod error;
pub mod message;
mod metrics;
pub mod options;
mod subscription;

pub use self::client::{ConnectionState, HassClient};
pub use self::error::{HassClientError, Result};
pub use self::message::{
    Command, Event, EventContext, EventData, EventMessage, EventType, ServerMessage, State,
};
pub use self::options::{HassClientOptions, ReconnectOptions};
pub use self::subscription::Subscription;
