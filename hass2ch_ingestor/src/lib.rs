//! Moves Home Assistant state changes into ClickHouse.
//!
//! The [`Pipeline`] subscribes to `state_changed` events, batches them per
//! entity domain and writes every batch to the table of its domain, creating
//! the database and tables on demand.
pub mod error;
mod metrics;
mod pipeline;
pub mod resolve;
pub mod schema;
mod source;

pub use self::error::{PipelineError, Result};
pub use self::pipeline::{Pipeline, PipelineOptions};
pub use self::resolve::{
    Destination, ResolveError, StateChange, partition_by_entity_domain, resolve_event,
};
pub use self::source::{EventSource, EventStream};
