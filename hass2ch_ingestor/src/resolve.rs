//! Maps `state_changed` events to rows and their destination table.
use chrono::{DateTime, SecondsFormat, Utc};
use hass2ch_hass_client::{Event, EventMessage, State};
use serde::Serialize;
use serde_json::Value;
use snafu::{Snafu, ensure};

use crate::schema::{
    column_type, extract_domain, is_boolean_domain, is_skipped_value, is_valid_identifier,
    normalize_boolean,
};

/// Why an event could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ResolveError {
    #[snafu(display("unsupported event type: {event_type}"))]
    UnsupportedEventType { event_type: String },
    #[snafu(display("event.data.{field} is missing"))]
    MissingField { field: &'static str },
    #[snafu(display("skipping event with unknown state: {state:?}"))]
    SkippedState { state: String },
    #[snafu(display("invalid table name {table}"))]
    InvalidTable { table: String },
    #[snafu(display("conflicting destination {found}, batch writes to {expected}"))]
    ConflictingDestination { expected: String, found: String },
}

/// Where a row is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub database: String,
    pub table: String,
    /// Type of the `state` and `old_state` columns.
    pub column_type: &'static str,
}

impl Destination {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Row of a state change table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub entity_id: String,
    pub state: Value,
    pub old_state: Value,
    pub attributes: Value,
    pub context: Value,
    pub last_changed: String,
    pub last_updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<String>,
}

/// Partition key of an event: the domain of its new state.
pub fn partition_by_entity_domain(message: &EventMessage) -> Result<String, ResolveError> {
    match &message.event.data.new_state {
        Some(state) if !state.entity_id.is_empty() => Ok(extract_domain(state).to_string()),
        _ => MissingFieldSnafu {
            field: "new_state.entity_id",
        }
        .fail(),
    }
}

/// Resolves the destination and row of `event`, writing to `database`.
pub fn resolve_event(database: &str, event: &Event) -> Result<(Destination, StateChange), ResolveError> {
    ensure!(
        event.event_type.is_state_changed(),
        UnsupportedEventTypeSnafu {
            event_type: event.event_type.as_str()
        }
    );

    let data = &event.data;
    ensure!(
        !data.entity_id.is_empty(),
        MissingFieldSnafu { field: "entity_id" }
    );
    let Some(old_state) = &data.old_state else {
        return MissingFieldSnafu { field: "old_state" }.fail();
    };
    let Some(new_state) = &data.new_state else {
        return MissingFieldSnafu { field: "new_state" }.fail();
    };

    let domain = extract_domain(new_state);
    ensure!(
        is_valid_identifier(domain),
        InvalidTableSnafu { table: domain }
    );

    let row = state_change(domain, old_state, new_state)?;
    let destination = Destination {
        database: database.to_string(),
        table: domain.to_string(),
        column_type: column_type(domain),
    };

    Ok((destination, row))
}

fn state_change(domain: &str, old_state: &State, new_state: &State) -> Result<StateChange, ResolveError> {
    ensure!(
        !is_skipped_value(&new_state.state),
        SkippedStateSnafu {
            state: new_state.state.as_str()
        }
    );

    // An unknown previous state is kept as empty, an unknown new state drops the row.
    let old_value = if is_skipped_value(&old_state.state) {
        ""
    } else {
        old_state.state.as_str()
    };

    let (state, old_state_value) = if is_boolean_domain(domain) {
        (
            Value::Bool(normalize_boolean(&new_state.state)),
            Value::Bool(normalize_boolean(&old_state.state)),
        )
    } else {
        (
            Value::String(new_state.state.clone()),
            Value::String(old_value.to_string()),
        )
    };

    Ok(StateChange {
        entity_id: new_state.entity_id.clone(),
        state,
        old_state: old_state_value,
        attributes: new_state.attributes.clone(),
        context: new_state.context.clone(),
        last_changed: format_timestamp(&new_state.last_changed),
        last_updated: format_timestamp(&new_state.last_updated),
        last_reported: new_state.last_reported.as_ref().map(format_timestamp),
    })
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
