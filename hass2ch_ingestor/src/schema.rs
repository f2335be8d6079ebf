//! Entity domains, their column types and the table layout.
use hass2ch_hass_client::State;

pub const SWITCH: &str = "switch";
pub const LIGHT: &str = "light";
pub const SENSOR: &str = "sensor";
pub const BINARY_SENSOR: &str = "binary_sensor";
pub const INPUT_BOOLEAN: &str = "input_boolean";
pub const BOOLEAN_SENSOR: &str = "boolean_sensor";
pub const AUTOMATION: &str = "automation";
pub const SCENE: &str = "scene";
pub const SCRIPT: &str = "script";
pub const SUN: &str = "sun";
pub const DEVICE_TRACKER: &str = "device_tracker";
pub const PERSON: &str = "person";
pub const ZONE: &str = "zone";
pub const WEATHER: &str = "weather";
pub const CLIMATE: &str = "climate";
pub const NUMERIC_SENSOR: &str = "numeric_sensor";
pub const NUMBER: &str = "number";
pub const INPUT_NUMBER: &str = "input_number";
pub const COUNTER: &str = "counter";
pub const INPUT_DATETIME: &str = "input_datetime";
pub const TIMER: &str = "timer";
pub const IMAGE: &str = "image";

/// State values that carry no information.
pub const SKIPPED_VALUES: &[&str] = &["", "unknown", "unavailable"];

/// Domain of the entity a state belongs to.
///
/// Sensors are split further by their current value: boolean looking values
/// go to `binary_sensor`, numbers to `numeric_sensor`.
pub fn extract_domain(state: &State) -> &str {
    let domain = state
        .entity_id
        .split_once('.')
        .map_or(state.entity_id.as_str(), |(domain, _)| domain);

    if domain != SENSOR {
        return domain;
    }

    match state.state.as_str() {
        "on" | "true" | "off" | "false" => BINARY_SENSOR,
        value if value.parse::<f64>().is_ok() => NUMERIC_SENSOR,
        _ => domain,
    }
}

/// Whether the states of `domain` are stored as booleans.
pub fn is_boolean_domain(domain: &str) -> bool {
    matches!(
        domain,
        BINARY_SENSOR | SWITCH | INPUT_BOOLEAN | BOOLEAN_SENSOR
    )
}

pub fn is_skipped_value(value: &str) -> bool {
    SKIPPED_VALUES.contains(&value)
}

/// `on` and `true` are true, anything else is false.
pub fn normalize_boolean(value: &str) -> bool {
    matches!(value, "on" | "true")
}

/// ClickHouse type of the `state` and `old_state` columns of `domain`.
pub fn column_type(domain: &str) -> &'static str {
    match domain {
        BINARY_SENSOR | SWITCH | INPUT_BOOLEAN | BOOLEAN_SENSOR => "Bool",
        LIGHT | AUTOMATION | SCENE | SCRIPT | SUN | DEVICE_TRACKER | PERSON | ZONE | WEATHER
        | CLIMATE => "LowCardinality(String)",
        SENSOR => "String",
        NUMERIC_SENSOR => "Float64",
        NUMBER | INPUT_NUMBER => "Nullable(Float64)",
        COUNTER => "Int64",
        INPUT_DATETIME | TIMER | IMAGE => "DateTime",
        _ => "String",
    }
}

/// Whether `name` can be used as an unquoted database or table name.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn create_database_statement(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {database}")
}

pub fn create_table_statement(database: &str, table: &str, column_type: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table} (
    entity_id LowCardinality(String),
    state {column_type},
    old_state {column_type},
    attributes JSON,
    context JSON,
    last_changed DateTime64(3, 'UTC'),
    last_updated DateTime64(3, 'UTC'),
    last_reported DateTime64(3, 'UTC'),
    received_at DateTime64(3, 'UTC') DEFAULT now64(3)
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(last_updated)
ORDER BY (entity_id, last_updated)
SETTINGS index_granularity = 8192;"
    )
}

pub fn insert_statement(database: &str, table: &str) -> String {
    format!("INSERT INTO {database}.{table} FORMAT JSONEachRow")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value;

    use super::*;

    fn state(entity_id: &str, value: &str) -> State {
        State {
            entity_id: entity_id.to_string(),
            state: value.to_string(),
            attributes: Value::Null,
            context: Value::Null,
            last_changed: Utc::now(),
            last_updated: Utc::now(),
            last_reported: None,
        }
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain(&state("switch.kitchen", "on")), SWITCH);
        assert_eq!(extract_domain(&state("light.hall", "off")), LIGHT);
        assert_eq!(extract_domain(&state("sensor.temp", "21.5")), NUMERIC_SENSOR);
        assert_eq!(extract_domain(&state("sensor.temp", "-3")), NUMERIC_SENSOR);
        assert_eq!(extract_domain(&state("sensor.door", "on")), BINARY_SENSOR);
        assert_eq!(extract_domain(&state("sensor.flag", "false")), BINARY_SENSOR);
        assert_eq!(extract_domain(&state("sensor.weather", "sunny")), SENSOR);
        assert_eq!(extract_domain(&state("sensor.temp", "unavailable")), SENSOR);
        assert_eq!(extract_domain(&state("nodot", "1")), "nodot");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(column_type(SWITCH), "Bool");
        assert_eq!(column_type(BOOLEAN_SENSOR), "Bool");
        assert_eq!(column_type(CLIMATE), "LowCardinality(String)");
        assert_eq!(column_type(SENSOR), "String");
        assert_eq!(column_type(NUMERIC_SENSOR), "Float64");
        assert_eq!(column_type(INPUT_NUMBER), "Nullable(Float64)");
        assert_eq!(column_type(COUNTER), "Int64");
        assert_eq!(column_type(TIMER), "DateTime");
        assert_eq!(column_type("vacuum"), "String");
    }

    #[test]
    fn test_boolean_normalization() {
        assert!(normalize_boolean("on"));
        assert!(normalize_boolean("true"));
        assert!(!normalize_boolean("off"));
        assert!(!normalize_boolean(""));
        assert!(!normalize_boolean("ON"));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("hass"));
        assert!(is_valid_identifier("input_boolean"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier("a;DROP"));
    }

    #[test]
    fn test_statements() {
        assert_eq!(
            insert_statement("hass", "switch"),
            "INSERT INTO hass.switch FORMAT JSONEachRow"
        );

        let ddl = create_table_statement("hass", "numeric_sensor", "Float64");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS hass.numeric_sensor ("));
        assert!(ddl.contains("    state Float64,\n    old_state Float64,"));
        assert!(ddl.contains("ORDER BY (entity_id, last_updated)"));
    }
}
