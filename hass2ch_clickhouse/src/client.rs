use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use snafu::{ResultExt, ensure};
use tracing::{debug, trace};

use crate::{
    error::{
        ClientBuildSnafu, InvalidUrlSnafu, RequestSnafu, ResponseSnafu, Result,
        UnsupportedSchemeSnafu,
    },
    executor::StatementExecutor,
};

/// Settings sent with every statement.
///
/// Booleans, numbers and arrays are accepted as strings so that rows can
/// carry state values verbatim.
const QUERY_SETTINGS: &[(&str, &str)] = &[
    ("async_insert", "1"),
    ("date_time_input_format", "best_effort"),
    ("enable_json_type", "1"),
    ("input_format_skip_unknown_fields", "1"),
    ("input_format_json_read_bools_as_strings", "1"),
    ("input_format_json_read_numbers_as_strings", "1"),
    ("input_format_json_read_arrays_as_strings", "1"),
];

const USER_AGENT: &str = "hass2ch";

/// Bodies longer than this are cut in error messages.
const MAX_ERROR_MESSAGE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClickHouseOptions {
    /// HTTP interface, e.g. `http://localhost:8123`.
    pub url: String,
    pub username: String,
    pub password: Option<String>,
    /// Timeout of a whole request, connect included.
    pub timeout: Duration,
}

impl Default for ClickHouseOptions {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            username: "default".to_string(),
            password: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl ClickHouseOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseClient {
    client: reqwest::Client,
    url: Url,
    username: String,
    password: Option<String>,
}

impl ClickHouseClient {
    pub fn new(options: ClickHouseOptions) -> Result<Self> {
        let url = Url::parse(&options.url).map_err(|err| {
            InvalidUrlSnafu {
                url: options.url.clone(),
                message: err.to_string(),
            }
            .build()
        })?;

        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu {
                scheme: url.scheme()
            }
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .build()
            .context(ClientBuildSnafu {})?;

        Ok(Self {
            client,
            url,
            username: options.username,
            password: options.password,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Runs `query`, sending `body` as the statement's input data.
    pub async fn execute(&self, query: &str, body: Option<Bytes>) -> Result<()> {
        let start = Instant::now();
        let body_len = body.as_ref().map(Bytes::len).unwrap_or_default();

        trace!(query, body_len, "executing statement");

        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.username, self.password.as_deref())
            .query(QUERY_SETTINGS)
            .query(&[("query", query)])
            .body(body.unwrap_or_default())
            .send()
            .await
            .context(RequestSnafu {})?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response
                .text()
                .await
                .unwrap_or_else(|err| format!("<failed to read response body: {err}>"));

            return ResponseSnafu {
                status: status.as_u16(),
                message: truncate(message.trim(), MAX_ERROR_MESSAGE),
            }
            .fail();
        }

        debug!(
            query = summary(query),
            body_len,
            elapsed = ?start.elapsed(),
            "statement executed"
        );

        Ok(())
    }
}

#[async_trait]
impl StatementExecutor for ClickHouseClient {
    async fn execute(&self, query: &str, body: Option<Bytes>) -> Result<()> {
        ClickHouseClient::execute(self, query, body).await
    }
}

/// First line of a statement, for logs.
fn summary(query: &str) -> &str {
    query.lines().next().unwrap_or_default().trim()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
