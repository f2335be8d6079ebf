use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use tokio::net::TcpListener;

/// A request as seen by the fake server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub body: Bytes,
}

impl Recorded {
    pub fn query(&self) -> &str {
        self.params.get("query").map(String::as_str).unwrap_or_default()
    }
}

#[derive(Default)]
struct FakeState {
    requests: Mutex<Vec<Recorded>>,
    /// Scripted responses, `200 OK` once exhausted.
    responses: Mutex<VecDeque<(StatusCode, String)>>,
}

/// Fake ClickHouse HTTP interface.
#[derive(Clone)]
pub struct FakeClickHouse {
    pub url: String,
    state: Arc<FakeState>,
}

impl FakeClickHouse {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let router = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn respond_with(&self, status: StatusCode, body: &str) {
        self.state
            .responses
            .lock()
            .expect("lock")
            .push_back((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().expect("lock").clone()
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    state.requests.lock().expect("lock").push(Recorded {
        params,
        authorization: header_value(header::AUTHORIZATION),
        user_agent: header_value(header::USER_AGENT),
        body,
    });

    state
        .responses
        .lock()
        .expect("lock")
        .pop_front()
        .unwrap_or((StatusCode::OK, String::new()))
}
