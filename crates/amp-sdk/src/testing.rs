//! In-process stand-in for an AMP panel, for tests that exercise real HTTP.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::credentials::Credentials;

/// One request the stub received, minus the login calls.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub body: Value,
}

#[derive(Default)]
struct StubState {
    logins: AtomicUsize,
    login_delay: Mutex<Duration>,
    response_delay: Mutex<Duration>,
    login_response: Mutex<Option<(StatusCode, Value)>>,
    session_ids: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, (StatusCode, Value)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Clone)]
pub struct StubPanel {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubPanel {
    /// Bind to an ephemeral port and serve until the runtime shuts down.
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let router = Router::new()
            .route("/API/*endpoint", post(handle))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub panel");
        let addr = listener.local_addr().expect("stub panel addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Self { addr, state }
    }

    pub fn hostname(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.hostname(), "admin", "admin-password").expect("stub credentials")
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    /// Session ids handed out by successive logins; the last one repeats.
    pub fn set_session_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.state.session_ids.lock().unwrap() = ids.into_iter().map(Into::into).collect();
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.state.login_delay.lock().unwrap() = delay;
    }

    /// Delay every non-login reply, e.g. to trip client timeouts.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.state.response_delay.lock().unwrap() = delay;
    }

    /// Override the login reply entirely.
    pub fn set_login_response(&self, status: StatusCode, body: Value) {
        *self.state.login_response.lock().unwrap() = Some((status, body));
    }

    /// Reply to `endpoint` (e.g. `/ADSModule/DeployTemplate`) with a fixed status and body.
    pub fn respond(&self, endpoint: &str, status: StatusCode, body: Value) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(endpoint.trim_start_matches('/').to_string(), (status, body));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }
}

async fn handle(
    State(state): State<Arc<StubState>>,
    Path(endpoint): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if endpoint == "Core/Login" {
        let delay = *state.login_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let count = state.logins.fetch_add(1, Ordering::SeqCst);
        if let Some((status, body)) = state.login_response.lock().unwrap().clone() {
            return (status, Json(body));
        }
        let ids = state.session_ids.lock().unwrap();
        let session_id = ids
            .get(count)
            .or_else(|| ids.last())
            .cloned()
            .unwrap_or_else(|| format!("session-{}", count + 1));
        return (
            StatusCode::OK,
            Json(json!({ "success": true, "sessionID": session_id })),
        );
    }

    let delay = *state.response_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    state.calls.lock().unwrap().push(RecordedCall {
        endpoint: format!("/{endpoint}"),
        body,
    });
    state
        .responses
        .lock()
        .unwrap()
        .get(&endpoint)
        .cloned()
        .map(|(status, body)| (status, Json(body)))
        .unwrap_or((StatusCode::OK, Json(json!({ "Status": true }))))
}
