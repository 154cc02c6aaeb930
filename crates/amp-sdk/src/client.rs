use std::{sync::Arc, time::Duration};

use reqwest::{header, Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::ApiError;
use crate::session::{SessionCache, SessionStore, DEFAULT_SESSION_TTL};

pub const SESSION_FIELD: &str = "SESSIONID";

/// POST-only client for the AMP panel API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    credentials: Arc<Credentials>,
    sessions: SessionCache,
    request_timeout: Option<Duration>,
}

pub struct ApiClientBuilder {
    credentials: Credentials,
    store: Option<SessionStore>,
    session_ttl: Duration,
    request_timeout: Option<Duration>,
    http: Option<Client>,
}

impl ApiClientBuilder {
    /// Use an explicit session store instead of [`SessionStore::global`].
    pub fn session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ApiClient {
        let http = self.http.unwrap_or_default();
        let credentials = Arc::new(self.credentials);
        let store = self
            .store
            .unwrap_or_else(|| SessionStore::global().clone());
        let sessions = SessionCache::new(Arc::clone(&credentials), &store, http.clone())
            .with_ttl(self.session_ttl)
            .with_request_timeout(self.request_timeout);
        ApiClient {
            http,
            credentials,
            sessions,
            request_timeout: self.request_timeout,
        }
    }
}

impl ApiClient {
    pub fn builder(credentials: Credentials) -> ApiClientBuilder {
        ApiClientBuilder {
            credentials,
            store: None,
            session_ttl: DEFAULT_SESSION_TTL,
            request_timeout: None,
            http: None,
        }
    }

    pub fn new(credentials: Credentials) -> Self {
        Self::builder(credentials).build()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Forget the cached session, e.g. before retrying after a permission error.
    pub async fn reauthenticate(&self) {
        self.sessions.invalidate().await;
    }

    /// Issue one authenticated POST to `/API{endpoint}` and return the JSON body.
    pub async fn call(
        &self,
        endpoint: &str,
        mut payload: Map<String, Value>,
    ) -> Result<Value, ApiError> {
        let token = self.sessions.token().await?;
        payload.insert(SESSION_FIELD.to_string(), Value::String(token));

        let url = self.credentials.api_url(endpoint);
        let mut request = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&payload);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|err| {
            let err = err.without_url();
            let err = ApiError::Connectivity(err.to_string());
            warn!(endpoint, kind = err.kind(), error = %err, "amp request failed");
            err
        })?;

        let status = response.status();
        debug!(endpoint, %status, "amp response");
        if !status.is_success() {
            let err = classify_status(status);
            warn!(endpoint, %status, kind = err.kind(), "amp request rejected");
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ApiError::Connectivity(err.without_url().to_string()))?;
        parse_body(&body).map_err(|err| {
            warn!(endpoint, kind = err.kind(), error = %err, "amp response unreadable");
            err
        })
    }
}

fn classify_status(status: StatusCode) -> ApiError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ApiError::Permission { status }
    } else if status.is_server_error() {
        ApiError::RemoteServer { status }
    } else {
        ApiError::Connectivity(format!("unexpected status {status}"))
    }
}

fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::Connectivity(format!("malformed response body: {err}")))
}
