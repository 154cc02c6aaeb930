use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::credentials::Credentials;

/// AMP drops idle sessions after a few minutes; stay well inside that window.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(240);

const LOGIN_ENDPOINT: &str = "/Core/Login";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("[AMP] Failed to retrieve session ID (login returned {status}). Ensure the API details and hostname are valid.")]
    Rejected { status: reqwest::StatusCode },
    #[error("[AMP] Failed to retrieve session ID. Ensure the API details and hostname are valid.")]
    MissingSessionId,
    #[error("[AMP] Failed to reach login endpoint: {0}")]
    Transport(String),
}

#[derive(Clone)]
pub struct Session {
    token: String,
    acquired_at: Instant,
}

impl Session {
    fn new(token: String) -> Self {
        Self {
            token,
            acquired_at: Instant::now(),
        }
    }

    fn valid(&self, ttl: Duration) -> bool {
        self.acquired_at.elapsed() < ttl
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

type Slot = Arc<RwLock<Option<Session>>>;

static GLOBAL_STORE: Lazy<SessionStore> = Lazy::new(SessionStore::new);

/// Session slots shared across clients, one per credential set.
#[derive(Clone, Default)]
pub struct SessionStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide store used when no explicit store is supplied.
    pub fn global() -> &'static SessionStore {
        &GLOBAL_STORE
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    token: &'a str,
    remember_me: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
}

/// Lazily acquires and reuses the AMP session token for one credential set.
///
/// Concurrent callers that find no valid token queue on the slot's write lock,
/// so at most one login is in flight per cache key.
#[derive(Clone)]
pub struct SessionCache {
    credentials: Arc<Credentials>,
    cache_key: String,
    slot: Slot,
    ttl: Duration,
    request_timeout: Option<Duration>,
    http: Client,
}

impl SessionCache {
    pub fn new(credentials: Arc<Credentials>, store: &SessionStore, http: Client) -> Self {
        let cache_key = credentials.cache_key();
        let slot = store.slot(&cache_key);
        Self {
            credentials,
            cache_key,
            slot,
            ttl: DEFAULT_SESSION_TTL,
            request_timeout: None,
            http,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Bound each login request; a login that times out is `AuthError::Transport`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub async fn token(&self) -> Result<String, AuthError> {
        {
            let slot = self.slot.read().await;
            if let Some(session) = slot.as_ref() {
                if session.valid(self.ttl) {
                    return Ok(session.token.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another caller may have logged in while we waited for the lock.
        if let Some(session) = slot.as_ref() {
            if session.valid(self.ttl) {
                return Ok(session.token.clone());
            }
        }

        let session = self.login().await?;
        let token = session.token.clone();
        *slot = Some(session);
        Ok(token)
    }

    /// Drop the cached session so the next call re-authenticates.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        if slot.take().is_some() {
            debug!(cache_key = %self.cache_key, "amp session invalidated");
        }
    }

    async fn login(&self) -> Result<Session, AuthError> {
        let url = self.credentials.api_url(LOGIN_ENDPOINT);
        debug!(cache_key = %self.cache_key, "requesting new amp session");

        let mut request = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest {
                username: self.credentials.username(),
                password: self.credentials.password(),
                token: "",
                remember_me: false,
            });
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|err| {
                let err = err.without_url();
                warn!(cache_key = %self.cache_key, error = %err, "amp login transport failure");
                AuthError::Transport(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(cache_key = %self.cache_key, %status, "amp login rejected");
            return Err(AuthError::Rejected { status });
        }

        let body: LoginResponse = response.json().await.map_err(|err| {
            warn!(cache_key = %self.cache_key, error = %err.without_url(), "amp login body unreadable");
            AuthError::MissingSessionId
        })?;

        match body.session_id {
            Some(token) if !token.trim().is_empty() => Ok(Session::new(token)),
            _ => {
                warn!(cache_key = %self.cache_key, "amp login response missing sessionID");
                Err(AuthError::MissingSessionId)
            }
        }
    }
}
