use std::fmt;

use thiserror::Error;
use url::Url;

pub const HOSTNAME_KEY: &str = "amp::hostname";
pub const USERNAME_KEY: &str = "amp::username";
pub const PASSWORD_KEY: &str = "encrypted::amp::password";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("missing setting {0}")]
    Missing(&'static str),
    #[error("AMP Panel URL is not a valid http(s) URL: {0}")]
    InvalidHostname(String),
    #[error("AMP Panel URL must not end with a slash \"/\".")]
    TrailingSlash,
}

/// Read-only key/value view over the host platform's settings store.
pub trait Settings: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Administrator credentials for one AMP panel.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    hostname: String,
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let hostname = hostname.into().trim().to_string();
        let username = username.into().trim().to_string();
        let password = password.into();

        if hostname.is_empty() {
            return Err(CredentialsError::Missing(HOSTNAME_KEY));
        }
        if hostname.ends_with('/') {
            return Err(CredentialsError::TrailingSlash);
        }
        match Url::parse(&hostname) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => return Err(CredentialsError::InvalidHostname(hostname)),
        }
        if username.is_empty() {
            return Err(CredentialsError::Missing(USERNAME_KEY));
        }
        if password.is_empty() {
            return Err(CredentialsError::Missing(PASSWORD_KEY));
        }

        Ok(Self {
            hostname,
            username,
            password,
        })
    }

    pub fn from_settings(settings: &dyn Settings) -> Result<Self, CredentialsError> {
        let hostname = settings
            .get(HOSTNAME_KEY)
            .ok_or(CredentialsError::Missing(HOSTNAME_KEY))?;
        let username = settings
            .get(USERNAME_KEY)
            .ok_or(CredentialsError::Missing(USERNAME_KEY))?;
        let password = settings
            .get(PASSWORD_KEY)
            .ok_or(CredentialsError::Missing(PASSWORD_KEY))?;
        Self::new(hostname, username, password)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Identifies this credential set in a shared [`crate::SessionStore`].
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }

    pub(crate) fn api_url(&self, endpoint: &str) -> String {
        format!("{}/API{}", self.hostname, endpoint)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
