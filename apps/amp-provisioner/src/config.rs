use std::fmt;
use std::time::Duration;

use amp_sdk::{
    credentials::{HOSTNAME_KEY, PASSWORD_KEY, USERNAME_KEY},
    Credentials, CredentialsError,
};
use serde::Deserialize;

use crate::memory::StaticSettings;

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub amp_hostname: Option<String>,
    #[serde(default)]
    pub amp_username: Option<String>,
    #[serde(default)]
    pub amp_password: Option<String>,
    #[serde(default = "default_session_ttl_secs")]
    pub amp_session_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub amp_request_timeout_secs: u64,
}

impl AppConfig {
    /// Fails on any malformed variable; nothing falls back to defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map(AppConfig::normalize)
    }

    fn normalize(mut self) -> Self {
        self.amp_hostname = Self::normalize_opt(self.amp_hostname.take());
        self.amp_username = Self::normalize_opt(self.amp_username.take());
        self.amp_password = Self::normalize_opt(self.amp_password.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    /// Settings as the platform's settings store would expose them.
    pub fn settings(&self) -> StaticSettings {
        let mut settings = StaticSettings::new();
        if let Some(hostname) = &self.amp_hostname {
            settings = settings.with(HOSTNAME_KEY, hostname.clone());
        }
        if let Some(username) = &self.amp_username {
            settings = settings.with(USERNAME_KEY, username.clone());
        }
        if let Some(password) = &self.amp_password {
            settings = settings.with(PASSWORD_KEY, password.clone());
        }
        settings
    }

    pub fn credentials(&self) -> Result<Credentials, CredentialsError> {
        Credentials::from_settings(&self.settings())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.amp_session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.amp_request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_filter: default_log_filter(),
            amp_hostname: None,
            amp_username: None,
            amp_password: None,
            amp_session_ttl_secs: default_session_ttl_secs(),
            amp_request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("log_filter", &self.log_filter)
            .field("amp_hostname", &self.amp_hostname)
            .field("amp_username", &self.amp_username)
            .field("amp_password", &self.amp_password.as_ref().map(|_| "<redacted>"))
            .field("amp_session_ttl_secs", &self.amp_session_ttl_secs)
            .field("amp_request_timeout_secs", &self.amp_request_timeout_secs)
            .finish()
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_filter() -> String {
    "info,amp_provisioner=debug,amp_sdk=debug".to_string()
}

fn default_session_ttl_secs() -> u64 {
    240
}

fn default_request_timeout_secs() -> u64 {
    30
}
