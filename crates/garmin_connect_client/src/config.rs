use crate::{Credentials, GarminError};
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://connectapi.garmin.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct Config {
    pub email: Option<String>,
    pub password: Option<SecretString>,
    /// Previously issued session token, tried before a credential login.
    pub session_token: Option<SecretString>,
    pub base_url: String,
    /// Upper bound for every HTTP call, connect included.
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, GarminError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function. This avoids mutating global environment in tests and keeps
    /// `from_env()` small and safe.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, GarminError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let email = get("GARMIN_EMAIL");
        let password = get("GARMIN_PASSWORD");
        // Missing credentials are not a configuration error: the session
        // owner reports them as an authentication failure when a login is needed.
        let session_token = get("GARMIN_SESSION");

        let base_url = get("GARMIN_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let timeout_secs = match get("GARMIN_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                GarminError::Config(format!(
                    "GARMIN_HTTP_TIMEOUT_SECS must be a positive integer, got '{raw}'"
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            email,
            password: password.map(|p| SecretString::new(p.into())),
            session_token: session_token.map(|t| SecretString::new(t.into())),
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Login credentials, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) => Some(Credentials::new(email.clone(), password.clone())),
            _ => None,
        }
    }
}
