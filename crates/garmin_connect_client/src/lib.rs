//! Narrow `GarminClient` capability trait over the unofficial Garmin Connect API
//! and a reqwest-based implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod config;
pub mod http_client;
pub mod retry;
pub mod utils;

#[derive(Debug, Error)]
pub enum GarminError {
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("session expired")]
    SessionExpired,
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("verification challenge required: {0}")]
    ChallengeRequired(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// How a remote failure should be handled by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Credentials rejected or human interaction required. Never retried.
    FatalAuth,
    Fatal,
}

impl From<reqwest::Error> for GarminError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GarminError::Timeout(err.to_string())
        } else if err.is_decode() {
            GarminError::Decode(err.to_string())
        } else {
            GarminError::Http(err)
        }
    }
}

impl GarminError {
    /// Map a non-success status code that carries no more specific meaning.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => GarminError::Unauthorized(body),
            429 => GarminError::RateLimited(body),
            500..=599 => GarminError::Server { status, body },
            _ => GarminError::Api { status, body },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GarminError::Http(e) if e.is_builder() => ErrorClass::Fatal,
            GarminError::Http(_)
            | GarminError::Timeout(_)
            | GarminError::RateLimited(_)
            | GarminError::Server { .. } => ErrorClass::Transient,
            GarminError::InvalidCredentials(_) | GarminError::ChallengeRequired(_) => {
                ErrorClass::FatalAuth
            }
            // An unauthorized reply on an authenticated call means the session
            // is stale; the session owner decides whether to re-login.
            GarminError::Unauthorized(_) | GarminError::SessionExpired => ErrorClass::FatalAuth,
            GarminError::Api { .. } | GarminError::Decode(_) | GarminError::Config(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True when a write may have been applied remotely even though no
    /// success reply arrived (the reply timed out, the connection dropped
    /// after sending, or the server failed after accepting the request).
    pub fn may_have_committed(&self) -> bool {
        match self {
            GarminError::Http(e) => !e.is_connect() && !e.is_builder(),
            GarminError::Timeout(_) | GarminError::Server { .. } => true,
            _ => false,
        }
    }

    /// True when the remote signalled that the presented session is no longer valid.
    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self,
            GarminError::Unauthorized(_) | GarminError::SessionExpired
        )
    }
}

/// Account credentials used for a full login.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// One-time code answering a 2FA challenge, for interactive token generation.
    pub mfa_code: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            mfa_code: None,
        }
    }

    pub fn with_mfa_code(mut self, code: impl Into<String>) -> Self {
        self.mfa_code = Some(code.into());
        self
    }
}

/// An authenticated bearer token with an optional known expiry.
#[derive(Clone, Debug)]
pub struct Session {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(token: SecretString, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the locally known expiry has passed at `at`. Sessions without a
    /// known expiry are never considered expired here; only the remote can tell.
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= at)
    }

    /// Parse an externally supplied session token.
    ///
    /// Accepts plain JSON (`{"access_token": .., "expires_at": ..}`), the same
    /// JSON wrapped in base64, an array of token objects of which one carries
    /// an `access_token` (optionally nested under `oauth2_token`), or a bare
    /// bearer token string.
    pub fn from_token_string(raw: &str) -> Result<Self, GarminError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GarminError::Config("empty session token".into()));
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            return Self::from_token_json(&value);
        }
        if let Some(value) = utils::decode_base64_json(raw) {
            return Self::from_token_json(&value);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(GarminError::Config(
                "session token is neither JSON nor a bearer token".into(),
            ));
        }
        Ok(Self::new(SecretString::new(raw.into()), None))
    }

    fn from_token_json(value: &serde_json::Value) -> Result<Self, GarminError> {
        let candidates: Vec<&serde_json::Value> = match value {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for candidate in candidates {
            let token_obj = candidate.get("oauth2_token").unwrap_or(candidate);
            let Some(token) = token_obj.get("access_token").and_then(|v| v.as_str()) else {
                continue;
            };
            let expires_at = token_obj
                .get("expires_at")
                .and_then(utils::timestamp_from_json);
            return Ok(Self::new(SecretString::new(token.into()), expires_at));
        }
        Err(GarminError::Config(
            "session token JSON has no access_token".into(),
        ))
    }

    /// Serialize into the JSON form accepted by [`Session::from_token_string`].
    pub fn to_token_string(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "access_token".into(),
            serde_json::Value::String(self.token.expose_secret().to_string()),
        );
        if let Some(exp) = self.expires_at {
            obj.insert("expires_at".into(), serde_json::Value::from(exp.timestamp()));
        }
        serde_json::Value::Object(obj).to_string()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTypeRef {
    pub type_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<u32>,
}

/// One row of the remote activity list.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default, rename = "startTimeGMT")]
    pub start_time_gmt: Option<String>,
    #[serde(default)]
    pub start_time_local: Option<String>,
    #[serde(default)]
    pub activity_type: Option<ActivityTypeRef>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
}

impl ActivitySummary {
    /// Start time in UTC. Falls back to the local start time, read as UTC,
    /// when the row has no GMT timestamp.
    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        self.start_time_gmt
            .as_deref()
            .and_then(utils::parse_remote_timestamp)
            .or_else(|| {
                self.start_time_local
                    .as_deref()
                    .and_then(utils::parse_remote_timestamp)
            })
    }

    pub fn type_key(&self) -> Option<&str> {
        self.activity_type.as_ref().map(|t| t.type_key.as_str())
    }
}

/// Query for the remote activity list. Dates are inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub type_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlRule {
    pub type_id: u32,
    pub type_key: String,
}

impl AccessControlRule {
    pub fn private() -> Self {
        Self {
            type_id: 2,
            type_key: "private".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeZoneUnit {
    pub unit_key: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualSummary {
    pub start_time_local: String,
    #[serde(rename = "startTimeGMT")]
    pub start_time_gmt: String,
    /// Elapsed duration in seconds.
    pub duration: f64,
    pub calories: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualMetadata {
    pub auto_calc_calories: bool,
}

/// Payload for creating a manual activity.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ManualActivity {
    #[serde(rename = "activityName")]
    pub activity_name: String,
    #[serde(rename = "activityTypeDTO")]
    pub activity_type: ActivityTypeRef,
    #[serde(rename = "accessControlRuleDTO")]
    pub access_control: AccessControlRule,
    #[serde(rename = "timeZoneUnitDTO")]
    pub time_zone: TimeZoneUnit,
    #[serde(rename = "summaryDTO")]
    pub summary: ManualSummary,
    #[serde(rename = "metadataDTO")]
    pub metadata: ManualMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedActivity {
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub activity_id: Option<String>,
}

fn deserialize_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string().into()),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// The operations the sync core needs from the destination platform.
///
/// The remote API is unofficial, so implementations normalize whatever the
/// wire returns into [`GarminError`] and its [`ErrorClass`].
#[async_trait]
pub trait GarminClient: Send + Sync + 'static {
    /// Full credential login. A demanded CAPTCHA or 2FA prompt is reported as
    /// [`GarminError::ChallengeRequired`].
    async fn login(&self, credentials: &Credentials) -> Result<Session, GarminError>;

    /// Cheap authenticated probe; fails with [`GarminError::Unauthorized`] or
    /// [`GarminError::SessionExpired`] when the session is no longer accepted.
    async fn validate_session(&self, session: &Session) -> Result<(), GarminError>;

    async fn list_activities(
        &self,
        session: &Session,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivitySummary>, GarminError>;

    async fn create_activity(
        &self,
        session: &Session,
        activity: &ManualActivity,
    ) -> Result<CreatedActivity, GarminError>;
}
