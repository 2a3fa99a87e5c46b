//! HTTP client implementation for the Garmin Connect API.
//!
//! This module provides a reqwest-based implementation of the [`GarminClient`](crate::GarminClient) trait.
//! The API is unofficial: replies are checked for HTML login pages and
//! challenge markers as well as status codes before they are trusted.

use crate::config::Config;
use crate::{
    ActivityQuery, ActivitySummary, CreatedActivity, Credentials, GarminClient, GarminError,
    ManualActivity, Session,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::LazyLock;

const LIST_PAGE_LIMIT: u32 = 100;
const BODY_SNIPPET_CHARS: usize = 256;

static CHALLENGE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(mfa|2fa|captcha|verification code|two[- ]factor|multi[- ]factor)\b")
        .expect("challenge regex is valid")
});

static EXPIRED_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(session|token) (has )?expired\b").expect("expiry regex is valid")
});

/// Client for the Garmin Connect API using reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestGarminClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestGarminClient {
    /// Create a new client instance.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "https://connectapi.garmin.com")
    /// * `timeout` - Bound applied to every request, connect phase included
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self, GarminError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("garmin-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GarminError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, GarminError> {
        Self::new(&config.base_url, config.timeout)
    }

    /// Build an authenticated GET request.
    fn get_request(&self, url: &str, session: &Session) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(session.token().expose_secret())
    }

    /// Build an authenticated POST request.
    fn post_request(&self, url: &str, session: &Session) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .bearer_auth(session.token().expose_secret())
    }

    /// Execute a request and return the body of a successful reply.
    async fn execute_text(&self, request: reqwest::RequestBuilder) -> Result<String, GarminError> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        if is_html(&resp) {
            // The API answers stale sessions with a redirect to the SSO page.
            return Err(GarminError::SessionExpired);
        }
        Ok(resp.text().await?)
    }

    /// Execute a request and expect a JSON response.
    async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GarminError> {
        let text = self.execute_text(request).await?;
        decode_body(&text)
    }

    /// Extract error information from a failed response.
    async fn error_from_response(&self, resp: reqwest::Response) -> GarminError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body_snippet = snippet(&body);

        if EXPIRED_MARKERS.is_match(&body) {
            return GarminError::SessionExpired;
        }
        match status {
            401 | 403 => GarminError::Unauthorized(body_snippet),
            _ => GarminError::from_status(status, body_snippet),
        }
    }
}

fn is_html(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"))
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

fn decode_body<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, GarminError> {
    serde_json::from_str::<T>(text)
        .map_err(|e| GarminError::Decode(format!("{} - body: {}", e, snippet(text))))
}

#[derive(serde::Deserialize)]
struct LoginPayload {
    access_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    mfa_required: bool,
}

#[async_trait]
impl GarminClient for ReqwestGarminClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, GarminError> {
        let url = format!("{}/sso/login", self.base_url);
        let mut body = serde_json::json!({
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
        });
        if let Some(code) = &credentials.mfa_code {
            body["mfa_code"] = serde_json::Value::String(code.clone());
        }

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let challenged = CHALLENGE_MARKERS.is_match(&text);

        match status {
            200..=299 => {
                let payload = serde_json::from_str::<LoginPayload>(&text).ok();
                match payload {
                    Some(LoginPayload {
                        access_token: Some(token),
                        expires_in,
                        mfa_required: false,
                    }) => {
                        let expires_at = expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
                        tracing::debug!(?expires_at, "login succeeded");
                        Ok(Session::new(SecretString::new(token.into()), expires_at))
                    }
                    Some(LoginPayload {
                        mfa_required: true, ..
                    }) => Err(GarminError::ChallengeRequired(snippet(&text))),
                    _ if challenged => Err(GarminError::ChallengeRequired(snippet(&text))),
                    _ => Err(GarminError::Decode(format!(
                        "login reply carried no access token - body: {}",
                        snippet(&text)
                    ))),
                }
            }
            401 | 403 if challenged => Err(GarminError::ChallengeRequired(snippet(&text))),
            401 | 403 => Err(GarminError::InvalidCredentials(snippet(&text))),
            _ => Err(GarminError::from_status(status, snippet(&text))),
        }
    }

    async fn validate_session(&self, session: &Session) -> Result<(), GarminError> {
        let url = format!("{}/userprofile-service/socialProfile", self.base_url);
        self.execute_text(self.get_request(&url, session)).await?;
        Ok(())
    }

    async fn list_activities(
        &self,
        session: &Session,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivitySummary>, GarminError> {
        let url = format!(
            "{}/activitylist-service/activities/search/activities",
            self.base_url
        );
        let mut pairs: Vec<(&str, String)> = vec![
            ("startDate", query.start_date.to_string()),
            ("endDate", query.end_date.to_string()),
            ("start", "0".to_string()),
            ("limit", LIST_PAGE_LIMIT.to_string()),
        ];
        if let Some(type_key) = &query.type_key {
            pairs.push(("activityType", type_key.clone()));
        }
        let qp: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.execute_json(self.get_request(&url, session).query(&qp))
            .await
    }

    async fn create_activity(
        &self,
        session: &Session,
        activity: &ManualActivity,
    ) -> Result<CreatedActivity, GarminError> {
        let url = format!("{}/activity-service/activity", self.base_url);
        let text = self
            .execute_text(self.post_request(&url, session).json(activity))
            .await?;
        if text.trim().is_empty() {
            return Ok(CreatedActivity { activity_id: None });
        }
        decode_body(&text)
    }
}
