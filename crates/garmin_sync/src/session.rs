//! Ownership of the destination-platform session for one invocation.

use crate::error::{AuthFailure, SyncError, SyncResult};
use chrono::{Duration, Utc};
use garmin_connect_client::retry::{RetryError, RetryPolicy};
use garmin_connect_client::{Credentials, GarminClient, GarminError, Session};
use std::sync::Arc;

/// Sessions this close to their known expiry are refreshed up front.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Acquires, caches and refreshes the session. Nothing outside this type can
/// replace the cached session; callers only borrow it.
pub struct SessionManager {
    client: Arc<dyn GarminClient>,
    credentials: Option<Credentials>,
    session: Option<Session>,
    retry: RetryPolicy,
}

impl SessionManager {
    pub fn new(client: Arc<dyn GarminClient>, credentials: Option<Credentials>) -> Self {
        Self {
            client,
            credentials,
            session: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Seed the cache with a session issued earlier (e.g. from `GARMIN_SESSION`).
    /// It is probed before first use.
    pub fn with_cached_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Drop the cached session; the next [`ensure_valid`](Self::ensure_valid) logs in again.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("cached session discarded");
        }
    }

    /// Log in with the configured credentials, replacing any cached session.
    ///
    /// Transient failures are retried with backoff; rejected credentials and
    /// verification challenges fail at once.
    pub async fn authenticate(&mut self) -> SyncResult<&Session> {
        self.login().await?;
        self.current()
    }

    /// Return a session that the remote accepted just now, re-authenticating
    /// when the cached one is missing, expired or rejected by the probe.
    pub async fn ensure_valid(&mut self) -> SyncResult<&Session> {
        if !self.cached_session_usable().await? {
            self.session = None;
            self.login().await?;
        }
        self.current()
    }

    async fn cached_session_usable(&self) -> SyncResult<bool> {
        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };
        if session.is_expired_at(Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS)) {
            tracing::info!("cached session expired, re-authenticating");
            return Ok(false);
        }

        let client = &self.client;
        let probe = self
            .retry
            .retry_async(
                |_| client.validate_session(session),
                GarminError::is_transient,
            )
            .await;
        match probe {
            Ok(()) => Ok(true),
            Err(err) if err_is_session_invalid(&err) => {
                tracing::info!("session rejected by remote, re-authenticating");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn login(&mut self) -> SyncResult<()> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(SyncError::AuthenticationFailed {
                kind: AuthFailure::BadCredentials,
                detail: "no usable session and GARMIN_EMAIL/GARMIN_PASSWORD not configured"
                    .into(),
            });
        };

        let client = &self.client;
        let session = self
            .retry
            .retry_async(|_| client.login(credentials), GarminError::is_transient)
            .await
            .map_err(|err| {
                let err = SyncError::from(err);
                tracing::error!(category = err.category(), error = %err, "login failed");
                err
            })?;
        tracing::info!("authenticated with Garmin Connect");
        metrics::counter!("garmin_sync_logins_total").increment(1);
        self.session = Some(session);
        Ok(())
    }

    fn current(&self) -> SyncResult<&Session> {
        self.session
            .as_ref()
            .ok_or(SyncError::Remote(GarminError::SessionExpired))
    }
}

fn err_is_session_invalid(err: &RetryError<GarminError>) -> bool {
    match err {
        RetryError::Aborted { error, .. } => error.is_session_invalid(),
        RetryError::Exhausted { .. } => false,
    }
}
