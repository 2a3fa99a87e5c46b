//! Run-level error taxonomy.

use garmin_connect_client::GarminError;
use garmin_connect_client::retry::RetryError;
use std::fmt;
use thiserror::Error;

/// Which of the two fatal authentication situations occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    BadCredentials,
    ChallengeRequired,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::BadCredentials => {
                f.write_str("bad credentials; check GARMIN_EMAIL and GARMIN_PASSWORD")
            }
            AuthFailure::ChallengeRequired => f.write_str(
                "manual re-verification needed; sign in to Garmin Connect in a browser and \
                 complete the prompt, or run `garmin-sync session-token --mfa-code <code>` \
                 and store the result as GARMIN_SESSION",
            ),
        }
    }
}

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported activity type '{source_type}' (supported: {supported})")]
    UnsupportedActivityType {
        source_type: String,
        supported: String,
    },

    #[error("Authentication failed, {kind}: {detail}")]
    AuthenticationFailed { kind: AuthFailure, detail: String },

    #[error("Remote platform still failing after {attempts} attempt(s): {source}")]
    TransientRemote {
        attempts: u32,
        #[source]
        source: GarminError,
    },

    #[error("Remote platform error: {0}")]
    Remote(#[source] GarminError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Process exit code for this failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Validation(_) => 2,
            SyncError::UnsupportedActivityType { .. } => 3,
            SyncError::AuthenticationFailed { .. } => 4,
            SyncError::TransientRemote { .. } => 5,
            SyncError::Remote(_) | SyncError::Config(_) => 1,
        }
    }

    /// Stable label used in logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation",
            SyncError::UnsupportedActivityType { .. } => "unsupported_activity_type",
            SyncError::AuthenticationFailed { .. } => "authentication_failed",
            SyncError::TransientRemote { .. } => "transient_remote",
            SyncError::Remote(_) => "remote",
            SyncError::Config(_) => "config",
        }
    }

    /// Normalize a single remote failure that will not be retried further.
    pub fn from_remote(err: GarminError, attempts: u32) -> Self {
        match err {
            GarminError::InvalidCredentials(detail) => SyncError::AuthenticationFailed {
                kind: AuthFailure::BadCredentials,
                detail,
            },
            GarminError::ChallengeRequired(detail) => SyncError::AuthenticationFailed {
                kind: AuthFailure::ChallengeRequired,
                detail,
            },
            GarminError::Config(msg) => SyncError::Config(msg),
            err if err.is_transient() => SyncError::TransientRemote {
                attempts,
                source: err,
            },
            err => SyncError::Remote(err),
        }
    }
}

impl From<GarminError> for SyncError {
    fn from(err: GarminError) -> Self {
        SyncError::from_remote(err, 1)
    }
}

impl From<RetryError<GarminError>> for SyncError {
    fn from(err: RetryError<GarminError>) -> Self {
        let attempts = err.attempts();
        SyncError::from_remote(err.into_inner(), attempts)
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
