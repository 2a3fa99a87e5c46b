//! Command-line surface of the `garmin-sync` binary.

use crate::activity::UploadResult;
use crate::error::{AuthFailure, SyncError, SyncResult};
use crate::ingest::{Ingestor, TriggerPayload};
use crate::session::SessionManager;
use crate::upload::{UploadAdapter, UploadOptions};
use clap::{Parser, Subcommand};
use garmin_connect_client::config::Config;
use garmin_connect_client::http_client::ReqwestGarminClient;
use garmin_connect_client::retry::RetryPolicy;
use garmin_connect_client::{GarminClient, Session};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "garmin-sync")]
#[command(version)]
#[command(about = "Forward Fitbod workouts shared via Strava into Garmin Connect")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload one activity described by flags
    Upload {
        /// Activity name
        #[arg(long)]
        name: String,

        /// Source activity type (e.g. WeightTraining)
        #[arg(long = "type")]
        activity_type: String,

        /// Duration in seconds
        #[arg(long)]
        duration: String,

        /// Start time, ISO-8601; naive values are local time (default: now)
        #[arg(long)]
        start_time: Option<String>,

        /// Calories burned
        #[arg(long)]
        calories: Option<String>,

        /// Upload even if a matching activity already exists
        #[arg(long)]
        skip_duplicate_check: bool,
    },

    /// Upload one activity from a JSON trigger payload
    Ingest {
        /// Path to the payload file, or `-` for stdin
        #[arg(long)]
        payload: String,

        /// Upload even if a matching activity already exists
        #[arg(long)]
        skip_duplicate_check: bool,
    },

    /// Log in and print a reusable token for GARMIN_SESSION
    SessionToken {
        /// Verification code for accounts with two-factor authentication
        #[arg(long)]
        mfa_code: Option<String>,
    },
}

/// What a successful command produced.
#[derive(Debug)]
pub enum Report {
    Upload(UploadResult),
    SessionToken(SecretString),
}

/// Log filter from `GARMIN_SYNC_LOG_LEVEL`, then `RUST_LOG`, then `info`.
pub fn log_filter_with<F>(mut get: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    get("GARMIN_SYNC_LOG_LEVEL")
        .or_else(|| get("RUST_LOG"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Load configuration through `get` and execute `command`, the way the
/// binary does at startup.
pub async fn run<F>(command: Commands, get: F) -> SyncResult<Report>
where
    F: FnMut(&str) -> Option<String>,
{
    let config = Config::from_env_with(get)?;
    App::from_config(config)?.execute(command).await
}

/// Wiring shared by all subcommands.
pub struct App {
    config: Config,
    client: Arc<dyn GarminClient>,
    retry: RetryPolicy,
}

impl App {
    pub fn from_config(config: Config) -> SyncResult<Self> {
        let client = ReqwestGarminClient::from_config(&config)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    pub fn with_client(config: Config, client: Arc<dyn GarminClient>) -> Self {
        Self {
            config,
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute(&self, command: Commands) -> SyncResult<Report> {
        match command {
            Commands::Upload {
                name,
                activity_type,
                duration,
                start_time,
                calories,
                skip_duplicate_check,
            } => {
                let payload = TriggerPayload {
                    activity_name: Some(name),
                    activity_type: Some(activity_type),
                    duration_seconds: Some(Value::String(duration)),
                    start_time,
                    calories: calories.map(Value::String),
                };
                self.ingest(&payload, skip_duplicate_check).await
            }
            Commands::Ingest {
                payload,
                skip_duplicate_check,
            } => {
                let raw = read_payload(&payload)?;
                let payload = TriggerPayload::from_json(&raw)?;
                self.ingest(&payload, skip_duplicate_check).await
            }
            Commands::SessionToken { mfa_code } => self.session_token(mfa_code).await,
        }
    }

    async fn ingest(
        &self,
        payload: &TriggerPayload,
        skip_duplicate_check: bool,
    ) -> SyncResult<Report> {
        let options = UploadOptions {
            skip_duplicate_check,
            ..UploadOptions::default()
        };
        let adapter =
            UploadAdapter::new(self.client.clone(), options).with_retry_policy(self.retry.clone());
        let mut ingestor = Ingestor::new(adapter, self.session_manager());
        ingestor.ingest(payload).await.map(Report::Upload)
    }

    async fn session_token(&self, mfa_code: Option<String>) -> SyncResult<Report> {
        let Some(mut credentials) = self.config.credentials() else {
            return Err(SyncError::AuthenticationFailed {
                kind: AuthFailure::BadCredentials,
                detail: "GARMIN_EMAIL and GARMIN_PASSWORD are required to issue a session token"
                    .into(),
            });
        };
        if let Some(code) = mfa_code {
            credentials = credentials.with_mfa_code(code);
        }
        let mut sessions = SessionManager::new(self.client.clone(), Some(credentials))
            .with_retry_policy(self.retry.clone());
        let session = sessions.authenticate().await?;
        Ok(Report::SessionToken(SecretString::new(
            session.to_token_string().into(),
        )))
    }

    fn session_manager(&self) -> SessionManager {
        let sessions = SessionManager::new(self.client.clone(), self.config.credentials())
            .with_retry_policy(self.retry.clone());
        match self.seed_session() {
            Some(session) => sessions.with_cached_session(session),
            None => sessions,
        }
    }

    fn seed_session(&self) -> Option<Session> {
        let raw = self.config.session_token.as_ref()?;
        match Session::from_token_string(raw.expose_secret()) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unusable GARMIN_SESSION");
                None
            }
        }
    }
}

/// Read the payload from a file, or from stdin when `source` is `-`.
pub fn read_payload(source: &str) -> SyncResult<String> {
    if source == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .map_err(|e| SyncError::Validation(format!("reading payload from stdin: {e}")))?;
        return Ok(raw);
    }
    std::fs::read_to_string(Path::new(source))
        .map_err(|e| SyncError::Validation(format!("reading payload file '{source}': {e}")))
}
