//! Builds destination records and submits them with duplicate suppression.
//!
//! Duplicate suppression is a best-effort query, not a lock: two invocations
//! racing on the same activity can both see "no duplicate" and both create.

use crate::activity::{NormalizedActivity, UploadResult};
use crate::error::{SyncError, SyncResult};
use crate::mapping::{DestinationType, map_activity_type};
use crate::session::SessionManager;
use chrono::{DateTime, Duration, Utc};
use garmin_connect_client::retry::RetryPolicy;
use garmin_connect_client::utils::format_remote_timestamp;
use garmin_connect_client::{
    AccessControlRule, ActivityQuery, ActivitySummary, ActivityTypeRef, CreatedActivity,
    GarminClient, GarminError, ManualActivity, ManualMetadata, ManualSummary, TimeZoneUnit,
};
use std::sync::Arc;

pub const DEFAULT_DESCRIPTION: &str = "Synced from Fitbod via Strava";

#[derive(Clone, Debug)]
pub struct UploadOptions {
    pub skip_duplicate_check: bool,
    /// Activities starting within this distance of ours count as duplicates.
    pub duplicate_window: Duration,
    pub description: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            skip_duplicate_check: false,
            duplicate_window: Duration::minutes(5),
            description: Some(DEFAULT_DESCRIPTION.to_string()),
        }
    }
}

pub struct UploadAdapter {
    client: Arc<dyn GarminClient>,
    retry: RetryPolicy,
    options: UploadOptions,
}

impl UploadAdapter {
    pub fn new(client: Arc<dyn GarminClient>, options: UploadOptions) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            options,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub async fn upload(
        &self,
        activity: &NormalizedActivity,
        sessions: &mut SessionManager,
    ) -> SyncResult<UploadResult> {
        let destination = map_activity_type(&activity.source_type)?;
        let record = build_record(activity, destination, self.options.description.as_deref());
        tracing::info!(
            name = %record.activity_name,
            destination = %destination,
            type_id = destination.type_id(),
            duration_seconds = activity.duration_seconds,
            start_time = %activity.start_time.to_rfc3339(),
            calories = activity.calories,
            "prepared activity"
        );

        if self.options.skip_duplicate_check {
            tracing::info!("duplicate check skipped on request");
        } else if let Some(existing) = self.find_duplicate(activity, destination, sessions).await? {
            tracing::info!(
                existing_id = existing.activity_id.as_deref().unwrap_or("unknown"),
                existing_name = existing.activity_name.as_deref().unwrap_or(""),
                existing_start = existing.start_time_gmt.as_deref().unwrap_or(""),
                "duplicate detected, skipping upload"
            );
            metrics::counter!("garmin_sync_uploads_total", "outcome" => "duplicate_skipped")
                .increment(1);
            return Ok(UploadResult::DuplicateSkipped {
                existing_id: existing.activity_id,
            });
        }

        let mut attempt = 0u32;
        let created = loop {
            attempt += 1;
            let session = sessions.ensure_valid().await?;
            match self.client.create_activity(session, &record).await {
                Ok(created) => break created,
                Err(err) => {
                    // A create whose reply was lost may already exist remotely;
                    // look for it before posting again or giving up.
                    let recheck = !self.options.skip_duplicate_check && err.may_have_committed();
                    let next = self.backoff_or_fail(err, attempt, sessions, "create activity");
                    if let Ok(delay) = &next {
                        tokio::time::sleep(*delay).await;
                    }
                    if recheck {
                        let found = self.find_duplicate(activity, destination, sessions).await?;
                        if let Some(existing) = found {
                            tracing::warn!(
                                existing_id = existing.activity_id.as_deref().unwrap_or("unknown"),
                                attempts = attempt,
                                "create reply was lost but the activity exists remotely"
                            );
                            break CreatedActivity {
                                activity_id: existing.activity_id,
                            };
                        }
                    }
                    next?;
                }
            }
        };

        let activity_id = created.activity_id.unwrap_or_else(|| "unknown".to_string());
        tracing::info!(%activity_id, attempts = attempt, "activity uploaded");
        metrics::counter!("garmin_sync_uploads_total", "outcome" => "success").increment(1);
        Ok(UploadResult::Success { activity_id })
    }

    /// Look for a remote activity of the same type starting within the window.
    pub async fn find_duplicate(
        &self,
        activity: &NormalizedActivity,
        destination: DestinationType,
        sessions: &mut SessionManager,
    ) -> SyncResult<Option<ActivitySummary>> {
        let start = activity.start_time.with_timezone(&Utc);
        let window = self.options.duplicate_window;
        // The remote filters by the account's calendar, which may be a day
        // either side of UTC. Rows are matched on exact times below.
        let query = ActivityQuery {
            start_date: (start - window - Duration::days(1)).date_naive(),
            end_date: (start + window + Duration::days(1)).date_naive(),
            type_key: Some(destination.type_key().to_string()),
        };
        tracing::debug!(?query, "checking for duplicates");

        let mut attempt = 0u32;
        let rows = loop {
            attempt += 1;
            let session = sessions.ensure_valid().await?;
            match self.client.list_activities(session, &query).await {
                Ok(rows) => break rows,
                Err(err) => {
                    let delay = self.backoff_or_fail(err, attempt, sessions, "list activities")?;
                    tokio::time::sleep(delay).await;
                }
            }
        };

        Ok(rows
            .into_iter()
            .find(|row| is_duplicate(row, start, destination, window)))
    }

    /// Decide whether a failed remote call gets another attempt and how long
    /// to wait first. A rejected session is dropped so the next attempt logs in.
    fn backoff_or_fail(
        &self,
        err: GarminError,
        attempt: u32,
        sessions: &mut SessionManager,
        operation: &'static str,
    ) -> SyncResult<std::time::Duration> {
        let retryable = err.is_transient() || err.is_session_invalid();
        if err.is_session_invalid() {
            sessions.invalidate();
        }
        if !retryable {
            tracing::error!(operation, error = %err, "remote call failed");
            return Err(SyncError::from_remote(err, attempt));
        }
        if attempt >= self.retry.max_attempts.max(1) {
            tracing::error!(operation, attempts = attempt, error = %err, "giving up");
            return Err(SyncError::from_remote(err, attempt));
        }
        let delay = self.retry.delay_for(attempt);
        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "remote call failed, retrying"
        );
        metrics::counter!("garmin_sync_retries_total", "operation" => operation).increment(1);
        Ok(delay)
    }
}

fn is_duplicate(
    row: &ActivitySummary,
    start: DateTime<Utc>,
    destination: DestinationType,
    window: Duration,
) -> bool {
    // Rows without a type were already filtered by type on the remote side.
    let type_matches = row
        .type_key()
        .is_none_or(|key| key == destination.type_key());
    let Some(existing_start) = row.start_time_utc() else {
        return false;
    };
    type_matches && (existing_start - start).num_seconds().abs() <= window.num_seconds()
}

/// Build the remote record. Times are sent in UTC.
pub fn build_record(
    activity: &NormalizedActivity,
    destination: DestinationType,
    description: Option<&str>,
) -> ManualActivity {
    let name = match activity.name.trim() {
        "" => destination.display_name().to_string(),
        name => name.to_string(),
    };
    let start = format_remote_timestamp(activity.start_time.with_timezone(&Utc));
    ManualActivity {
        activity_name: name,
        activity_type: ActivityTypeRef {
            type_key: destination.type_key().to_string(),
            type_id: Some(destination.type_id()),
        },
        access_control: AccessControlRule::private(),
        time_zone: TimeZoneUnit {
            unit_key: "UTC".to_string(),
        },
        summary: ManualSummary {
            start_time_local: start.clone(),
            start_time_gmt: start,
            duration: activity.duration_seconds as f64,
            calories: activity.calories,
        },
        metadata: ManualMetadata {
            auto_calc_calories: false,
        },
        description: description.map(str::to_string),
    }
}
