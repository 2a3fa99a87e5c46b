use chrono::{DateTime, FixedOffset};
use std::fmt;

/// One activity, validated and ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedActivity {
    /// May be empty; the upload record falls back to the destination type name.
    pub name: String,
    pub source_type: String,
    pub duration_seconds: u64,
    pub start_time: DateTime<FixedOffset>,
    pub calories: f64,
}

/// Non-failing outcome of an upload. Failures travel as [`SyncError`](crate::SyncError).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadResult {
    Success { activity_id: String },
    DuplicateSkipped { existing_id: Option<String> },
}

impl UploadResult {
    pub fn outcome(&self) -> &'static str {
        match self {
            UploadResult::Success { .. } => "success",
            UploadResult::DuplicateSkipped { .. } => "duplicate_skipped",
        }
    }
}

impl fmt::Display for UploadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadResult::Success { activity_id } => {
                write!(f, "SUCCESS: activity uploaded (id {activity_id})")
            }
            UploadResult::DuplicateSkipped {
                existing_id: Some(id),
            } => write!(f, "DUPLICATE_SKIPPED: matching activity {id} already exists"),
            UploadResult::DuplicateSkipped { existing_id: None } => {
                f.write_str("DUPLICATE_SKIPPED: matching activity already exists")
            }
        }
    }
}
