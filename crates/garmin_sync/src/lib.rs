//! Forwards Fitbod strength workouts, relayed through Strava, into Garmin Connect.
//!
//! One invocation handles one activity: the [`ingest::Ingestor`] validates the
//! trigger payload, resolves the destination type, obtains a session through
//! the [`session::SessionManager`] and hands the activity to the
//! [`upload::UploadAdapter`].

pub mod activity;
pub mod cli;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod session;
pub mod upload;

#[cfg(test)]
mod test_utils;

pub use activity::{NormalizedActivity, UploadResult};
pub use error::{AuthFailure, SyncError, SyncResult};
pub use ingest::{Ingestor, TriggerPayload};
pub use mapping::{DestinationType, map_activity_type};
pub use session::SessionManager;
pub use upload::{UploadAdapter, UploadOptions};
