//! Entry point for one dispatched activity: validate, map, authenticate, upload.

use crate::activity::{NormalizedActivity, UploadResult};
use crate::error::{SyncError, SyncResult};
use crate::mapping::map_activity_type;
use crate::session::SessionManager;
use crate::upload::UploadAdapter;
use chrono::{DateTime, Local, TimeZone, Utc};
use garmin_connect_client::utils::parse_start_time;
use serde::Deserialize;
use serde_json::Value;

/// Flat record as delivered by the dispatch layer.
///
/// Numeric fields are kept as raw JSON values because form-encoding
/// dispatchers send them as strings.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TriggerPayload {
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<Value>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub calories: Option<Value>,
}

impl TriggerPayload {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::Validation(format!("payload is not a JSON object: {e}")))
    }

    /// Validate against the local time zone and the current clock.
    pub fn validate(&self) -> SyncResult<NormalizedActivity> {
        self.validate_with(&Local, Utc::now())
    }

    /// Structural validation. Every problem found is reported, not just the first.
    pub fn validate_with<Tz: TimeZone>(
        &self,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> SyncResult<NormalizedActivity> {
        let mut problems = Vec::new();

        let name = match &self.activity_name {
            Some(name) => name.trim().to_string(),
            None => {
                problems.push("activity_name is required".to_string());
                String::new()
            }
        };

        let source_type = match self.activity_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            Some(_) => {
                problems.push("activity_type must not be empty".to_string());
                String::new()
            }
            None => {
                problems.push("activity_type is required".to_string());
                String::new()
            }
        };

        let duration_seconds = match &self.duration_seconds {
            None | Some(Value::Null) => {
                problems.push("duration_seconds is required".to_string());
                0
            }
            Some(value) => parse_duration(value).unwrap_or_else(|| {
                problems.push(format!(
                    "duration_seconds must be a non-negative integer, got {value}"
                ));
                0
            }),
        };

        let start_time = match self.start_time.as_deref().map(str::trim) {
            None | Some("") => now.with_timezone(tz).fixed_offset(),
            Some(raw) => parse_start_time(raw, tz).unwrap_or_else(|| {
                problems.push(format!("start_time '{raw}' is not an ISO-8601 timestamp"));
                now.fixed_offset()
            }),
        };

        if !problems.is_empty() {
            return Err(SyncError::Validation(problems.join("; ")));
        }

        Ok(NormalizedActivity {
            name,
            source_type,
            duration_seconds,
            start_time,
            calories: parse_calories(self.calories.as_ref()),
        })
    }
}

/// Whole seconds. Dispatchers often send `3600.0`, so floats without a
/// fractional part are accepted too.
fn parse_duration(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole_seconds)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_seconds))
        }
        _ => None,
    }
}

fn whole_seconds(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

/// Calories are advisory: anything missing, malformed or negative becomes 0.
fn parse_calories(value: Option<&Value>) -> f64 {
    let parsed = match value {
        None | Some(Value::Null) => return 0.0,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return 0.0,
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(c) if c.is_finite() && c >= 0.0 => c,
        _ => {
            tracing::warn!(calories = ?value, "unusable calories value, defaulting to 0");
            0.0
        }
    }
}

/// Drives one activity through mapping, authentication and upload.
pub struct Ingestor {
    adapter: UploadAdapter,
    sessions: SessionManager,
}

impl Ingestor {
    pub fn new(adapter: UploadAdapter, sessions: SessionManager) -> Self {
        Self { adapter, sessions }
    }

    pub async fn ingest(&mut self, payload: &TriggerPayload) -> SyncResult<UploadResult> {
        let activity = payload.validate().inspect_err(record_failure)?;
        self.run(&activity).await
    }

    /// Upload an already validated activity. The type is resolved before any
    /// remote contact.
    pub async fn run(&mut self, activity: &NormalizedActivity) -> SyncResult<UploadResult> {
        let result = self.drive(activity).await;
        if let Err(err) = &result {
            record_failure(err);
        }
        result
    }

    async fn drive(&mut self, activity: &NormalizedActivity) -> SyncResult<UploadResult> {
        let destination = map_activity_type(&activity.source_type)?;
        tracing::info!(
            source_type = %activity.source_type,
            %destination,
            "processing activity"
        );
        self.sessions.ensure_valid().await?;
        self.adapter.upload(activity, &mut self.sessions).await
    }
}

fn record_failure(err: &SyncError) {
    tracing::error!(category = err.category(), error = %err, "activity not uploaded");
    metrics::counter!(
        "garmin_sync_uploads_total",
        "outcome" => "failed",
        "category" => err.category()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Fault, FakeGarmin, fast_retry, test_credentials};
    use crate::upload::UploadOptions;
    use chrono::FixedOffset;
    use serde_json::json;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn payload(value: Value) -> TriggerPayload {
        serde_json::from_value(value).expect("payload")
    }

    fn ingestor(fake: &Arc<FakeGarmin>) -> Ingestor {
        let adapter =
            UploadAdapter::new(fake.clone(), UploadOptions::default()).with_retry_policy(fast_retry());
        let sessions = SessionManager::new(fake.clone(), Some(test_credentials()))
            .with_retry_policy(fast_retry());
        Ingestor::new(adapter, sessions)
    }

    #[test]
    fn complete_payload_normalizes() {
        let p = payload(json!({
            "activity_name": "Test Workout",
            "activity_type": "WeightTraining",
            "duration_seconds": 3600,
            "start_time": "2024-01-01T10:00:00Z",
            "calories": 300
        }));
        let a = p.validate_with(&Utc, now()).expect("valid");
        assert_eq!(a.name, "Test Workout");
        assert_eq!(a.duration_seconds, 3600);
        assert_eq!(a.calories, 300.0);
        assert_eq!(a.start_time.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn string_numbers_are_accepted() {
        let p = payload(json!({
            "activity_name": "Legs",
            "activity_type": "Workout",
            "duration_seconds": "1800",
            "calories": "212.5"
        }));
        let a = p.validate_with(&Utc, now()).expect("valid");
        assert_eq!(a.duration_seconds, 1800);
        assert_eq!(a.calories, 212.5);
    }

    #[test]
    fn missing_start_time_defaults_to_now_in_local_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let p = payload(json!({
            "activity_name": "",
            "activity_type": "Yoga",
            "duration_seconds": 0
        }));
        let a = p.validate_with(&tz, now()).expect("valid");
        assert_eq!(a.start_time.to_rfc3339(), "2024-06-01T10:30:00+02:00");
        assert_eq!(a.duration_seconds, 0);
        assert_eq!(a.calories, 0.0);
    }

    #[test]
    fn naive_start_time_is_read_in_local_zone() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let p = payload(json!({
            "activity_name": "x",
            "activity_type": "Pilates",
            "duration_seconds": 60,
            "start_time": "2024-01-01T10:00:00"
        }));
        let a = p.validate_with(&tz, now()).expect("valid");
        assert_eq!(
            a.start_time.with_timezone(&Utc).to_rfc3339(),
            "2024-01-01T15:00:00+00:00"
        );
    }

    #[test]
    fn bad_calories_fall_back_to_zero() {
        for calories in [json!("lots"), json!(-50), json!(null), json!([1])] {
            let p = payload(json!({
                "activity_name": "x",
                "activity_type": "Yoga",
                "duration_seconds": 60,
                "calories": calories
            }));
            assert_eq!(p.validate_with(&Utc, now()).unwrap().calories, 0.0);
        }
    }

    #[test]
    fn structural_problems_are_all_reported() {
        let p = payload(json!({
            "activity_type": " ",
            "duration_seconds": -5,
            "start_time": "yesterday-ish"
        }));
        let err = p.validate_with(&Utc, now()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let msg = err.to_string();
        assert!(msg.contains("activity_name is required"), "{msg}");
        assert!(msg.contains("activity_type must not be empty"), "{msg}");
        assert!(msg.contains("duration_seconds must be a non-negative integer"), "{msg}");
        assert!(msg.contains("yesterday-ish"), "{msg}");
    }

    #[test]
    fn whole_number_floats_are_accepted_as_duration() {
        for duration in [json!(3600.0), json!("3600.0"), json!(" 3600 ")] {
            let p = payload(json!({
                "activity_name": "x",
                "activity_type": "Yoga",
                "duration_seconds": duration
            }));
            assert_eq!(p.validate_with(&Utc, now()).unwrap().duration_seconds, 3600);
        }
    }

    #[test]
    fn fractional_duration_is_rejected() {
        for duration in [json!(12.5), json!("12.5"), json!(-60.0), json!("90s"), json!(true)] {
            let p = payload(json!({
                "activity_name": "x",
                "activity_type": "Yoga",
                "duration_seconds": duration
            }));
            assert!(matches!(
                p.validate_with(&Utc, now()),
                Err(SyncError::Validation(_))
            ));
        }
    }

    #[test]
    fn non_object_json_is_a_validation_error() {
        assert!(matches!(
            TriggerPayload::from_json("42"),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            TriggerPayload::from_json("{not json"),
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_workout_scenario_uploads_strength_training() {
        let fake = Arc::new(FakeGarmin::new());
        let mut ingestor = ingestor(&fake);
        let p = payload(json!({
            "activity_name": "Test Workout",
            "activity_type": "WeightTraining",
            "duration_seconds": 3600,
            "start_time": "2024-01-01T10:00:00Z",
            "calories": 300
        }));

        let result = ingestor.ingest(&p).await.expect("upload");
        assert!(matches!(result, UploadResult::Success { .. }));

        let created = fake.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].activity_name, "Test Workout");
        assert_eq!(created[0].activity_type.type_key, "strength_training");
        assert_eq!(created[0].summary.duration, 3600.0);
        assert_eq!(created[0].summary.calories, 300.0);

        let again = ingestor.ingest(&p).await.expect("rerun");
        assert!(matches!(again, UploadResult::DuplicateSkipped { .. }));
        assert_eq!(fake.created().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_type_makes_zero_remote_calls() {
        let fake = Arc::new(FakeGarmin::new());
        let mut ingestor = ingestor(&fake);
        let p = payload(json!({
            "activity_name": "Waves",
            "activity_type": "Surfing",
            "duration_seconds": 3600
        }));
        let err = ingestor.ingest(&p).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(fake.calls().total(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_makes_zero_remote_calls() {
        let fake = Arc::new(FakeGarmin::new());
        let mut ingestor = ingestor(&fake);
        let p = payload(json!({ "activity_name": "x", "activity_type": "Yoga" }));
        let err = ingestor.ingest(&p).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(fake.calls().total(), 0);
    }

    #[tokio::test]
    async fn challenge_stops_the_run_before_upload() {
        let fake = Arc::new(FakeGarmin::new());
        fake.push_login_fault(Fault::Challenge);
        let mut ingestor = ingestor(&fake);
        let p = payload(json!({
            "activity_name": "x",
            "activity_type": "Crossfit",
            "duration_seconds": 600
        }));
        let err = ingestor.ingest(&p).await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("manual re-verification needed"));
        assert_eq!(fake.calls().login, 1);
        assert_eq!(fake.calls().create, 0);
    }
}
