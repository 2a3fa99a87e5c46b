//! In-memory `GarminClient` used by unit tests.
//!
//! Created activities are stored and served back by `list_activities`, so
//! duplicate detection runs against the same data the adapter wrote.
#![cfg(test)]

use async_trait::async_trait;
use garmin_connect_client::retry::RetryPolicy;
use garmin_connect_client::{
    ActivityQuery, ActivitySummary, ActivityTypeRef, CreatedActivity, Credentials, GarminClient,
    GarminError, ManualActivity, Session,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A scripted failure, consumed by the next call of the matching operation.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Timeout,
    /// The create is applied remotely but its reply times out.
    LostReply,
    ServerError,
    Unauthorized,
    Challenge,
    BadCredentials,
    BadRequest,
}

impl Fault {
    fn into_error(self) -> GarminError {
        match self {
            Fault::Timeout | Fault::LostReply => {
                GarminError::Timeout("operation timed out".into())
            }
            Fault::ServerError => GarminError::Server {
                status: 503,
                body: "unavailable".into(),
            },
            Fault::Unauthorized => GarminError::Unauthorized("401".into()),
            Fault::Challenge => GarminError::ChallengeRequired("MFA required".into()),
            Fault::BadCredentials => GarminError::InvalidCredentials("bad password".into()),
            Fault::BadRequest => GarminError::Api {
                status: 400,
                body: "bad request".into(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub login: u32,
    pub probe: u32,
    pub list: u32,
    pub create: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.login + self.probe + self.list + self.create
    }
}

#[derive(Default)]
struct State {
    calls: CallCounts,
    issued_tokens: u32,
    remote: Vec<ActivitySummary>,
    created: Vec<ManualActivity>,
    login_faults: VecDeque<Fault>,
    probe_faults: VecDeque<Fault>,
    list_faults: VecDeque<Fault>,
    create_faults: VecDeque<Fault>,
    tokens_seen: Vec<String>,
    queries: Vec<ActivityQuery>,
}

#[derive(Default)]
pub struct FakeGarmin {
    state: Mutex<State>,
}

impl FakeGarmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }

    pub fn created(&self) -> Vec<ManualActivity> {
        self.state.lock().unwrap().created.clone()
    }

    /// Tokens presented on list/create calls, in order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens_seen.clone()
    }

    /// Every list query received, in order.
    pub fn queries(&self) -> Vec<ActivityQuery> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn seed_remote(&self, row: ActivitySummary) {
        self.state.lock().unwrap().remote.push(row);
    }

    pub fn push_login_fault(&self, fault: Fault) {
        self.state.lock().unwrap().login_faults.push_back(fault);
    }

    pub fn push_probe_fault(&self, fault: Fault) {
        self.state.lock().unwrap().probe_faults.push_back(fault);
    }

    pub fn push_list_fault(&self, fault: Fault) {
        self.state.lock().unwrap().list_faults.push_back(fault);
    }

    pub fn push_create_fault(&self, fault: Fault) {
        self.state.lock().unwrap().create_faults.push_back(fault);
    }
}

pub fn test_credentials() -> Credentials {
    Credentials::new("athlete@example.com", SecretString::new("pw".into()))
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::immediate(3)
}

#[async_trait]
impl GarminClient for FakeGarmin {
    async fn login(&self, _credentials: &Credentials) -> Result<Session, GarminError> {
        let mut st = self.state.lock().unwrap();
        st.calls.login += 1;
        if let Some(fault) = st.login_faults.pop_front() {
            return Err(fault.into_error());
        }
        st.issued_tokens += 1;
        let token = format!("token-{}", st.issued_tokens);
        Ok(Session::new(SecretString::new(token.into()), None))
    }

    async fn validate_session(&self, _session: &Session) -> Result<(), GarminError> {
        let mut st = self.state.lock().unwrap();
        st.calls.probe += 1;
        match st.probe_faults.pop_front() {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    async fn list_activities(
        &self,
        session: &Session,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivitySummary>, GarminError> {
        let mut st = self.state.lock().unwrap();
        st.calls.list += 1;
        st.queries.push(query.clone());
        st.tokens_seen
            .push(session.token().expose_secret().to_string());
        if let Some(fault) = st.list_faults.pop_front() {
            return Err(fault.into_error());
        }
        let rows = st
            .remote
            .iter()
            .filter(|row| {
                let in_range = row.start_time_utc().is_some_and(|t| {
                    let d = t.date_naive();
                    d >= query.start_date && d <= query.end_date
                });
                let type_ok = match (&query.type_key, row.type_key()) {
                    (Some(wanted), Some(actual)) => wanted == actual,
                    _ => true,
                };
                in_range && type_ok
            })
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn create_activity(
        &self,
        session: &Session,
        activity: &ManualActivity,
    ) -> Result<CreatedActivity, GarminError> {
        let mut st = self.state.lock().unwrap();
        st.calls.create += 1;
        st.tokens_seen
            .push(session.token().expose_secret().to_string());
        let fault = st.create_faults.pop_front();
        if let Some(fault) = fault.filter(|f| !matches!(f, Fault::LostReply)) {
            return Err(fault.into_error());
        }
        let id = format!("{}", 1000 + st.created.len());
        st.created.push(activity.clone());
        st.remote.push(ActivitySummary {
            activity_id: Some(id.clone()),
            activity_name: Some(activity.activity_name.clone()),
            start_time_gmt: Some(activity.summary.start_time_gmt.clone()),
            start_time_local: Some(activity.summary.start_time_local.clone()),
            activity_type: Some(ActivityTypeRef {
                type_key: activity.activity_type.type_key.clone(),
                type_id: activity.activity_type.type_id,
            }),
            duration: Some(activity.summary.duration),
            calories: Some(activity.summary.calories),
        });
        match fault {
            Some(lost) => Err(lost.into_error()),
            None => Ok(CreatedActivity {
                activity_id: Some(id),
            }),
        }
    }
}

/// A remote row as the list endpoint would return it.
pub fn remote_row(id: &str, start_gmt: &str, type_key: Option<&str>) -> ActivitySummary {
    ActivitySummary {
        activity_id: Some(id.into()),
        activity_name: Some("existing".into()),
        start_time_gmt: Some(start_gmt.into()),
        start_time_local: None,
        activity_type: type_key.map(|k| ActivityTypeRef {
            type_key: k.into(),
            type_id: None,
        }),
        duration: Some(1800.0),
        calories: None,
    }
}

