use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Epoch values below this are read as seconds rather than milliseconds.
const SECONDS_EPOCH_CUTOFF: i64 = 100_000_000_000;

/// A construction/research job the server accepted and has not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveJob {
    pub action_id: String,
    pub job_id: String,
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
    pub duration_seconds: f64,
    /// Local backoff: no completion attempt before this instant.
    pub next_check_ms: Option<i64>,
    /// A completion request for this job is outstanding.
    pub in_flight: bool,
}

impl ActiveJob {
    pub fn new(action_id: &str, job_id: &str, start_epoch_ms: i64, duration_seconds: f64) -> Self {
        let duration_seconds = duration_seconds.max(0.0);
        Self {
            action_id: action_id.to_string(),
            job_id: job_id.to_string(),
            start_epoch_ms,
            end_epoch_ms: start_epoch_ms + seconds_to_ms(duration_seconds),
            duration_seconds,
            next_check_ms: None,
            in_flight: false,
        }
    }

    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.end_epoch_ms - now_ms).max(0)
    }

    pub fn progress(&self, now_ms: i64) -> f64 {
        let total = self.end_epoch_ms - self.start_epoch_ms;
        if total <= 0 {
            return 1.0;
        }
        ((now_ms - self.start_epoch_ms) as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// The end time has passed by more than the clock-skew grace window.
    pub fn is_due(&self, now_ms: i64, grace_ms: i64) -> bool {
        now_ms >= self.end_epoch_ms + grace_ms
    }

    pub fn ready_for_attempt(&self, now_ms: i64, grace_ms: i64) -> bool {
        self.is_due(now_ms, grace_ms)
            && !self.in_flight
            && self.next_check_ms.is_none_or(|next| now_ms >= next)
    }
}

pub type JobTable = BTreeMap<String, ActiveJob>;

/// Durable form of a job. Timestamps are optional because older clients
/// persisted only a duration; the in-flight flag is never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedJob {
    #[serde(alias = "actionId")]
    pub action_id: String,
    #[serde(alias = "jobId")]
    pub job_id: String,
    #[serde(alias = "startEpochMs")]
    pub start_epoch_ms: Option<i64>,
    #[serde(alias = "endEpochMs")]
    pub end_epoch_ms: Option<i64>,
    #[serde(alias = "durationSeconds", alias = "duration")]
    pub duration_seconds: Option<f64>,
    #[serde(alias = "nextCheckTs")]
    pub next_check_ms: Option<i64>,
}

impl From<&ActiveJob> for PersistedJob {
    fn from(job: &ActiveJob) -> Self {
        Self {
            action_id: job.action_id.clone(),
            job_id: job.job_id.clone(),
            start_epoch_ms: Some(job.start_epoch_ms),
            end_epoch_ms: Some(job.end_epoch_ms),
            duration_seconds: Some(job.duration_seconds),
            next_check_ms: job.next_check_ms,
        }
    }
}

pub type PersistedTable = BTreeMap<String, PersistedJob>;

pub fn to_persisted(table: &JobTable) -> PersistedTable {
    table
        .iter()
        .map(|(action_id, job)| (action_id.clone(), PersistedJob::from(job)))
        .collect()
}

/// An entry of the server's running-jobs list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunningJob {
    #[serde(alias = "action_id", alias = "action")]
    pub action_id: String,
    #[serde(alias = "job_id", deserialize_with = "id_string")]
    pub job_id: String,
    #[serde(alias = "startEpochMs", alias = "start_timestamp")]
    pub start_timestamp: Option<i64>,
    #[serde(alias = "endEpochMs", alias = "end_timestamp")]
    pub end_timestamp: Option<i64>,
    #[serde(alias = "duration", alias = "duration_seconds")]
    pub duration_seconds: Option<f64>,
}

impl From<&RunningJob> for PersistedJob {
    fn from(job: &RunningJob) -> Self {
        Self {
            action_id: job.action_id.clone(),
            job_id: job.job_id.clone(),
            start_epoch_ms: job.start_timestamp.map(normalize_epoch_ms),
            end_epoch_ms: job.end_timestamp.map(normalize_epoch_ms),
            duration_seconds: job.duration_seconds,
            next_check_ms: None,
        }
    }
}

/// Job ids arrive as strings from newer backends and as numbers from older ones.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

pub fn seconds_to_ms(seconds: f64) -> i64 {
    if seconds.is_finite() {
        (seconds * 1000.0).round() as i64
    } else {
        0
    }
}

/// Accepts epoch seconds or milliseconds and returns milliseconds.
pub fn normalize_epoch_ms(value: i64) -> i64 {
    if value > 0 && value < SECONDS_EPOCH_CUTOFF {
        value * 1000
    } else {
        value
    }
}
