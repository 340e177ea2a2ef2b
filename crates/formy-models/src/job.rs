//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::{JobError, JobStatus};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declared job type did not match any known pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

/// Image edit mode; selects the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Re-pose the subject after a reference pose
    PoseChange,
    /// Replace the subject's head with a reference head
    HeadSwap,
    /// Replace everything behind the subject
    BackgroundReplace,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::PoseChange,
        JobType::HeadSwap,
        JobType::BackgroundReplace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PoseChange => "pose_change",
            JobType::HeadSwap => "head_swap",
            JobType::BackgroundReplace => "background_replace",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = UnknownJobType;

    /// Accepts `pose_change`, `POSE_CHANGE`, `pose-change` and the legacy
    /// `BACKGROUND_CHANGE` spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "pose_change" => Ok(JobType::PoseChange),
            "head_swap" => Ok(JobType::HeadSwap),
            "background_replace" | "background_change" => Ok(JobType::BackgroundReplace),
            _ => Err(UnknownJobType(s.to_string())),
        }
    }
}

/// Time-bounded claim a worker holds on a job while processing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Lease {
    /// Fresh token per claim; writes carrying an older token are rejected
    pub token: String,
    /// When the lease was granted
    pub claimed_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(claimed_at: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            claimed_at,
        }
    }

    /// Check whether the lease is older than `lease_duration` at `now`.
    pub fn is_expired(&self, lease_duration: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.claimed_at >= lease_duration
    }
}

/// Produced output of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    /// Result image location
    pub output_image: String,
    /// Thumbnail location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Before/after comparison image location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_image: Option<String>,
    /// Free-form metadata (dimensions, format, engine details)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl JobResult {
    pub fn new(output_image: impl Into<String>) -> Self {
        Self {
            output_image: output_image.into(),
            thumbnail: None,
            comparison_image: None,
            metadata: Map::new(),
        }
    }
}

/// Submission payload for a new job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewJob {
    /// Assigned by the submitting system
    pub id: JobId,
    /// Declared type as submitted; may be unknown to this worker
    pub job_type: String,
    /// Pipeline-specific inputs
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            parameters,
        }
    }

    /// Set an explicit job ID.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }
}

/// A unit of work and its durable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Declared job type (raw)
    pub job_type: String,

    /// Pipeline-specific inputs
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Current status
    pub status: JobStatus,

    /// Processing attempts made so far
    pub attempt_count: u32,

    /// Output, only when succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    /// Terminal failure, only when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Most recent retryable failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,

    /// Active lease, only while processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,

    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Current processing step description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job from a submission.
    pub fn from_new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new_job.id,
            job_type: new_job.job_type,
            parameters: new_job.parameters,
            status: JobStatus::Queued,
            attempt_count: 0,
            result: None,
            error: None,
            last_error: None,
            lease: None,
            progress: 0,
            current_step: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the declared type.
    pub fn parsed_type(&self) -> Result<JobType, UnknownJobType> {
        self.job_type.parse()
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check whether `token` is the job's current lease.
    pub fn holds_lease(&self, token: &str) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.token == token)
    }
}
