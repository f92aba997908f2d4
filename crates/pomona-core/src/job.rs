//! Sync job types.
//!
//! A [`SyncJob`] is one run against one harvest source. Jobs are queued by an
//! external scheduler (or the CLI) in `new` status and flow through:
//!
//! ```text
//! new → running → finished
//!          ↓
//!       errored (gather stage recorded errors)
//!          ↓
//!       cancelled (worker shut down between records)
//! ```
//!
//! Jobs are never retried; the next scheduled job picks up whatever the
//! previous one left behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SyncStats;
use crate::models::HarvestSource;

// =============================================================================
// Job Status
// =============================================================================

/// Status of a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for a worker.
    New,
    /// Claimed by a worker.
    Running,
    /// All stages ran; individual records may still carry errors.
    Finished,
    /// The gather stage recorded at least one error.
    Errored,
    /// Stopped between records on shutdown.
    Cancelled,
}

impl JobStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Errored => "errored",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Errored | JobStatus::Cancelled
        )
    }
}

/// Error type for parsing JobStatus from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStatusError(String);

impl std::fmt::Display for ParseJobStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job status: {}", self.0)
    }
}

impl std::error::Error for ParseJobStatusError {}

impl std::str::FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobStatus::New),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "errored" => Ok(JobStatus::Errored),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(ParseJobStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Sync Job
// =============================================================================

/// An error recorded against a job during its gather stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherError {
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One synchronization run against one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique job identifier.
    pub id: Uuid,

    /// Source snapshot taken when the job was created.
    pub source: HarvestSource,

    /// Current job status.
    pub status: JobStatus,

    /// When the job was queued.
    pub created_at: DateTime<Utc>,

    /// When the gather stage started. Used as the reference point for the
    /// next job's incremental window.
    pub gather_started: Option<DateTime<Utc>>,

    /// When the gather stage finished.
    pub gather_finished: Option<DateTime<Utc>>,

    /// When the job reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,

    /// Gather-stage errors, oldest first.
    pub gather_errors: Vec<GatherError>,

    /// Final sync statistics (if finished).
    pub stats: Option<SyncStats>,

    /// ID of the worker processing this job.
    pub worker_id: Option<String>,
}

impl SyncJob {
    /// Returns true if the gather stage recorded no errors.
    pub fn gather_succeeded(&self) -> bool {
        self.gather_errors.is_empty()
    }
}

// =============================================================================
// Job Creation Request
// =============================================================================

/// Request to queue a new sync job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Source to synchronize from.
    pub source: HarvestSource,
}

impl CreateJobRequest {
    pub fn new(source: HarvestSource) -> Self {
        Self { source }
    }
}

// =============================================================================
// Worker Configuration
// =============================================================================

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier.
    pub worker_id: String,
    /// How often to poll for new jobs.
    pub poll_interval: std::time::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: std::time::Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Set the worker ID.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
