//! Job queue trait for abstracting job persistence.
//!
//! This module provides the [`JobQueue`] trait that abstracts job storage,
//! enabling different backends (PostgreSQL, in-memory for tests) for the
//! harvest and worker services.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::SyncStats;
use crate::error::AppError;
use crate::job::{CreateJobRequest, JobStatus, SyncJob};

/// Trait for job persistence operations.
///
/// # Implementation Notes
///
/// Implementations should ensure:
/// - Atomic job claiming with `SELECT FOR UPDATE SKIP LOCKED` semantics
/// - Gather errors are returned in insertion order
/// - Safe concurrent access from multiple workers
pub trait JobQueue: Send + Sync + Clone {
    /// Queue a new job in `new` status.
    fn create_job(
        &self,
        request: CreateJobRequest,
    ) -> impl Future<Output = Result<SyncJob, AppError>> + Send;

    /// Claim the oldest `new` job for processing and move it to `running`.
    ///
    /// Returns `None` if no jobs are available.
    fn claim_job(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<SyncJob>, AppError>> + Send;

    /// Get a job by ID, including its gather errors.
    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<SyncJob>, AppError>> + Send;

    /// Record the start of the gather stage and move the job to `running`.
    fn mark_gather_started(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record the end of the gather stage.
    fn mark_gather_finished(
        &self,
        job_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append a gather-stage error to the job.
    fn save_gather_error(
        &self,
        job_id: Uuid,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Move the job to a terminal status with its final statistics.
    fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        stats: &SyncStats,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Finished jobs of `source_id` that ran a gather stage, newest
    /// `gather_started` first, excluding `exclude_job_id`.
    fn finished_jobs_for_source(
        &self,
        source_id: &str,
        exclude_job_id: Uuid,
    ) -> impl Future<Output = Result<Vec<SyncJob>, AppError>> + Send;

    /// List jobs with optional status filter, newest first.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SyncJob>, AppError>> + Send;

    /// Return all `running` jobs claimed by a worker to `new`.
    ///
    /// Used for graceful shutdown. Returns the number of jobs released.
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}
