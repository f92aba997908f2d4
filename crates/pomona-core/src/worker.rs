//! Worker service for processing harvest jobs from the queue.
//!
//! Jobs are queued in `new` status by an external scheduler. The worker loop:
//!
//! ```text
//! loop {
//!     1. Check for cancellation
//!     2. Claim the oldest new job (SELECT FOR UPDATE SKIP LOCKED)
//!     3. Run it with HarvestService::run_job
//!     4. If no jobs are available, sleep for poll_interval
//! }
//! ```
//!
//! Jobs are never retried. On shutdown the worker stops claiming, lets the
//! current job stop between records and releases anything it still holds.
//!
//! # Example
//!
//! ```ignore
//! use pomona_core::worker::{TracingWorkerReporter, WorkerService};
//! use pomona_core::progress::TracingReporter;
//! use tokio_util::sync::CancellationToken;
//!
//! let worker = WorkerService::new(job_queue, harvest_service, WorkerConfig::default());
//! worker.run(CancellationToken::new(), &TracingWorkerReporter, &TracingReporter).await?;
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::SyncStats;
use crate::error::AppError;
use crate::harvest::HarvestService;
use crate::job::{JobStatus, SyncJob, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::progress::ProgressReporter;
use crate::traits::{ContentFetcher, LocalCatalog, RecordStore};

// =============================================================================
// Worker Events
// =============================================================================

/// Events emitted by the worker during operation.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started { worker_id: &'a str },
    Polling,
    JobClaimed { job: &'a SyncJob },
    /// The job reached a terminal status.
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        stats: &'a SyncStats,
    },
    /// The job could not be run at all (store failure).
    JobFailed { job_id: Uuid, error: &'a str },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped { worker_id: &'a str },
}

// =============================================================================
// Worker Reporter Trait
// =============================================================================

/// Trait for reporting worker events.
///
/// Similar to [`ProgressReporter`] but for worker-level events.
pub trait WorkerReporter: Send + Sync {
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Silent worker reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentWorkerReporter;

impl WorkerReporter for SilentWorkerReporter {}

/// Tracing-based worker reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                info!(worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs...");
            }
            WorkerEvent::JobClaimed { job } => {
                info!(job_id = %job.id, source = %job.source.url, "Job claimed");
            }
            WorkerEvent::JobFinished {
                job_id,
                status,
                stats,
            } => {
                info!(
                    %job_id,
                    status = status.as_str(),
                    created = stats.created,
                    updated = stats.updated,
                    not_modified = stats.not_modified,
                    failed = stats.failed,
                    "Job finished"
                );
            }
            WorkerEvent::JobFailed { job_id, error } => {
                error!(%job_id, %error, "Job failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                info!(worker_id, jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                info!(worker_id, "Worker stopped");
            }
        }
    }
}

// =============================================================================
// Worker Service
// =============================================================================

/// Polls the queue and runs claimed jobs with a [`HarvestService`].
pub struct WorkerService<Q, R, C, F>
where
    Q: JobQueue,
    R: RecordStore,
    C: LocalCatalog,
    F: ContentFetcher,
{
    queue: Q,
    harvest_service: HarvestService<Q, R, C, F>,
    config: WorkerConfig,
}

impl<Q, R, C, F> WorkerService<Q, R, C, F>
where
    Q: JobQueue,
    R: RecordStore,
    C: LocalCatalog,
    F: ContentFetcher,
{
    pub fn new(queue: Q, harvest_service: HarvestService<Q, R, C, F>, config: WorkerConfig) -> Self {
        Self {
            queue,
            harvest_service,
            config,
        }
    }

    /// Runs the worker until `cancel_token` fires.
    pub async fn run<WR, HR>(
        &self,
        cancel_token: CancellationToken,
        worker_reporter: &WR,
        harvest_reporter: &HR,
    ) -> Result<(), AppError>
    where
        WR: WorkerReporter,
        HR: ProgressReporter,
    {
        worker_reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            worker_reporter.report(WorkerEvent::Polling);

            match self.queue.claim_job(&self.config.worker_id).await {
                Ok(Some(job)) => {
                    worker_reporter.report(WorkerEvent::JobClaimed { job: &job });
                    self.process_job(&job, &cancel_token, worker_reporter, harvest_reporter)
                        .await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        _ = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        let released = match self.queue.release_worker_jobs(&self.config.worker_id).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Failed to release claimed jobs");
                0
            }
        };

        worker_reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        worker_reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    async fn process_job<WR, HR>(
        &self,
        job: &SyncJob,
        cancel_token: &CancellationToken,
        worker_reporter: &WR,
        harvest_reporter: &HR,
    ) where
        WR: WorkerReporter,
        HR: ProgressReporter,
    {
        let result = self
            .harvest_service
            .run_job(job, harvest_reporter, cancel_token.child_token())
            .await;

        match result {
            Ok(result) => {
                worker_reporter.report(WorkerEvent::JobFinished {
                    job_id: job.id,
                    status: result.status,
                    stats: &result.stats,
                });
            }
            Err(e) => {
                let message = e.to_string();
                worker_reporter.report(WorkerEvent::JobFailed {
                    job_id: job.id,
                    error: &message,
                });
                if let Err(e) = self
                    .queue
                    .finish_job(job.id, JobStatus::Errored, &SyncStats::default())
                    .await
                {
                    error!(job_id = %job.id, error = %e, "Failed to mark job as errored");
                }
            }
        }
    }

    /// Runs one queued job by id, outside the polling loop.
    pub async fn process_single_job<WR, HR>(
        &self,
        job_id: Uuid,
        cancel_token: CancellationToken,
        worker_reporter: &WR,
        harvest_reporter: &HR,
    ) -> Result<(), AppError>
    where
        WR: WorkerReporter,
        HR: ProgressReporter,
    {
        let job = self
            .queue
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::Generic(format!("Job not found: {}", job_id)))?;

        self.process_job(&job, &cancel_token, worker_reporter, harvest_reporter)
            .await;

        Ok(())
    }
}
