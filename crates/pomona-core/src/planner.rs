//! Incremental sync planning.
//!
//! Decides how much of the remote catalog a job has to scan. A job only needs
//! the items modified since the last *error-free* job of the same source:
//!
//! 1. status `Finished`
//! 2. no gather errors
//! 3. every record either current or reported "not modified"
//!
//! The window starts one hour before that job's `gather_started` to absorb
//! clock skew between the two systems. Timestamps are UTC on both sides.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobStatus, SyncJob};
use crate::job_queue::JobQueue;
use crate::models::PackageSummary;
use crate::policy::ReconciliationPolicy;
use crate::search::DatasetSearch;
use crate::traits::{ContentFetcher, RecordStore};

/// Backward pad applied to the incremental window.
pub const CLOCK_SKEW_PAD: Duration = Duration::hours(1);

/// How much of the remote catalog a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Items modified since `since`, based on job `reference_job`.
    Incremental {
        since: DateTime<Utc>,
        reference_job: Uuid,
    },
    /// The whole catalog.
    Full,
}

impl SearchScope {
    pub fn is_incremental(&self) -> bool {
        matches!(self, SearchScope::Incremental { .. })
    }
}

/// Result of the planned search.
#[derive(Debug, Clone)]
pub enum GatherOutcome {
    /// Items to create records for, and the scope that produced them.
    Items {
        summaries: Vec<PackageSummary>,
        scope: SearchScope,
    },
    /// The incremental search found no changes; nothing to do.
    UpToDate { since: DateTime<Utc> },
}

/// Filter clause selecting items modified at or after `since`.
pub fn modified_since_clause(since: DateTime<Utc>) -> String {
    format!(
        "metadata_modified:[{} TO *]",
        since.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

/// Chooses the search scope for jobs of one source from their history.
pub struct SyncPlanner<'a, Q: JobQueue, R: RecordStore> {
    queue: &'a Q,
    records: &'a R,
}

impl<'a, Q: JobQueue, R: RecordStore> SyncPlanner<'a, Q, R> {
    pub fn new(queue: &'a Q, records: &'a R) -> Self {
        Self { queue, records }
    }

    /// Most recent prior job of the same source that left nothing unresolved.
    ///
    /// Candidates are walked newest first; one with an unresolved record is
    /// skipped in favour of the next older one.
    pub async fn last_error_free_job(&self, job: &SyncJob) -> Result<Option<SyncJob>, AppError> {
        let candidates = self
            .queue
            .finished_jobs_for_source(&job.source.id, job.id)
            .await?;

        for candidate in candidates {
            if candidate.status != JobStatus::Finished
                || !candidate.gather_succeeded()
                || candidate.gather_started.is_none()
            {
                continue;
            }

            let records = self.records.records_for_job(candidate.id).await?;
            if let Some(record) = records.iter().find(|r| r.is_unresolved()) {
                tracing::debug!(
                    job_id = %candidate.id,
                    guid = record.guid,
                    "Job left an unresolved record, looking further back"
                );
                continue;
            }

            return Ok(Some(candidate));
        }

        Ok(None)
    }

    /// Picks the scope for `job`: incremental if an error-free predecessor
    /// exists and `force_all` is off, otherwise full.
    pub async fn choose_scope(
        &self,
        job: &SyncJob,
        policy: &ReconciliationPolicy,
    ) -> Result<SearchScope, AppError> {
        if policy.force_all {
            tracing::info!(job_id = %job.id, "force_all set, searching the whole catalog");
            return Ok(SearchScope::Full);
        }

        let previous = self.last_error_free_job(job).await?;
        let scope = match previous.and_then(|p| p.gather_started.map(|at| (p.id, at))) {
            Some((reference_job, started)) => SearchScope::Incremental {
                since: started - CLOCK_SKEW_PAD,
                reference_job,
            },
            None => SearchScope::Full,
        };

        tracing::debug!(job_id = %job.id, ?scope, "Search scope chosen");
        Ok(scope)
    }

    /// Runs the search for `job` in the chosen scope.
    ///
    /// A failed incremental search falls back to a full one. Organization
    /// filter clauses apply to both.
    ///
    /// # Errors
    ///
    /// `AppError::SearchError` if the full search fails.
    pub async fn gather<F: ContentFetcher>(
        &self,
        job: &SyncJob,
        policy: &ReconciliationPolicy,
        search: &DatasetSearch<'_, F>,
    ) -> Result<GatherOutcome, AppError> {
        let base_filters = policy.org_filter.clauses();

        if let SearchScope::Incremental {
            since,
            reference_job,
        } = self.choose_scope(job, policy).await?
        {
            tracing::info!(
                job_id = %job.id,
                %reference_job,
                since = %since.format("%Y-%m-%dT%H:%M:%SZ"),
                "Searching for items modified since the last error-free job"
            );

            let mut filters = base_filters.clone();
            filters.push(modified_since_clause(since));

            match search.search(&filters).await {
                Ok(summaries) if summaries.is_empty() => {
                    tracing::info!(
                        job_id = %job.id,
                        "No items changed on the remote catalog since the last job"
                    );
                    return Ok(GatherOutcome::UpToDate { since });
                }
                Ok(summaries) => {
                    return Ok(GatherOutcome::Items {
                        summaries,
                        scope: SearchScope::Incremental {
                            since,
                            reference_job,
                        },
                    });
                }
                Err(e) => {
                    tracing::info!(
                        job_id = %job.id,
                        error = %e,
                        "Incremental search failed, falling back to a full search"
                    );
                }
            }
        }

        let summaries = search.search(&base_filters).await?;
        Ok(GatherOutcome::Items {
            summaries,
            scope: SearchScope::Full,
        })
    }
}
