//! Harvest service: the gather, fetch and import stages.
//!
//! # Architecture
//!
//! [`HarvestService`] is generic over four traits:
//! - [`JobQueue`] - job persistence
//! - [`RecordStore`] - record persistence
//! - [`LocalCatalog`] - the catalog items are written into
//! - [`ContentFetcher`] - HTTP access to remote catalogs
//!
//! Each stage call parses the source configuration afresh and works on that
//! snapshot only, so stages for different records can run concurrently.
//!
//! # Failure handling
//!
//! - gather failures are attached to the job and leave it without records
//! - fetch and import failures are attached to the record; sibling records
//!   are always attempted
//! - nothing is retried; the next job picks up what this one missed
//!
//! # Job status
//!
//! [`run_job`](HarvestService::run_job) ends a job `errored` if the gather
//! stage recorded errors, `cancelled` if the token fired, `finished`
//! otherwise. Failed records leave the status alone; they show up in the
//! `failed` count of the job stats and in the planner's next decision.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{SourceEntry, SyncConfig};
use crate::error::AppError;
use crate::family::RemoteApi;
use crate::job::{CreateJobRequest, JobStatus, SyncJob};
use crate::job_queue::JobQueue;
use crate::models::{PackageSummary, RemotePackage};
use crate::planner::{GatherOutcome, SearchScope, SyncPlanner};
use crate::policy::{ReconciliationPolicy, SourceConfig};
use crate::progress::{HarvestEvent, ProgressReporter, SilentReporter};
use crate::reconcile::{Placeholders, Reconciled, Reconciler};
use crate::record::{ErrorStage, NewRecord, RecordStage, SyncRecord};
use crate::report::ErrorReporter;
use crate::search::DatasetSearch;
use crate::sync::{
    AtomicSyncStats, BatchHarvestSummary, JobResult, SourceHarvestResult, SyncOutcome,
};
use crate::traits::{ContentFetcher, LocalCatalog, RecordStore};

/// What the gather stage produced.
#[derive(Debug, Clone, Default)]
pub struct GatherReport {
    /// Records created, one per unique remote id.
    pub records: Vec<SyncRecord>,
    /// Scope of the search that produced them; `None` if no search ran or
    /// the source was up to date.
    pub scope: Option<SearchScope>,
    /// Number of gather errors attached to the job.
    pub errors: usize,
}

impl GatherReport {
    fn failed() -> Self {
        Self {
            errors: 1,
            ..Self::default()
        }
    }
}

/// Per-call state derived from the job's source configuration.
struct StageContext {
    api: RemoteApi,
    policy: ReconciliationPolicy,
}

/// Service running harvest jobs.
///
/// # Example
///
/// ```ignore
/// use pomona_core::HarvestService;
/// use pomona_core::progress::TracingReporter;
/// use tokio_util::sync::CancellationToken;
///
/// let service = HarvestService::new(jobs, records, catalog, fetcher);
/// let result = service.run_job(&job, &TracingReporter, CancellationToken::new()).await?;
/// println!("{} created, {} failed", result.stats.created, result.stats.failed);
/// ```
pub struct HarvestService<Q, R, C, F>
where
    Q: JobQueue,
    R: RecordStore,
    C: LocalCatalog,
    F: ContentFetcher,
{
    queue: Q,
    records: R,
    catalog: C,
    fetcher: F,
    config: SyncConfig,
}

impl<Q, R, C, F> Clone for HarvestService<Q, R, C, F>
where
    Q: JobQueue,
    R: RecordStore,
    C: LocalCatalog,
    F: ContentFetcher,
{
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            records: self.records.clone(),
            catalog: self.catalog.clone(),
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
        }
    }
}

impl<Q, R, C, F> HarvestService<Q, R, C, F>
where
    Q: JobQueue,
    R: RecordStore,
    C: LocalCatalog,
    F: ContentFetcher,
{
    pub fn new(queue: Q, records: R, catalog: C, fetcher: F) -> Self {
        Self::with_config(queue, records, catalog, fetcher, SyncConfig::default())
    }

    pub fn with_config(queue: Q, records: R, catalog: C, fetcher: F, config: SyncConfig) -> Self {
        Self {
            queue,
            records,
            catalog,
            fetcher,
            config,
        }
    }

    fn errors(&self) -> ErrorReporter<'_, Q, R> {
        ErrorReporter::new(&self.queue, &self.records)
    }

    /// Parses the source configuration and resolves the reconciliation policy.
    async fn stage_context(&self, job: &SyncJob) -> Result<StageContext, AppError> {
        let config = SourceConfig::parse(job.source.config.as_deref())?;
        let family = job.source.family;
        let api = RemoteApi::new(family, &job.source.url, config.api_version())?;
        let policy = ReconciliationPolicy::load(&config, family, &self.catalog).await?;
        Ok(StageContext { api, policy })
    }

    // =========================================================================
    // Gather
    // =========================================================================

    /// Enumerates the remote items `job` has to process and creates one
    /// record per unique remote id.
    ///
    /// Job-level failures are attached to the job as gather errors and yield
    /// a report without records.
    ///
    /// # Errors
    ///
    /// Only persistence failures of the job or record store.
    pub async fn gather_stage(&self, job: &SyncJob) -> Result<GatherReport, AppError> {
        tracing::info!(job_id = %job.id, source = job.source.url, "Gather stage started");
        let errors = self.errors();

        let ctx = match self.stage_context(job).await {
            Ok(ctx) => ctx,
            Err(e) => {
                errors
                    .gather_error(job.id, &format!("Invalid source configuration: {}", e))
                    .await;
                return Ok(GatherReport::failed());
            }
        };

        let search = DatasetSearch::new(
            &self.fetcher,
            &ctx.api,
            ctx.policy.credential.as_deref(),
        );
        let planner = SyncPlanner::new(&self.queue, &self.records);

        let (summaries, scope) = match planner.gather(job, &ctx.policy, &search).await {
            Ok(GatherOutcome::Items { summaries, scope }) => (summaries, scope),
            Ok(GatherOutcome::UpToDate { .. }) => return Ok(GatherReport::default()),
            Err(e) => {
                errors
                    .gather_error(
                        job.id,
                        &format!(
                            "Unable to search remote catalog for datasets: {} url: {} terms: {:?}",
                            e,
                            ctx.api.base_url(),
                            ctx.policy.org_filter.clauses()
                        ),
                    )
                    .await;
                return Ok(GatherReport::failed());
            }
        };

        if summaries.is_empty() {
            errors
                .gather_error(
                    job.id,
                    &format!("No datasets found at remote catalog: {}", ctx.api.base_url()),
                )
                .await;
            return Ok(GatherReport {
                scope: Some(scope),
                ..GatherReport::failed()
            });
        }

        let records = self.stage_records(job, summaries).await?;
        tracing::info!(job_id = %job.id, count = records.len(), "Gather stage finished");
        Ok(GatherReport {
            records,
            scope: Some(scope),
            errors: 0,
        })
    }

    async fn stage_records(
        &self,
        job: &SyncJob,
        summaries: Vec<PackageSummary>,
    ) -> Result<Vec<SyncRecord>, AppError> {
        let mut seen = HashSet::with_capacity(summaries.len());
        let mut records = Vec::with_capacity(summaries.len());

        for summary in summaries {
            if !seen.insert(summary.id.clone()) {
                tracing::info!(
                    guid = summary.id,
                    "Discarding duplicate dataset, probably changed on the remote side while paging"
                );
                continue;
            }

            let record = self
                .records
                .create_record(NewRecord {
                    guid: summary.id,
                    job_id: job.id,
                    content: Some(serde_json::to_vec(&summary.raw)?),
                })
                .await?;
            records.push(record);
        }

        Ok(records)
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Downloads the full payload of the record's remote item.
    ///
    /// Returns `false` if the record failed; the failure is attached to it.
    pub async fn fetch_stage(&self, job: &SyncJob, record: &SyncRecord) -> Result<bool, AppError> {
        let errors = self.errors();
        let config = match SourceConfig::parse(job.source.config.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                errors
                    .record_error(record.id, ErrorStage::Fetch, e.kind(), &e.to_string())
                    .await;
                return Ok(false);
            }
        };

        let url = match RemoteApi::new(job.source.family, &job.source.url, config.api_version())
            .and_then(|api| api.package_url(&record.guid))
        {
            Ok(url) => url,
            Err(e) => {
                errors
                    .record_error(record.id, ErrorStage::Fetch, e.kind(), &e.to_string())
                    .await;
                return Ok(false);
            }
        };

        match self.fetcher.fetch(&url, config.api_key.as_deref()).await {
            Ok(content) => {
                self.records.save_content(record.id, &content).await?;
                self.records
                    .set_stage(record.id, RecordStage::Fetched)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                let message = match &e {
                    AppError::NotFound(_) => {
                        format!("Remote item {} no longer exists: {}", record.guid, e)
                    }
                    _ => format!("Unable to get content for package: {}: {}", url, e),
                };
                errors
                    .record_error(record.id, ErrorStage::Fetch, e.kind(), &message)
                    .await;
                Ok(false)
            }
        }
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Reconciles the fetched payload and writes it into the local catalog.
    pub async fn import_stage(
        &self,
        job: &SyncJob,
        record: &SyncRecord,
    ) -> Result<SyncOutcome, AppError> {
        let errors = self.errors();

        let Some(content) = record.content.as_deref() else {
            errors
                .record_error(
                    record.id,
                    ErrorStage::Import,
                    "empty_content",
                    &format!("Empty content for object {}", record.id),
                )
                .await;
            return Ok(SyncOutcome::Failed);
        };

        let ctx = match self.stage_context(job).await {
            Ok(ctx) => ctx,
            Err(e) => {
                errors
                    .record_error(record.id, ErrorStage::Import, e.kind(), &e.to_string())
                    .await;
                return Ok(SyncOutcome::Failed);
            }
        };

        let package = match decode_package(&ctx.api, content) {
            Ok(package) => package,
            Err(e) => {
                errors
                    .record_error(record.id, ErrorStage::Import, e.kind(), &e.to_string())
                    .await;
                return Ok(SyncOutcome::Failed);
            }
        };

        let reconciler = Reconciler::new(
            &self.catalog,
            &self.fetcher,
            &ctx.api,
            &ctx.policy,
            &job.source.id,
        );
        let placeholders = Placeholders::for_record(job, record);

        let outcome = match reconciler.reconcile(package, &placeholders).await {
            Ok(Reconciled::HarvestSourceSkipped) => Ok(SyncOutcome::Skipped),
            Ok(Reconciled::Package {
                package,
                diagnostics,
            }) => {
                for diagnostic in &diagnostics {
                    errors
                        .record_diagnostic(record.id, ErrorStage::Import, diagnostic)
                        .await;
                }
                reconciler.write_package(&package).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome @ (SyncOutcome::Created | SyncOutcome::Updated)) => {
                // The item is written; a record that cannot become current
                // stays unresolved so the next job looks at the item again.
                if let Err(e) = self
                    .records
                    .mark_imported(record.id, &job.source.id, outcome.report_status())
                    .await
                {
                    errors
                        .record_error(
                            record.id,
                            ErrorStage::Import,
                            e.kind(),
                            &format!("Could not mark record {} as current: {}", record.guid, e),
                        )
                        .await;
                    return Ok(SyncOutcome::Failed);
                }
                Ok(outcome)
            }
            Ok(outcome) => {
                self.records
                    .set_report_status(record.id, outcome.report_status())
                    .await?;
                self.records
                    .set_stage(record.id, RecordStage::Imported)
                    .await?;
                Ok(outcome)
            }
            Err(e) => {
                let message = match &e {
                    AppError::ValidationError(fields) => {
                        format!("Invalid package with GUID {}: {}", record.guid, fields)
                    }
                    _ => e.to_string(),
                };
                errors
                    .record_error(record.id, ErrorStage::Import, e.kind(), &message)
                    .await;
                Ok(SyncOutcome::Failed)
            }
        }
    }

    /// Runs fetch then import for one record.
    async fn process_record(&self, job: &SyncJob, record: SyncRecord) -> SyncOutcome {
        let result: Result<SyncOutcome, AppError> = async {
            if !self.fetch_stage(job, &record).await? {
                return Ok(SyncOutcome::Failed);
            }
            match self.records.get_record(record.id).await? {
                Some(fetched) => self.import_stage(job, &fetched).await,
                None => Err(AppError::Generic(format!("Record {} vanished", record.id))),
            }
        }
        .await;

        result.unwrap_or_else(|e| {
            tracing::error!(record_id = %record.id, guid = record.guid, error = %e, "Record processing failed");
            SyncOutcome::Failed
        })
    }

    // =========================================================================
    // Whole jobs
    // =========================================================================

    /// Runs all three stages for `job` and moves it to a terminal status.
    ///
    /// Cancellation is checked between records only; a record in flight is
    /// always finished.
    pub async fn run_job<P: ProgressReporter>(
        &self,
        job: &SyncJob,
        reporter: &P,
        cancel_token: CancellationToken,
    ) -> Result<JobResult, AppError> {
        let stats = Arc::new(AtomicSyncStats::new());

        if cancel_token.is_cancelled() {
            return self
                .finish(job.id, JobStatus::Cancelled, &stats, reporter)
                .await;
        }

        self.queue.mark_gather_started(job.id, Utc::now()).await?;
        let gathered = self.gather_stage(job).await?;
        self.queue.mark_gather_finished(job.id, Utc::now()).await?;

        if gathered.errors > 0 {
            reporter.report(HarvestEvent::GatherFailed {
                job_id: job.id,
                errors: gathered.errors,
            });
            return self
                .finish(job.id, JobStatus::Errored, &stats, reporter)
                .await;
        }

        let Some(scope) = gathered.scope else {
            reporter.report(HarvestEvent::SourceUpToDate { job_id: job.id });
            return self
                .finish(job.id, JobStatus::Finished, &stats, reporter)
                .await;
        };

        let total = gathered.records.len();
        stats.set_gathered(total);
        reporter.report(HarvestEvent::RecordsGathered {
            job_id: job.id,
            count: total,
            scope,
        });

        let processed = AtomicUsize::new(0);
        let report_interval = std::cmp::max(total / 20, 50);

        let mut outcomes = stream::iter(gathered.records)
            .map(|record| {
                let cancel_token = cancel_token.clone();
                async move {
                    if cancel_token.is_cancelled() {
                        return None;
                    }
                    Some(self.process_record(job, record).await)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            let Some(outcome) = outcome else {
                continue;
            };
            stats.record(outcome);

            let current = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if current % report_interval == 0 || current == total {
                let snapshot = stats.to_stats();
                reporter.report(HarvestEvent::RecordsProcessed {
                    job_id: job.id,
                    current,
                    total,
                    stats: &snapshot,
                });
            }
        }

        let status = if cancel_token.is_cancelled() && processed.load(Ordering::Relaxed) < total {
            JobStatus::Cancelled
        } else {
            JobStatus::Finished
        };
        self.finish(job.id, status, &stats, reporter).await
    }

    async fn finish<P: ProgressReporter>(
        &self,
        job_id: Uuid,
        status: JobStatus,
        stats: &AtomicSyncStats,
        reporter: &P,
    ) -> Result<JobResult, AppError> {
        let stats = stats.to_stats();
        self.queue.finish_job(job_id, status, &stats).await?;
        reporter.report(HarvestEvent::JobFinished {
            job_id,
            status,
            stats: &stats,
        });
        Ok(JobResult {
            job_id,
            status,
            stats,
        })
    }

    /// Queues a job for `source` and runs it immediately.
    pub async fn harvest_source<P: ProgressReporter>(
        &self,
        source: &SourceEntry,
        reporter: &P,
        cancel_token: CancellationToken,
    ) -> Result<JobResult, AppError> {
        let job = self
            .queue
            .create_job(CreateJobRequest::new(source.to_source()?))
            .await?;
        self.run_job(&job, reporter, cancel_token).await
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Harvests several sources one after another.
    ///
    /// A failing source does not stop the batch; cancellation does.
    pub async fn batch_harvest(&self, sources: &[&SourceEntry]) -> BatchHarvestSummary {
        self.batch_harvest_with_progress(sources, &SilentReporter, CancellationToken::new())
            .await
    }

    pub async fn batch_harvest_with_progress<P: ProgressReporter>(
        &self,
        sources: &[&SourceEntry],
        reporter: &P,
        cancel_token: CancellationToken,
    ) -> BatchHarvestSummary {
        let mut summary = BatchHarvestSummary::new();
        let total = sources.len();

        reporter.report(HarvestEvent::BatchStarted {
            total_sources: total,
        });

        for (i, source) in sources.iter().enumerate() {
            if cancel_token.is_cancelled() {
                reporter.report(HarvestEvent::BatchCancelled {
                    completed_sources: i,
                    total_sources: total,
                });
                return summary;
            }

            reporter.report(HarvestEvent::SourceStarted {
                source_index: i,
                total_sources: total,
                source_name: &source.name,
                source_url: &source.url,
            });

            let result = self
                .harvest_source(source, reporter, cancel_token.clone())
                .await;

            if let Err(e) = &result {
                let error = e.to_string();
                reporter.report(HarvestEvent::SourceFailed {
                    source_index: i,
                    total_sources: total,
                    source_name: &source.name,
                    error: &error,
                });
            }

            let cancelled = matches!(&result, Ok(r) if r.is_cancelled());
            summary.add(SourceHarvestResult {
                source_name: source.name.clone(),
                source_url: source.url.clone(),
                result: result.map_err(|e| e.to_string()),
            });

            if cancelled {
                reporter.report(HarvestEvent::BatchCancelled {
                    completed_sources: i + 1,
                    total_sources: total,
                });
                return summary;
            }
        }

        reporter.report(HarvestEvent::BatchCompleted { summary: &summary });
        summary
    }
}

/// Extracts and decodes the item payload from fetched content.
fn decode_package(api: &RemoteApi, content: &[u8]) -> Result<RemotePackage, AppError> {
    let response: Value = serde_json::from_slice(content)?;
    let payload = api
        .family()
        .item_envelope()
        .payload(response)
        .map_err(|e| AppError::FetchError(format!("Unexpected item payload: {}", e)))?;
    Ok(serde_json::from_value(payload)?)
}
