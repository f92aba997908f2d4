//! Progress reporting for harvest runs.
//!
//! The services emit [`HarvestEvent`]s through a [`ProgressReporter`] instead
//! of logging directly, so frontends decide how progress is shown.

use uuid::Uuid;

use crate::job::JobStatus;
use crate::planner::SearchScope;
use crate::sync::{BatchHarvestSummary, SyncStats};

/// Events emitted while harvesting.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// A batch over several sources started.
    BatchStarted { total_sources: usize },
    /// One source of a batch started.
    SourceStarted {
        source_index: usize,
        total_sources: usize,
        source_name: &'a str,
        source_url: &'a str,
    },
    /// The gather stage produced records.
    RecordsGathered {
        job_id: Uuid,
        count: usize,
        scope: SearchScope,
    },
    /// The incremental search found nothing changed.
    SourceUpToDate { job_id: Uuid },
    /// The gather stage recorded errors.
    GatherFailed { job_id: Uuid, errors: usize },
    /// Periodic progress while fetching and importing records.
    RecordsProcessed {
        job_id: Uuid,
        current: usize,
        total: usize,
        stats: &'a SyncStats,
    },
    /// A job reached a terminal status.
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        stats: &'a SyncStats,
    },
    /// One source of a batch failed before its job could run.
    SourceFailed {
        source_index: usize,
        total_sources: usize,
        source_name: &'a str,
        error: &'a str,
    },
    /// A batch stopped early on cancellation.
    BatchCancelled {
        completed_sources: usize,
        total_sources: usize,
    },
    /// A batch finished.
    BatchCompleted { summary: &'a BatchHarvestSummary },
}

/// Receives harvest progress events.
pub trait ProgressReporter: Send + Sync {
    /// The default implementation ignores the event.
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reporter that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::BatchStarted { total_sources } => {
                tracing::info!(total_sources, "Starting batch harvest");
            }
            HarvestEvent::SourceStarted {
                source_index,
                total_sources,
                source_name,
                source_url,
            } => {
                tracing::info!(
                    "[{}/{}] Harvesting {} ({})",
                    source_index + 1,
                    total_sources,
                    source_name,
                    source_url
                );
            }
            HarvestEvent::RecordsGathered {
                job_id,
                count,
                scope,
            } => {
                tracing::info!(
                    %job_id,
                    count,
                    incremental = scope.is_incremental(),
                    "Gathered records"
                );
            }
            HarvestEvent::SourceUpToDate { job_id } => {
                tracing::info!(%job_id, "Source up to date, nothing to harvest");
            }
            HarvestEvent::GatherFailed { job_id, errors } => {
                tracing::warn!(%job_id, errors, "Gather stage recorded errors");
            }
            HarvestEvent::RecordsProcessed {
                job_id,
                current,
                total,
                stats,
            } => {
                let pct = if total > 0 { current * 100 / total } else { 100 };
                tracing::info!(
                    %job_id,
                    "Progress: {}/{} ({}%) - created: {}, updated: {}, not modified: {}, failed: {}",
                    current,
                    total,
                    pct,
                    stats.created,
                    stats.updated,
                    stats.not_modified,
                    stats.failed
                );
            }
            HarvestEvent::JobFinished {
                job_id,
                status,
                stats,
            } => {
                tracing::info!(
                    %job_id,
                    status = status.as_str(),
                    gathered = stats.gathered,
                    created = stats.created,
                    updated = stats.updated,
                    not_modified = stats.not_modified,
                    skipped = stats.skipped,
                    failed = stats.failed,
                    "Job finished"
                );
            }
            HarvestEvent::SourceFailed {
                source_index,
                total_sources,
                source_name,
                error,
            } => {
                tracing::error!(
                    "[{}/{}] Failed to harvest {}: {}",
                    source_index + 1,
                    total_sources,
                    source_name,
                    error
                );
            }
            HarvestEvent::BatchCancelled {
                completed_sources,
                total_sources,
            } => {
                tracing::warn!(completed_sources, total_sources, "Batch harvest cancelled");
            }
            HarvestEvent::BatchCompleted { summary } => {
                tracing::info!(
                    successful = summary.successful_count(),
                    failed = summary.failed_count(),
                    imported = summary.total_imported(),
                    "Batch harvest complete"
                );
            }
        }
    }
}
