//! Per-record outcomes and job statistics.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;
use crate::record::ReportStatus;

/// Outcome of running one record through fetch and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new local item was created.
    Created,
    /// An existing local item was updated.
    Updated,
    /// The local item already matched the remote payload; nothing written.
    NotModified,
    /// Nothing to import (harvest source configuration objects).
    Skipped,
    /// Fetch or import failed; the error is attached to the record.
    Failed,
}

impl SyncOutcome {
    /// Report status persisted on the record for this outcome.
    ///
    /// Skipped items are reported as not modified: nothing was written and
    /// nothing is left to retry.
    pub fn report_status(&self) -> ReportStatus {
        match self {
            SyncOutcome::Created => ReportStatus::Added,
            SyncOutcome::Updated => ReportStatus::Updated,
            SyncOutcome::NotModified | SyncOutcome::Skipped => ReportStatus::NotModified,
            SyncOutcome::Failed => ReportStatus::Errored,
        }
    }
}

/// Statistics for one sync job.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records created by the gather stage.
    pub gathered: usize,
    pub created: usize,
    pub updated: usize,
    pub not_modified: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::NotModified => self.not_modified += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    /// Returns the number of records that went through fetch and import.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.not_modified + self.skipped + self.failed
    }

    /// Returns the number of records processed without error.
    pub fn successful(&self) -> usize {
        self.created + self.updated + self.not_modified + self.skipped
    }
}

/// Lock-free counterpart of [`SyncStats`] for concurrent record processing.
#[derive(Debug, Default)]
pub struct AtomicSyncStats {
    gathered: AtomicUsize,
    created: AtomicUsize,
    updated: AtomicUsize,
    not_modified: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl AtomicSyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gathered(&self, count: usize) {
        self.gathered.store(count, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: SyncOutcome) {
        let counter = match outcome {
            SyncOutcome::Created => &self.created,
            SyncOutcome::Updated => &self.updated,
            SyncOutcome::NotModified => &self.not_modified,
            SyncOutcome::Skipped => &self.skipped,
            SyncOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> SyncStats {
        SyncStats {
            gathered: self.gathered.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Result of running one job end to end.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stats: SyncStats,
}

impl JobResult {
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }

    /// True if any record failed to fetch or import.
    ///
    /// Record failures do not change the job status; a `finished` job may
    /// still have errored records.
    pub fn has_failures(&self) -> bool {
        self.stats.failed > 0
    }
}

/// Result of harvesting a single source within a batch.
#[derive(Debug, Clone)]
pub struct SourceHarvestResult {
    pub source_name: String,
    pub source_url: String,
    pub result: Result<JobResult, String>,
}

impl SourceHarvestResult {
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(r) if r.status == JobStatus::Finished)
    }
}

/// Summary of a batch harvest over several sources.
#[derive(Debug, Clone, Default)]
pub struct BatchHarvestSummary {
    pub results: Vec<SourceHarvestResult>,
}

impl BatchHarvestSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: SourceHarvestResult) {
        self.results.push(result);
    }

    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.successful_count()
    }

    /// Records imported (created or updated) across all sources.
    pub fn total_imported(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .map(|r| r.stats.created + r.stats.updated)
            .sum()
    }
}
