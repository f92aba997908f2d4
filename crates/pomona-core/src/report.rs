//! Persisting job and record diagnostics.
//!
//! Failures while *saving* a diagnostic are logged and swallowed: a broken
//! error trail must not turn a record-level failure into a job-level one.

use uuid::Uuid;

use crate::job_queue::JobQueue;
use crate::record::{ErrorStage, RecordError, RecordStage, ReportStatus};
use crate::traits::RecordStore;

pub struct ErrorReporter<'a, Q: JobQueue, R: RecordStore> {
    queue: &'a Q,
    records: &'a R,
}

impl<'a, Q: JobQueue, R: RecordStore> ErrorReporter<'a, Q, R> {
    pub fn new(queue: &'a Q, records: &'a R) -> Self {
        Self { queue, records }
    }

    /// Attaches a gather-stage error to the job.
    pub async fn gather_error(&self, job_id: Uuid, message: &str) {
        tracing::error!(%job_id, error = message, "Gather error");
        if let Err(e) = self.queue.save_gather_error(job_id, message).await {
            tracing::error!(%job_id, error = %e, "Failed to save gather error");
        }
    }

    /// Attaches a failure of class `kind` to the record and marks it errored.
    ///
    /// `kind` is normally [`AppError::kind`](crate::error::AppError::kind) of
    /// the underlying error.
    pub async fn record_error(
        &self,
        record_id: Uuid,
        stage: ErrorStage,
        kind: &str,
        message: &str,
    ) {
        tracing::warn!(%record_id, stage = stage.as_str(), kind, error = message, "Record failed");
        self.save(record_id, stage, kind, message).await;

        if let Err(e) = self.records.set_stage(record_id, RecordStage::Errored).await {
            tracing::error!(%record_id, error = %e, "Failed to mark record as errored");
        }
        if let Err(e) = self
            .records
            .set_report_status(record_id, ReportStatus::Errored)
            .await
        {
            tracing::error!(%record_id, error = %e, "Failed to set record report status");
        }
    }

    /// Attaches a note to the record without changing its stage.
    pub async fn record_diagnostic(&self, record_id: Uuid, stage: ErrorStage, message: &str) {
        tracing::info!(%record_id, stage = stage.as_str(), message, "Record diagnostic");
        self.save(record_id, stage, RecordError::REFERENCE, message)
            .await;
    }

    async fn save(&self, record_id: Uuid, stage: ErrorStage, kind: &str, message: &str) {
        if let Err(e) = self
            .records
            .save_error(record_id, stage, kind, message)
            .await
        {
            tracing::error!(%record_id, error = %e, "Failed to save record error");
        }
    }
}
