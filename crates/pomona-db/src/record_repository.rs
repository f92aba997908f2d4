//! Record repository for PostgreSQL.
//!
//! Implements [`RecordStore`]. The "current" flag is guarded by a partial
//! unique index on `(source_id, guid)`; [`RecordRepository::mark_imported`]
//! swaps it inside one transaction so the index never sees two current rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use pomona_core::error::AppError;
use pomona_core::record::{
    ErrorStage, NewRecord, RecordError, RecordStage, ReportStatus, SyncRecord,
};
use pomona_core::traits::RecordStore;

/// PostgreSQL implementation of the record store.
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn errors_for(
        &self,
        record_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<RecordError>>, AppError> {
        if record_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<RecordErrorRow> = sqlx::query_as(
            r#"
            SELECT record_id, stage, kind, message, created_at
            FROM harvest_record_errors
            WHERE record_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(record_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<RecordError>> = HashMap::new();
        for row in rows {
            let record_id = row.record_id;
            match row.into_error() {
                Some(error) => grouped.entry(record_id).or_default().push(error),
                None => tracing::warn!(%record_id, "Skipping record error with unknown stage"),
            }
        }
        Ok(grouped)
    }

    async fn into_records(&self, rows: Vec<RecordRow>) -> Result<Vec<SyncRecord>, AppError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut errors = self.errors_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let record_errors = errors.remove(&row.id).unwrap_or_default();
                row.into_record(record_errors)
            })
            .collect())
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    guid: String,
    job_id: Uuid,
    content: Option<Vec<u8>>,
    stage: String,
    report_status: Option<String>,
    current: bool,
    created_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self, errors: Vec<RecordError>) -> SyncRecord {
        SyncRecord {
            id: self.id,
            guid: self.guid,
            job_id: self.job_id,
            content: self.content,
            stage: self.stage.parse().unwrap_or(RecordStage::Gathered),
            report_status: self.report_status.and_then(|s| s.parse().ok()),
            errors,
            current: self.current,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordErrorRow {
    record_id: Uuid,
    stage: String,
    kind: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl RecordErrorRow {
    fn into_error(self) -> Option<RecordError> {
        Some(RecordError {
            stage: self.stage.parse().ok()?,
            kind: self.kind,
            message: self.message,
            created_at: self.created_at,
        })
    }
}

const RECORD_COLUMNS: &str =
    "id, guid, job_id, content, stage, report_status, current, created_at";

// =============================================================================
// RecordStore Trait Implementation
// =============================================================================

impl RecordStore for RecordRepository {
    async fn create_record(&self, record: NewRecord) -> Result<SyncRecord, AppError> {
        // The source id is copied from the job so the current-record index
        // can be enforced per source.
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO harvest_records (guid, job_id, source_id, content)
            SELECT $1, j.id, j.source_id, $3
            FROM harvest_jobs j
            WHERE j.id = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&record.guid)
        .bind(record.job_id)
        .bind(&record.content)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_record(Vec::new())).ok_or_else(|| {
            AppError::Generic(format!(
                "Cannot create record {}: job {} does not exist",
                record.guid, record.job_id
            ))
        })
    }

    async fn get_record(&self, record_id: Uuid) -> Result<Option<SyncRecord>, AppError> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM harvest_records WHERE id = $1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.into_records(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn records_for_job(&self, job_id: Uuid) -> Result<Vec<SyncRecord>, AppError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM harvest_records WHERE job_id = $1 ORDER BY seq"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        self.into_records(rows).await
    }

    async fn save_content(&self, record_id: Uuid, content: &[u8]) -> Result<(), AppError> {
        sqlx::query("UPDATE harvest_records SET content = $2 WHERE id = $1")
            .bind(record_id)
            .bind(content)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_stage(&self, record_id: Uuid, stage: RecordStage) -> Result<(), AppError> {
        sqlx::query("UPDATE harvest_records SET stage = $2 WHERE id = $1")
            .bind(record_id)
            .bind(stage.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_error(
        &self,
        record_id: Uuid,
        stage: ErrorStage,
        kind: &str,
        message: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_record_errors (record_id, stage, kind, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record_id)
        .bind(stage.as_str())
        .bind(kind)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_report_status(
        &self,
        record_id: Uuid,
        status: ReportStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE harvest_records SET report_status = $2 WHERE id = $1")
            .bind(record_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_imported(
        &self,
        record_id: Uuid,
        source_id: &str,
        status: ReportStatus,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query(
            r#"
            UPDATE harvest_records
            SET current = FALSE
            WHERE source_id = $1
              AND guid = (SELECT guid FROM harvest_records WHERE id = $2)
              AND current
              AND id <> $2
            "#,
        )
        .bind(source_id)
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE harvest_records
            SET current = TRUE, stage = 'imported', report_status = $2
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            %record_id,
            source_id,
            superseded = cleared.rows_affected(),
            "Record marked current"
        );
        Ok(())
    }
}
