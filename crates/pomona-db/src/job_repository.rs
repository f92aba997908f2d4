//! Job repository for PostgreSQL with SELECT FOR UPDATE SKIP LOCKED.
//!
//! Implements the [`JobQueue`] trait for persistent job storage with safe
//! concurrent job claiming using PostgreSQL's row-level locking. Gather errors
//! live in their own table and are attached to jobs on every read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use pomona_core::SyncStats;
use pomona_core::error::AppError;
use pomona_core::job::{CreateJobRequest, GatherError, JobStatus, SyncJob};
use pomona_core::job_queue::JobQueue;
use pomona_core::models::HarvestSource;

/// PostgreSQL implementation of the job queue.
///
/// Uses `SELECT FOR UPDATE SKIP LOCKED` for safe concurrent job claiming,
/// ensuring that multiple workers can process jobs without conflicts.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    /// Create a new job repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads gather errors for `job_ids`, grouped by job, oldest first.
    async fn gather_errors_for(
        &self,
        job_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<GatherError>>, AppError> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<GatherErrorRow> = sqlx::query_as(
            r#"
            SELECT job_id, message, created_at
            FROM harvest_gather_errors
            WHERE job_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<GatherError>> = HashMap::new();
        for row in rows {
            grouped.entry(row.job_id).or_default().push(GatherError {
                message: row.message,
                created_at: row.created_at,
            });
        }
        Ok(grouped)
    }

    async fn into_jobs(&self, rows: Vec<JobRow>) -> Result<Vec<SyncJob>, AppError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut errors = self.gather_errors_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let gather_errors = errors.remove(&row.id).unwrap_or_default();
                row.into_job(gather_errors)
            })
            .collect())
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// Helper struct for deserializing job rows from the database.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source_id: String,
    source_url: String,
    source_title: String,
    family: String,
    config: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    gather_started: Option<DateTime<Utc>>,
    gather_finished: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    stats: Option<Json<SyncStats>>,
    worker_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct GatherErrorRow {
    job_id: Uuid,
    message: String,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self, gather_errors: Vec<GatherError>) -> SyncJob {
        let family = self.family.parse().unwrap_or_else(|_| {
            tracing::warn!(job_id = %self.id, family = %self.family, "Unknown source family, using ckan");
            Default::default()
        });

        SyncJob {
            id: self.id,
            source: HarvestSource {
                id: self.source_id,
                url: self.source_url,
                title: self.source_title,
                family,
                config: self.config,
            },
            status: self.status.parse().unwrap_or(JobStatus::New),
            created_at: self.created_at,
            gather_started: self.gather_started,
            gather_finished: self.gather_finished,
            finished_at: self.finished_at,
            gather_errors,
            stats: self.stats.map(|j| j.0),
            worker_id: self.worker_id,
        }
    }
}

// =============================================================================
// JobQueue Trait Implementation
// =============================================================================

impl JobQueue for JobRepository {
    async fn create_job(&self, request: CreateJobRequest) -> Result<SyncJob, AppError> {
        let source = &request.source;

        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO harvest_jobs (source_id, source_url, source_title, family, config)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&source.id)
        .bind(&source.url)
        .bind(&source.title)
        .bind(source.family.as_str())
        .bind(&source.config)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_job(Vec::new()))
    }

    async fn claim_job(&self, worker_id: &str) -> Result<Option<SyncJob>, AppError> {
        // Oldest queued job first. SKIP LOCKED lets concurrent workers pass
        // over a row another worker is claiming.
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE harvest_jobs
            SET
                status = 'running',
                worker_id = $1
            WHERE id = (
                SELECT id FROM harvest_jobs
                WHERE status = 'new'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        // A freshly claimed job has not gathered yet, so it has no errors.
        Ok(row.map(|r| r.into_job(Vec::new())))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SyncJob>, AppError> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM harvest_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.into_jobs(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn mark_gather_started(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET gather_started = $2, status = 'running'
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_gather_finished(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE harvest_jobs SET gather_finished = $2 WHERE id = $1")
            .bind(job_id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_gather_error(&self, job_id: Uuid, message: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO harvest_gather_errors (job_id, message) VALUES ($1, $2)")
            .bind(job_id)
            .bind(message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        stats: &SyncStats,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET
                status = $2,
                stats = $3,
                finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(Json(stats))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finished_jobs_for_source(
        &self,
        source_id: &str,
        exclude_job_id: Uuid,
    ) -> Result<Vec<SyncJob>, AppError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM harvest_jobs
            WHERE source_id = $1
              AND id <> $2
              AND status = 'finished'
              AND gather_started IS NOT NULL
            ORDER BY gather_started DESC
            "#,
        )
        .bind(source_id)
        .bind(exclude_job_id)
        .fetch_all(&self.pool)
        .await?;

        self.into_jobs(rows).await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<SyncJob>, AppError> {
        let rows: Vec<JobRow> = if let Some(s) = status {
            sqlx::query_as(
                r#"
                SELECT * FROM harvest_jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(s.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT * FROM harvest_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        };

        self.into_jobs(rows).await
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET
                status = 'new',
                worker_id = NULL
            WHERE worker_id = $1 AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
