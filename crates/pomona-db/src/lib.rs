//! Pomona DB - PostgreSQL persistence for sync jobs and records
//!
//! # Overview
//!
//! The main components are:
//! - [`JobRepository`] - Persistent job queue with gather errors
//! - [`RecordRepository`] - Sync records, their diagnostics and the current flag
//! - [`MIGRATOR`] - Embedded schema migrations

mod job_repository;
mod record_repository;

pub use job_repository::JobRepository;
pub use record_repository::RecordRepository;

/// Schema migrations, embedded at compile time.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
