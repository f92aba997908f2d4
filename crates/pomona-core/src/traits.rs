//! Trait definitions for external collaborators.
//!
//! The pipeline never talks to the network, the database or the local
//! catalog directly. It goes through these traits, which keeps the stage logic
//! testable with in-memory implementations:
//!
//! - [`ContentFetcher`] - single-attempt authenticated HTTP GET
//! - [`RecordStore`] - persistence of [`SyncRecord`]s
//! - [`LocalCatalog`] - lookups and writes against the local catalog
//!
//! Job persistence lives in [`crate::job_queue::JobQueue`].

use std::future::Future;

use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::AppError;
use crate::models::{
    LocalGroup, LocalOrganization, LocalPackage, LocalUser, Lookup, RemotePackage, WriteContext,
};
use crate::record::{ErrorStage, NewRecord, RecordStage, ReportStatus, SyncRecord};

/// Retrieves raw content from remote catalogs.
pub trait ContentFetcher: Send + Sync + Clone {
    /// Issues one GET for `url`, sending `credential` as the `Authorization`
    /// header when present.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for HTTP 404
    /// - `AppError::FetchError` for any other status, transport failure or timeout
    fn fetch(
        &self,
        url: &Url,
        credential: Option<&str>,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Store for sync records.
///
/// Implementations must keep at most one current record per
/// `(source, guid)`: [`mark_imported`](Self::mark_imported) clears the
/// previous current record and sets the new one in a single atomic step.
pub trait RecordStore: Send + Sync + Clone {
    /// Creates a record in stage `Gathered`.
    fn create_record(
        &self,
        record: NewRecord,
    ) -> impl Future<Output = Result<SyncRecord, AppError>> + Send;

    fn get_record(
        &self,
        record_id: Uuid,
    ) -> impl Future<Output = Result<Option<SyncRecord>, AppError>> + Send;

    /// All records of a job, in creation order.
    fn records_for_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Vec<SyncRecord>, AppError>> + Send;

    /// Replaces the record's content.
    fn save_content(
        &self,
        record_id: Uuid,
        content: &[u8],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_stage(
        &self,
        record_id: Uuid,
        stage: RecordStage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Appends a diagnostic of class `kind` to the record.
    fn save_error(
        &self,
        record_id: Uuid,
        stage: ErrorStage,
        kind: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Sets the report status without touching the current flag.
    fn set_report_status(
        &self,
        record_id: Uuid,
        status: ReportStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Moves the record to `Imported` with `status` and makes it the current
    /// record for its guid within `source_id`.
    fn mark_imported(
        &self,
        record_id: Uuid,
        source_id: &str,
        status: ReportStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// The local catalog that harvested items are written into.
///
/// Show operations return [`Lookup::NotFound`] for missing entities instead
/// of an error; errors are reserved for actual failures.
pub trait LocalCatalog: Send + Sync + Clone {
    fn show_package(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Lookup<LocalPackage>, AppError>> + Send;

    /// Creates an item and returns its local id.
    ///
    /// # Errors
    ///
    /// `AppError::ValidationError` when the catalog rejects the payload.
    fn create_package(
        &self,
        ctx: &WriteContext,
        package: &RemotePackage,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Updates an existing item and returns its local id.
    fn update_package(
        &self,
        ctx: &WriteContext,
        package: &RemotePackage,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn show_group(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Lookup<LocalGroup>, AppError>> + Send;

    fn create_group(
        &self,
        ctx: &WriteContext,
        group: &Map<String, Value>,
    ) -> impl Future<Output = Result<LocalGroup, AppError>> + Send;

    fn show_organization(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Lookup<LocalOrganization>, AppError>> + Send;

    fn create_organization(
        &self,
        ctx: &WriteContext,
        organization: &Map<String, Value>,
    ) -> impl Future<Output = Result<LocalOrganization, AppError>> + Send;

    fn show_user(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Lookup<LocalUser>, AppError>> + Send;
}
