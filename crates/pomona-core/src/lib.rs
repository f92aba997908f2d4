//! Pomona Core - domain types, the sync pipeline and its services.
//!
//! This crate holds everything about incremental catalog harvesting that does
//! not touch the network, the database or the local catalog directly:
//!
//! - **Domain models**: [`SyncJob`], [`SyncRecord`], [`RemotePackage`], etc.
//! - **Source families**: [`SourceFamily`] and [`RemoteApi`] for the remote dialects
//! - **Pipeline**: [`DatasetSearch`] (paging), [`SyncPlanner`] (incremental
//!   scope), [`Reconciler`] (cross-reference reconciliation)
//! - **Services**: [`HarvestService`] for the gather/fetch/import stages,
//!   [`WorkerService`] for queue processing
//! - **Traits**: [`ContentFetcher`], [`RecordStore`], [`LocalCatalog`],
//!   [`JobQueue`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] for decoupled logging/UI
//!
//! # Example
//!
//! ```ignore
//! use pomona_core::{HarvestService, TracingReporter};
//! use tokio_util::sync::CancellationToken;
//!
//! let harvest = HarvestService::new(job_repo, record_repo, catalog, fetcher);
//! let result = harvest
//!     .harvest_source(&source_entry, &TracingReporter, CancellationToken::new())
//!     .await?;
//! println!("{} created, {} updated", result.stats.created, result.stats.updated);
//! ```

pub mod config;
pub mod error;
pub mod family;
pub mod harvest;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod planner;
pub mod policy;
pub mod progress;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod search;
pub mod sync;
pub mod text;
pub mod traits;
pub mod worker;

// Configuration
pub use config::{
    DbConfig, HttpConfig, SourceEntry, SourcesConfig, SyncConfig, default_config_path,
    load_sources_config,
};

// Error handling
pub use error::{AppError, ValidationErrors};

// Source families
pub use family::{RemoteApi, SourceFamily};

// Domain models
pub use models::{
    Extras, GroupRef, HarvestSource, LocalGroup, LocalOrganization, LocalPackage, LocalUser,
    Lookup, PackageSummary, RemotePackage, Tag, WriteContext,
};
pub use record::{ErrorStage, NewRecord, RecordError, RecordStage, ReportStatus, SyncRecord};

// Policy
pub use policy::{ReconciliationPolicy, RemoteRefMode, SourceConfig, validate_config};

// Pipeline
pub use planner::{GatherOutcome, SearchScope, SyncPlanner};
pub use reconcile::{Placeholders, Reconciled, Reconciler};
pub use search::DatasetSearch;

// Sync statistics
pub use sync::{
    AtomicSyncStats, BatchHarvestSummary, JobResult, SourceHarvestResult, SyncOutcome, SyncStats,
};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{ContentFetcher, LocalCatalog, RecordStore};

// Services
pub use harvest::{GatherReport, HarvestService};

// Job queue types
pub use job::{CreateJobRequest, GatherError, JobStatus, SyncJob, WorkerConfig};
pub use job_queue::JobQueue;

// Worker service
pub use worker::{
    SilentWorkerReporter, TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService,
};
