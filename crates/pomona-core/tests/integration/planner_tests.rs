//! Integration tests for incremental sync planning.

use chrono::{TimeZone, Utc};
use pomona_core::planner::{CLOCK_SKEW_PAD, modified_since_clause};
use pomona_core::{
    CreateJobRequest, GatherError, HarvestService, JobQueue, JobStatus, ReconciliationPolicy,
    ReportStatus, SearchScope, SilentReporter, SourceConfig, SourceFamily, SyncJob, SyncPlanner,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::common::{
    MockCatalog, MockFetcher, MockJobQueue, MockRecordStore, SOURCE_ID, api, finished_job,
    past_record, remote_item, source, summaries,
};

fn policy(config: SourceConfig) -> ReconciliationPolicy {
    ReconciliationPolicy::from_config(&config, SourceFamily::Ckan, Vec::new())
}

async fn new_job(queue: &MockJobQueue) -> SyncJob {
    queue
        .create_job(CreateJobRequest::new(source(None)))
        .await
        .unwrap()
}

/// Test 1: Without history the whole catalog is searched.
#[tokio::test]
async fn test_first_job_is_full() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    let job = new_job(&queue).await;

    // Act
    let scope = SyncPlanner::new(&queue, &records)
        .choose_scope(&job, &policy(SourceConfig::default()))
        .await
        .unwrap();

    // Assert
    assert_eq!(scope, SearchScope::Full);
}

/// Test 2: After a clean job the window starts an hour before its gather.
#[tokio::test]
async fn test_clean_predecessor_gives_incremental_scope() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let previous = finished_job(source(None), started);
    records.insert(
        past_record(previous.id, "item-000", true, Some(ReportStatus::Added)),
        SOURCE_ID,
    );
    queue.insert(previous.clone());
    let job = new_job(&queue).await;

    // Act
    let scope = SyncPlanner::new(&queue, &records)
        .choose_scope(&job, &policy(SourceConfig::default()))
        .await
        .unwrap();

    // Assert
    assert_eq!(
        scope,
        SearchScope::Incremental {
            since: Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
            reference_job: previous.id,
        }
    );
}

/// Test 3: force_all always searches the whole catalog.
#[tokio::test]
async fn test_force_all_overrides_history() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    queue.insert(finished_job(source(None), Utc::now()));
    let job = new_job(&queue).await;
    let config = SourceConfig {
        force_all: true,
        ..SourceConfig::default()
    };

    // Act
    let scope = SyncPlanner::new(&queue, &records)
        .choose_scope(&job, &policy(config))
        .await
        .unwrap();

    // Assert
    assert_eq!(scope, SearchScope::Full);
}

/// Test 4: A job with an errored record is passed over for an older clean one.
#[tokio::test]
async fn test_unresolved_record_disqualifies_job() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();

    let older = finished_job(source(None), Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    records.insert(
        past_record(older.id, "item-000", true, Some(ReportStatus::Added)),
        SOURCE_ID,
    );
    let newer = finished_job(source(None), Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    records.insert(
        past_record(newer.id, "item-001", false, Some(ReportStatus::Errored)),
        SOURCE_ID,
    );
    queue.insert(older.clone());
    queue.insert(newer);
    let job = new_job(&queue).await;

    // Act
    let reference = SyncPlanner::new(&queue, &records)
        .last_error_free_job(&job)
        .await
        .unwrap();

    // Assert
    assert_eq!(reference.map(|j| j.id), Some(older.id));
}

/// Test 5: Gather errors and non-finished statuses disqualify a job.
#[tokio::test]
async fn test_gather_errors_disqualify_job() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();

    let mut with_errors = finished_job(source(None), Utc::now());
    with_errors.gather_errors.push(GatherError {
        message: "No datasets found at remote catalog".to_string(),
        created_at: Utc::now(),
    });
    let mut errored = finished_job(source(None), Utc::now());
    errored.status = JobStatus::Errored;
    queue.insert(with_errors);
    queue.insert(errored);
    let job = new_job(&queue).await;

    // Act
    let reference = SyncPlanner::new(&queue, &records)
        .last_error_free_job(&job)
        .await
        .unwrap();

    // Assert
    assert!(reference.is_none());
}

/// Test 6: "Not modified" records do not count as unresolved.
#[tokio::test]
async fn test_not_modified_records_keep_job_eligible() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    let previous = finished_job(source(None), Utc::now());
    records.insert(
        past_record(previous.id, "item-000", false, Some(ReportStatus::NotModified)),
        SOURCE_ID,
    );
    queue.insert(previous.clone());
    let job = new_job(&queue).await;

    // Act
    let reference = SyncPlanner::new(&queue, &records)
        .last_error_free_job(&job)
        .await
        .unwrap();

    // Assert
    assert_eq!(reference.map(|j| j.id), Some(previous.id));
}

/// Test 7: Jobs of other sources are ignored.
#[tokio::test]
async fn test_other_sources_are_ignored() {
    // Arrange
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    let mut other = source(None);
    other.id = "another-source".to_string();
    queue.insert(finished_job(other, Utc::now()));
    let job = new_job(&queue).await;

    // Act
    let reference = SyncPlanner::new(&queue, &records)
        .last_error_free_job(&job)
        .await
        .unwrap();

    // Assert
    assert!(reference.is_none());
}

// =============================================================================
// Incremental runs
// =============================================================================

struct History {
    queue: MockJobQueue,
    records: MockRecordStore,
    catalog: MockCatalog,
    fetcher: MockFetcher,
    incremental_filters: Vec<String>,
}

/// A source with one clean finished job.
fn history() -> History {
    let queue = MockJobQueue::new();
    let records = MockRecordStore::new();
    let started = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let previous = finished_job(source(None), started);
    records.insert(
        past_record(previous.id, "item-000", true, Some(ReportStatus::Added)),
        SOURCE_ID,
    );
    queue.insert(previous);

    History {
        queue,
        records,
        catalog: MockCatalog::with_source(),
        fetcher: MockFetcher::new(),
        incremental_filters: vec![modified_since_clause(started - CLOCK_SKEW_PAD)],
    }
}

impl History {
    fn service(&self) -> HarvestService<MockJobQueue, MockRecordStore, MockCatalog, MockFetcher> {
        HarvestService::new(
            self.queue.clone(),
            self.records.clone(),
            self.catalog.clone(),
            self.fetcher.clone(),
        )
    }
}

/// Test 8: An empty incremental search finishes the job with nothing to do.
#[tokio::test]
async fn test_incremental_without_changes_is_up_to_date() {
    // Arrange
    let history = history();
    history
        .fetcher
        .serve_search(&api(), &history.incremental_filters, &[]);
    let job = new_job(&history.queue).await;

    // Act
    let result = history
        .service()
        .run_job(&job, &SilentReporter, CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.stats.gathered, 0);
    assert!(history.queue.job(job.id).gather_errors.is_empty());
    assert!(history.records.for_job(job.id).is_empty());
}

/// Test 9: Only changed items are processed incrementally.
#[tokio::test]
async fn test_incremental_processes_changed_items() {
    // Arrange
    let history = history();
    history.fetcher.serve_search(
        &api(),
        &history.incremental_filters,
        &[json!({"id": "item-007", "name": "dataset-item-007"})],
    );
    history
        .fetcher
        .serve_item(&api(), remote_item("item-007", "2024-05-02T00:00:00"));
    let job = new_job(&history.queue).await;

    // Act
    let result = history
        .service()
        .run_job(&job, &SilentReporter, CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.stats.gathered, 1);
    assert_eq!(result.stats.created, 1);
    assert!(
        history.fetcher.requests()[0].contains("metadata_modified"),
        "first search is incremental"
    );
}

/// Test 10: A failing incremental search falls back to a full one.
#[tokio::test]
async fn test_incremental_failure_falls_back_to_full() {
    // Arrange
    let history = history();
    history.fetcher.fail(
        api()
            .search_url(0, pomona_core::search::PAGE_SIZE, &history.incremental_filters)
            .unwrap(),
        "HTTP 500",
    );
    history.fetcher.serve_search(&api(), &[], &summaries(3));
    let job = new_job(&history.queue).await;

    // Act
    let report = history.service().gather_stage(&job).await.unwrap();

    // Assert
    assert_eq!(report.errors, 0);
    assert_eq!(report.scope, Some(SearchScope::Full));
    assert_eq!(report.records.len(), 3);
}
