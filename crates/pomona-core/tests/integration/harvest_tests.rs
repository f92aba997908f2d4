//! Integration tests for HarvestService.
//!
//! These tests run whole jobs through the gather, fetch and import stages
//! against the mocks in `common`.

use std::time::Duration;

use pomona_core::{
    CreateJobRequest, ErrorStage, GroupRef, HarvestService, JobQueue, JobStatus, RecordError,
    RecordStage, RemoteApi, ReportStatus, SearchScope, SilentReporter, SilentWorkerReporter, SourceEntry,
    SourceFamily, SyncJob, ValidationErrors, WorkerConfig, WorkerService,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::common::{
    MockCatalog, MockFetcher, MockJobQueue, MockRecordStore, SOURCE_ORG, SOURCE_TITLE, SOURCE_URL,
    api, remote_item, source, summaries,
};

type Service = HarvestService<MockJobQueue, MockRecordStore, MockCatalog, MockFetcher>;

struct Harness {
    queue: MockJobQueue,
    records: MockRecordStore,
    catalog: MockCatalog,
    fetcher: MockFetcher,
    service: Service,
}

impl Harness {
    fn new() -> Self {
        Self::with_catalog(MockCatalog::with_source())
    }

    fn with_catalog(catalog: MockCatalog) -> Self {
        let queue = MockJobQueue::new();
        let records = MockRecordStore::new();
        let fetcher = MockFetcher::new();
        let service = HarvestService::new(
            queue.clone(),
            records.clone(),
            catalog.clone(),
            fetcher.clone(),
        );
        Self {
            queue,
            records,
            catalog,
            fetcher,
            service,
        }
    }

    async fn job(&self, config: Option<Value>) -> SyncJob {
        self.queue
            .create_job(CreateJobRequest::new(source(config)))
            .await
            .unwrap()
    }

    /// Serves a full search over `items` plus each item's `package_show`.
    fn serve(&self, items: &[Value]) {
        let summaries: Vec<Value> = items
            .iter()
            .map(|item| json!({"id": item["id"], "name": item["name"]}))
            .collect();
        self.fetcher.serve_search(&api(), &[], &summaries);
        for item in items {
            self.fetcher.serve_item(&api(), item.clone());
        }
    }

    async fn run(&self, job: &SyncJob) -> pomona_core::JobResult {
        self.service
            .run_job(job, &SilentReporter, CancellationToken::new())
            .await
            .unwrap()
    }
}

fn diagnostics(harness: &Harness, guid: &str) -> Vec<String> {
    harness
        .records
        .for_guid(guid)
        .iter()
        .flat_map(|r| r.errors.iter().map(|e| e.message.clone()))
        .collect()
}

// =============================================================================
// Gather
// =============================================================================

/// Test 1: Two search pages produce one record per remote item.
#[tokio::test]
async fn test_gather_pages_through_search_results() {
    // Arrange
    let harness = Harness::new();
    harness.fetcher.serve_search(&api(), &[], &summaries(150));
    let job = harness.job(None).await;

    // Act
    let report = harness.service.gather_stage(&job).await.unwrap();

    // Assert
    assert_eq!(report.records.len(), 150, "one record per remote item");
    assert_eq!(report.errors, 0);
    assert_eq!(report.scope, Some(SearchScope::Full));
    assert_eq!(harness.fetcher.requests().len(), 3, "two pages plus the empty one");

    let first = &report.records[0];
    assert_eq!(first.guid, "item-000");
    assert_eq!(first.stage, RecordStage::Gathered);
    let content: Value = serde_json::from_slice(first.content.as_deref().unwrap()).unwrap();
    assert_eq!(content["name"], "dataset-000", "summary is stored as content");
}

/// Test 2: An empty full search is a gather error.
#[tokio::test]
async fn test_empty_full_search_errors_the_job() {
    // Arrange
    let harness = Harness::new();
    harness.fetcher.serve_search(&api(), &[], &[]);
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Errored);
    let job = harness.queue.job(job.id);
    assert_eq!(job.gather_errors.len(), 1);
    assert_eq!(
        job.gather_errors[0].message,
        format!("No datasets found at remote catalog: {}", SOURCE_URL)
    );
    assert!(harness.records.all().is_empty());
}

/// Test 3: A search that cannot be fetched is a gather error naming the terms.
#[tokio::test]
async fn test_search_failure_errors_the_job() {
    // Arrange
    let harness = Harness::new();
    let job = harness
        .job(Some(json!({"organizations_filter_include": ["a", "b"]})))
        .await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Errored);
    let message = &harness.queue.job(job.id).gather_errors[0].message;
    assert!(
        message.starts_with("Unable to search remote catalog for datasets:"),
        "unexpected message: {}",
        message
    );
    assert!(message.contains("organization:a OR organization:b"));
}

/// Test 4: Org filter clauses reach the search URL.
#[tokio::test]
async fn test_exclude_filter_is_sent_with_search() {
    // Arrange
    let harness = Harness::new();
    let filters = vec!["-organization:x".to_string(), "-organization:y".to_string()];
    harness
        .fetcher
        .serve_search(&api(), &filters, &summaries(2));
    let job = harness
        .job(Some(json!({"organizations_filter_exclude": ["x", "y"]})))
        .await;

    // Act
    let report = harness.service.gather_stage(&job).await.unwrap();

    // Assert
    assert_eq!(report.records.len(), 2);
    assert!(
        harness.fetcher.requests()[0].contains("fq=-organization%3Ax+-organization%3Ay"),
        "unexpected request: {}",
        harness.fetcher.requests()[0]
    );
}

/// Test 5: A broken configuration blob errors the job without searching.
#[tokio::test]
async fn test_invalid_config_errors_the_job() {
    // Arrange
    let harness = Harness::new();
    let job = harness
        .job(Some(json!({
            "organizations_filter_include": ["a"],
            "organizations_filter_exclude": ["b"]
        })))
        .await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Errored);
    let message = &harness.queue.job(job.id).gather_errors[0].message;
    assert!(message.starts_with("Invalid source configuration:"));
    assert!(harness.fetcher.requests().is_empty(), "no search was issued");
}

/// Test 6: A default group missing locally is a configuration error.
#[tokio::test]
async fn test_missing_default_group_errors_the_job() {
    // Arrange
    let harness = Harness::new();
    let job = harness
        .job(Some(json!({"default_groups": ["nowhere"]})))
        .await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Errored);
    let message = &harness.queue.job(job.id).gather_errors[0].message;
    assert!(message.contains("Default group not found: nowhere"), "{}", message);
}

// =============================================================================
// Fetch and import
// =============================================================================

/// Test 7: A vanished remote item fails its record only.
#[tokio::test]
async fn test_fetch_not_found_is_isolated_to_its_record() {
    // Arrange
    let harness = Harness::new();
    let good = remote_item("item-000", "2024-01-01T00:00:00");
    let gone = remote_item("item-001", "2024-01-01T00:00:00");
    harness.serve(&[good, gone]);
    harness
        .fetcher
        .not_found(api().package_url("item-001").unwrap());
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.stats.gathered, 2);
    assert_eq!(result.stats.created, 1);
    assert_eq!(result.stats.failed, 1);

    let failed = &harness.records.for_guid("item-001")[0];
    assert_eq!(failed.stage, RecordStage::Errored);
    assert_eq!(failed.report_status, Some(ReportStatus::Errored));
    assert_eq!(failed.errors[0].stage, ErrorStage::Fetch);
    assert_eq!(failed.errors[0].kind, "not_found");
    assert!(failed.errors[0].is_not_found());
    assert!(!failed.current);

    let imported = &harness.records.for_guid("item-000")[0];
    assert!(imported.current, "sibling record was imported");
    assert_eq!(imported.report_status, Some(ReportStatus::Added));
}

/// Test 8: Other fetch failures name the URL.
#[tokio::test]
async fn test_fetch_failure_names_url() {
    // Arrange
    let harness = Harness::new();
    harness
        .fetcher
        .serve_search(&api(), &[], &summaries(1));
    let url = api().package_url("item-000").unwrap();
    harness.fetcher.fail(url.clone(), "HTTP 500");
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.failed, 1);
    let record = &harness.records.for_guid("item-000")[0];
    assert_eq!(record.errors[0].kind, "fetch");
    assert!(!record.errors[0].is_not_found());
    assert_eq!(
        record.errors[0].message,
        format!("Unable to get content for package: {}: Fetch error: HTTP 500", url)
    );
}

/// Test 9: Imported items are normalized and defaulted before writing.
#[tokio::test]
async fn test_import_rewrites_payload() {
    // Arrange
    let harness = Harness::new();
    harness.catalog.add_group("g-env", "environment");
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let job = harness
        .job(Some(json!({
            "default_tags": [{"name": "Open Data"}],
            "default_groups": ["environment"],
            "default_extras": {
                "harvested_from": "{harvest_source_title}",
                "landing": "{harvest_source_url}/dataset/{dataset_id}"
            }
        })))
        .await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.created, 1);
    let written = harness.catalog.written("item-000").unwrap();

    let tags: Vec<&str> = written.tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tags, vec!["water-quality", "open-data"]);

    assert_eq!(written.groups, vec![GroupRef::object("g-env", "environment")]);

    let extras = written.extras.unwrap();
    assert_eq!(extras.get("harvested_from"), Some(&json!(SOURCE_TITLE)));
    assert_eq!(
        extras.get("landing"),
        Some(&json!("https://remote.example.org/dataset/item-000"))
    );

    assert_eq!(written.owner_org.as_deref(), Some(SOURCE_ORG));
    assert!(!written.resources[0].contains_key("url_type"));
    assert!(!written.resources[0].contains_key("revision_id"));
    assert_eq!(written.resources[0]["format"], "CSV");
}

/// Test 10: A remote group that cannot be copied is dropped, the import goes on.
#[tokio::test]
async fn test_failed_remote_group_copy_drops_reference() {
    // Arrange
    let harness = Harness::new();
    let mut item = remote_item("item-000", "2024-01-01T00:00:00");
    item["groups"] = json!([{"name": "hydrology"}]);
    harness.serve(&[item]);
    let job = harness.job(Some(json!({"remote_groups": "create"}))).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.created, 1, "import still succeeds");
    assert!(harness.catalog.written("item-000").unwrap().groups.is_empty());
    assert!(harness.catalog.created_groups().is_empty());

    let notes = diagnostics(&harness, "item-000");
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("Could not get remote group hydrology"));
    let record = &harness.records.for_guid("item-000")[0];
    assert_eq!(record.errors[0].kind, RecordError::REFERENCE);

    let record = &harness.records.for_guid("item-000")[0];
    assert!(record.current);
    assert_eq!(record.stage, RecordStage::Imported);
}

/// Test 11: A missing remote group is copied locally when allowed.
#[tokio::test]
async fn test_remote_group_is_copied() {
    // Arrange
    let harness = Harness::new();
    let mut item = remote_item("item-000", "2024-01-01T00:00:00");
    item["groups"] = json!([{"name": "hydrology"}]);
    harness.serve(&[item]);
    harness.fetcher.respond(
        api().group_url("hydrology").unwrap(),
        json!({"success": true, "result": {
            "id": "g-hydro",
            "name": "hydrology",
            "title": "Hydrology",
            "display_name": "Hydrology",
            "packages": [{"id": "item-000"}],
            "users": [{"name": "admin"}],
            "created": "2020-01-01"
        }}),
    );
    let job = harness.job(Some(json!({"remote_groups": "create"}))).await;

    // Act
    harness.run(&job).await;

    // Assert
    let created = harness.catalog.created_groups();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["title"], "Hydrology");
    for field in ["packages", "users", "created", "display_name"] {
        assert!(!created[0].contains_key(field), "{} was not stripped", field);
    }
    assert_eq!(
        harness.catalog.written("item-000").unwrap().groups,
        vec![GroupRef::object("g-hydro", "hydrology")]
    );
}

/// Test 12: With only_local, unknown groups are dropped with a diagnostic.
#[tokio::test]
async fn test_only_local_groups() {
    // Arrange
    let harness = Harness::new();
    harness.catalog.add_group("g-env", "environment");
    let mut item = remote_item("item-000", "2024-01-01T00:00:00");
    item["groups"] = json!([{"name": "environment"}, {"name": "unknown"}]);
    harness.serve(&[item]);
    let job = harness.job(Some(json!({"remote_groups": "only_local"}))).await;

    // Act
    harness.run(&job).await;

    // Assert
    assert_eq!(
        harness.catalog.written("item-000").unwrap().groups,
        vec![GroupRef::object("g-env", "environment")]
    );
    assert_eq!(
        diagnostics(&harness, "item-000"),
        vec!["Group unknown is not available locally".to_string()]
    );
}

/// Test 13: A missing remote organization is copied through the group endpoint.
#[tokio::test]
async fn test_remote_org_copied_through_group_endpoint() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    harness
        .fetcher
        .not_found(api().organization_url("remote-org").unwrap());
    harness.fetcher.respond(
        api().group_url("remote-org").unwrap(),
        json!({"success": true, "result": {
            "id": "remote-org",
            "name": "remote-org",
            "title": "Remote Org",
            "type": "organization",
            "users": []
        }}),
    );
    let job = harness.job(Some(json!({"remote_orgs": "create"}))).await;

    // Act
    harness.run(&job).await;

    // Assert
    let created = harness.catalog.created_organizations();
    assert_eq!(created.len(), 1);
    assert!(!created[0].contains_key("type"));
    assert!(!created[0].contains_key("users"));
    assert_eq!(
        harness.catalog.written("item-000").unwrap().owner_org.as_deref(),
        Some("remote-org")
    );
}

/// Test 14: An unknown organization falls back to the source's organization.
#[tokio::test]
async fn test_only_local_org_falls_back_to_source_org() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let job = harness.job(Some(json!({"remote_orgs": "only_local"}))).await;

    // Act
    harness.run(&job).await;

    // Assert
    assert_eq!(
        harness.catalog.written("item-000").unwrap().owner_org.as_deref(),
        Some(SOURCE_ORG)
    );
    assert_eq!(
        diagnostics(&harness, "item-000"),
        vec!["Organization remote-org is not available locally".to_string()]
    );
}

/// Test 15: Importing the same item twice writes it once.
#[tokio::test]
async fn test_reimport_of_unchanged_item_is_not_modified() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let config = json!({"force_all": true});

    // Act
    let first = harness.run(&harness.job(Some(config.clone())).await).await;
    let second = harness.run(&harness.job(Some(config)).await).await;

    // Assert
    assert_eq!(first.stats.created, 1);
    assert_eq!(second.stats.not_modified, 1);
    assert_eq!(harness.catalog.writes(), 1, "second run wrote nothing");

    let records = harness.records.for_guid("item-000");
    assert_eq!(records.len(), 2);
    assert!(records[0].current, "first import stays current");
    assert!(!records[1].current);
    assert_eq!(records[1].report_status, Some(ReportStatus::NotModified));
    assert_eq!(records[1].stage, RecordStage::Imported);
}

/// Test 16: A changed item is updated and its new record becomes current.
#[tokio::test]
async fn test_changed_item_is_updated() {
    // Arrange
    let harness = Harness::new();
    let config = json!({"force_all": true});
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    harness.run(&harness.job(Some(config.clone())).await).await;
    harness.serve(&[remote_item("item-000", "2024-02-01T00:00:00")]);

    // Act
    let second = harness.run(&harness.job(Some(config)).await).await;

    // Assert
    assert_eq!(second.stats.updated, 1);
    assert_eq!(harness.catalog.writes(), 2);

    let records = harness.records.for_guid("item-000");
    let current: Vec<_> = records.iter().filter(|r| r.current).collect();
    assert_eq!(current.len(), 1, "exactly one current record");
    assert_eq!(current[0].id, records[1].id);
    assert_eq!(records[1].report_status, Some(ReportStatus::Updated));
}

/// Test 17: Remote harvest source objects are skipped.
#[tokio::test]
async fn test_harvest_source_items_are_skipped() {
    // Arrange
    let harness = Harness::new();
    let mut item = remote_item("item-000", "2024-01-01T00:00:00");
    item["type"] = json!("harvest");
    harness.serve(&[item]);
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.skipped, 1);
    assert_eq!(harness.catalog.writes(), 0);
    let record = &harness.records.for_guid("item-000")[0];
    assert_eq!(record.report_status, Some(ReportStatus::NotModified));
    assert_eq!(record.stage, RecordStage::Imported);
}

/// Test 18: Catalog validation errors are attached to the record.
#[tokio::test]
async fn test_validation_error_is_reported() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    harness.catalog.reject(
        "item-000",
        ValidationErrors::new().with("name", "That URL is already in use."),
    );
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.stats.failed, 1);
    let record = &harness.records.for_guid("item-000")[0];
    assert_eq!(record.stage, RecordStage::Errored);
    assert_eq!(record.errors[0].stage, ErrorStage::Import);
    assert_eq!(record.errors[0].kind, "validation");
    assert_eq!(
        record.errors[0].message,
        "Invalid package with GUID item-000: name: That URL is already in use."
    );
    assert!(result.has_failures());
}

/// Test 19: The configured API key goes out with every request.
#[tokio::test]
async fn test_api_key_is_sent() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    harness.catalog.add_user("harvest");
    let job = harness
        .job(Some(json!({"api_key": "secret-key", "user": "harvest"})))
        .await;

    // Act
    harness.run(&job).await;

    // Assert
    let credentials = harness.fetcher.credentials();
    assert!(!credentials.is_empty());
    assert!(
        credentials
            .iter()
            .all(|c| c.as_deref() == Some("secret-key"))
    );
    assert_eq!(
        harness.catalog.contexts()[0].user.as_deref(),
        Some("harvest"),
        "write is attributed to the configured user"
    );
}

/// Test 20: REST-dialect sources use bare group ids and encoded extras.
#[tokio::test]
async fn test_spod_source_dialect() {
    // Arrange
    let harness = Harness::new();
    harness.catalog.add_group("g-env", "environment");
    let spod = RemoteApi::new(SourceFamily::Spod, SOURCE_URL, 2).unwrap();
    harness.fetcher.serve_search(
        &spod,
        &[],
        &[json!({"id": "item-000", "name": "dataset-000"})],
    );
    harness.fetcher.respond(
        spod.package_url("item-000").unwrap(),
        json!({
            "id": "item-000",
            "name": "dataset-000",
            "metadata_modified": "2024-01-01T00:00:00",
            "tags": ["Air Quality"],
            "groups": ["environment"],
            "extras": {"rows": 3, "source": "sensor"}
        }),
    );
    let mut source = source(Some(json!({"remote_groups": "only_local"})));
    source.family = SourceFamily::Spod;
    let job = harness
        .queue
        .create_job(CreateJobRequest::new(source))
        .await
        .unwrap();

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.created, 1);
    let written = harness.catalog.written("item-000").unwrap();
    assert_eq!(written.groups, vec![GroupRef::Name("g-env".to_string())]);
    assert_eq!(written.tags[0].name, "air-quality");
    let extras = written.extras.unwrap();
    assert_eq!(extras.get("rows"), Some(&json!("3")));
    assert_eq!(extras.get("source"), Some(&json!("sensor")));
}

// =============================================================================
// Concurrent imports
// =============================================================================

/// Test 21: Records sharing a missing remote group all end up in it.
#[tokio::test]
async fn test_concurrent_records_share_copied_group() {
    // Arrange
    let harness = Harness::with_catalog(MockCatalog::with_source().interleaved());
    let items: Vec<Value> = (0..4)
        .map(|i| {
            let mut item = remote_item(&format!("item-{:03}", i), "2024-01-01T00:00:00");
            item["groups"] = json!([{"name": "hydrology"}]);
            item
        })
        .collect();
    harness.serve(&items);
    harness.fetcher.respond(
        api().group_url("hydrology").unwrap(),
        json!({"success": true, "result": {"id": "g-hydro", "name": "hydrology"}}),
    );
    let job = harness.job(Some(json!({"remote_groups": "create"}))).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.stats.created, 4);
    assert_eq!(result.stats.failed, 0);
    assert_eq!(harness.catalog.created_groups().len(), 1, "created once");
    for item in &items {
        let id = item["id"].as_str().unwrap();
        assert_eq!(
            harness.catalog.written(id).unwrap().groups,
            vec![GroupRef::object("g-hydro", "hydrology")],
            "{} lost its group",
            id
        );
        assert!(diagnostics(&harness, id).is_empty(), "{} has diagnostics", id);
    }
}

/// Test 22: Records sharing a missing remote organization all end up owned by it.
#[tokio::test]
async fn test_concurrent_records_share_copied_organization() {
    // Arrange
    let harness = Harness::with_catalog(MockCatalog::with_source().interleaved());
    let items: Vec<Value> = (0..4)
        .map(|i| remote_item(&format!("item-{:03}", i), "2024-01-01T00:00:00"))
        .collect();
    harness.serve(&items);
    harness.fetcher.respond(
        api().organization_url("remote-org").unwrap(),
        json!({"success": true, "result": {
            "id": "remote-org",
            "name": "remote-org",
            "title": "Remote Org"
        }}),
    );
    let job = harness.job(Some(json!({"remote_orgs": "create"}))).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.stats.created, 4);
    assert_eq!(harness.catalog.created_organizations().len(), 1);
    for item in &items {
        let id = item["id"].as_str().unwrap();
        assert_eq!(
            harness.catalog.written(id).unwrap().owner_org.as_deref(),
            Some("remote-org")
        );
        assert!(diagnostics(&harness, id).is_empty(), "{} has diagnostics", id);
    }
}

/// Test 23: A record that cannot become current is errored, not silently dropped.
#[tokio::test]
async fn test_current_conflict_is_attached_to_record() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[
        remote_item("item-000", "2024-01-01T00:00:00"),
        remote_item("item-001", "2024-01-01T00:00:00"),
    ]);
    harness.records.conflict_on("item-001");
    let job = harness.job(None).await;

    // Act
    let result = harness.run(&job).await;

    // Assert
    assert_eq!(result.status, JobStatus::Finished);
    assert_eq!(result.stats.created, 1);
    assert_eq!(result.stats.failed, 1);

    let record = &harness.records.for_guid("item-001")[0];
    assert!(!record.current);
    assert!(record.is_unresolved());
    assert_eq!(record.stage, RecordStage::Errored);
    assert_eq!(record.report_status, Some(ReportStatus::Errored));
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].stage, ErrorStage::Import);
    assert_eq!(record.errors[0].kind, "generic");
    assert!(
        record.errors[0]
            .message
            .starts_with("Could not mark record item-001 as current:")
    );
}

// =============================================================================
// Cancellation, batches and the worker
// =============================================================================

/// Test 24: A job cancelled before it starts does no work.
#[tokio::test]
async fn test_cancelled_job_does_nothing() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let job = harness.job(None).await;
    let token = CancellationToken::new();
    token.cancel();

    // Act
    let result = harness
        .service
        .run_job(&job, &SilentReporter, token)
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, JobStatus::Cancelled);
    assert!(result.is_cancelled());
    assert!(harness.fetcher.requests().is_empty());
    assert_eq!(harness.queue.job(job.id).status, JobStatus::Cancelled);
}

/// Test 25: A batch harvests every source and summarizes the results.
#[tokio::test]
async fn test_batch_harvest_summary() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[
        remote_item("item-000", "2024-01-01T00:00:00"),
        remote_item("item-001", "2024-01-01T00:00:00"),
    ]);
    let entry: SourceEntry = toml::from_str(&format!(
        r#"
id = "harvest-odh"
name = "odh"
url = "{}"
title = "{}"
"#,
        SOURCE_URL, SOURCE_TITLE
    ))
    .unwrap();

    // Act
    let summary = harness.service.batch_harvest(&[&entry]).await;

    // Assert
    assert_eq!(summary.successful_count(), 1);
    assert_eq!(summary.failed_count(), 0);
    assert_eq!(summary.total_imported(), 2);
}

/// Test 26: The worker claims a queued job, runs it and stops on cancel.
#[tokio::test]
async fn test_worker_processes_queued_job() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let job = harness.job(None).await;
    let worker = WorkerService::new(
        harness.queue.clone(),
        harness.service.clone(),
        WorkerConfig::default()
            .with_worker_id("worker-1")
            .with_poll_interval(Duration::from_millis(10)),
    );
    let token = CancellationToken::new();

    // Act
    let stop = async {
        while !harness.queue.job(job.id).status.is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
    };
    let (run, _) = tokio::join!(
        worker.run(token.clone(), &SilentWorkerReporter, &SilentReporter),
        stop
    );

    // Assert
    run.unwrap();
    let job = harness.queue.job(job.id);
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(job.stats.unwrap().created, 1);
}

/// Test 27: A single job can be run by id.
#[tokio::test]
async fn test_worker_process_single_job() {
    // Arrange
    let harness = Harness::new();
    harness.serve(&[remote_item("item-000", "2024-01-01T00:00:00")]);
    let job = harness.job(None).await;
    let worker = WorkerService::new(
        harness.queue.clone(),
        harness.service.clone(),
        WorkerConfig::default(),
    );

    // Act
    worker
        .process_single_job(
            job.id,
            CancellationToken::new(),
            &SilentWorkerReporter,
            &SilentReporter,
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(harness.queue.job(job.id).status, JobStatus::Finished);
    assert_eq!(harness.catalog.writes(), 1);
}
