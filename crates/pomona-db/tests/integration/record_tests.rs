//! Integration tests for RecordRepository.

use pomona_core::{
    CreateJobRequest, ErrorStage, JobQueue, NewRecord, RecordStage, RecordStore, ReportStatus,
    SyncJob,
};
use pomona_db::{JobRepository, RecordRepository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::integration::common::{sample_source, setup_test_db};

async fn job_for(pool: &PgPool, source_id: &str) -> SyncJob {
    JobRepository::new(pool.clone())
        .create_job(CreateJobRequest::new(sample_source(source_id)))
        .await
        .expect("create job should succeed")
}

fn new_record(job: &SyncJob, guid: &str) -> NewRecord {
    NewRecord {
        guid: guid.to_string(),
        job_id: job.id,
        content: Some(format!(r#"{{"id": "{}"}}"#, guid).into_bytes()),
    }
}

/// Test 1: Records are created in stage gathered with their summary content.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_and_get_record() {
    let (pool, _container) = setup_test_db().await;
    let job = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool);

    let created = repo
        .create_record(new_record(&job, "item-1"))
        .await
        .expect("create should succeed");

    let record = repo
        .get_record(created.id)
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(record.guid, "item-1");
    assert_eq!(record.job_id, job.id);
    assert_eq!(record.stage, RecordStage::Gathered);
    assert_eq!(record.content.as_deref(), Some(br#"{"id": "item-1"}"#.as_slice()));
    assert!(!record.current);
    assert!(record.report_status.is_none());
}

/// Test 2: A record for an unknown job is rejected.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_record_for_missing_job_fails() {
    let (pool, _container) = setup_test_db().await;
    let repo = RecordRepository::new(pool);

    let result = repo
        .create_record(NewRecord {
            guid: "item-1".to_string(),
            job_id: Uuid::new_v4(),
            content: None,
        })
        .await;

    assert!(result.is_err());
}

/// Test 3: Content, stage and errors are updated in place.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_record_updates_and_errors() {
    let (pool, _container) = setup_test_db().await;
    let job = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool);
    let record = repo.create_record(new_record(&job, "item-1")).await.unwrap();

    repo.save_content(record.id, b"full payload").await.unwrap();
    repo.set_stage(record.id, RecordStage::Fetched).await.unwrap();
    repo.save_error(record.id, ErrorStage::Import, "validation", "first problem")
        .await
        .unwrap();
    repo.save_error(record.id, ErrorStage::Import, "reference", "second problem")
        .await
        .unwrap();
    repo.set_report_status(record.id, ReportStatus::Errored)
        .await
        .unwrap();

    let record = repo.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(record.content.as_deref(), Some(b"full payload".as_slice()));
    assert_eq!(record.stage, RecordStage::Fetched);
    assert_eq!(record.report_status, Some(ReportStatus::Errored));
    let messages: Vec<&str> = record.errors.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["first problem", "second problem"]);
    assert!(record.errors.iter().all(|e| e.stage == ErrorStage::Import));
    let kinds: Vec<&str> = record.errors.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["validation", "reference"]);
    assert!(record.is_unresolved());
}

/// Test 4: records_for_job returns only that job's records, in creation order.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_records_for_job_in_creation_order() {
    let (pool, _container) = setup_test_db().await;
    let job = job_for(&pool, "odh").await;
    let other = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool);

    for guid in ["c", "a", "b"] {
        repo.create_record(new_record(&job, guid)).await.unwrap();
    }
    repo.create_record(new_record(&other, "z")).await.unwrap();

    let records = repo.records_for_job(job.id).await.unwrap();
    let guids: Vec<&str> = records.iter().map(|r| r.guid.as_str()).collect();
    assert_eq!(guids, vec!["c", "a", "b"]);
}

/// Test 5: Importing a newer record supersedes the previous current one.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mark_imported_swaps_current() {
    let (pool, _container) = setup_test_db().await;
    let first_job = job_for(&pool, "odh").await;
    let second_job = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool);

    let old = repo
        .create_record(new_record(&first_job, "item-1"))
        .await
        .unwrap();
    repo.mark_imported(old.id, "odh", ReportStatus::Added)
        .await
        .unwrap();

    let new = repo
        .create_record(new_record(&second_job, "item-1"))
        .await
        .unwrap();
    repo.mark_imported(new.id, "odh", ReportStatus::Updated)
        .await
        .unwrap();

    let old = repo.get_record(old.id).await.unwrap().unwrap();
    let new = repo.get_record(new.id).await.unwrap().unwrap();
    assert!(!old.current);
    assert_eq!(old.report_status, Some(ReportStatus::Added));
    assert!(new.current);
    assert_eq!(new.stage, RecordStage::Imported);
    assert_eq!(new.report_status, Some(ReportStatus::Updated));
}

/// Test 6: The same guid may be current once per source.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_current_is_scoped_per_source() {
    let (pool, _container) = setup_test_db().await;
    let odh_job = job_for(&pool, "odh").await;
    let other_job = job_for(&pool, "other").await;
    let repo = RecordRepository::new(pool);

    let odh = repo
        .create_record(new_record(&odh_job, "item-1"))
        .await
        .unwrap();
    let other = repo
        .create_record(new_record(&other_job, "item-1"))
        .await
        .unwrap();
    repo.mark_imported(odh.id, "odh", ReportStatus::Added)
        .await
        .unwrap();
    repo.mark_imported(other.id, "other", ReportStatus::Added)
        .await
        .unwrap();

    assert!(repo.get_record(odh.id).await.unwrap().unwrap().current);
    assert!(repo.get_record(other.id).await.unwrap().unwrap().current);
}

/// Test 7: The partial unique index rejects a second current record.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unique_current_index() {
    let (pool, _container) = setup_test_db().await;
    let first_job = job_for(&pool, "odh").await;
    let second_job = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool.clone());

    let first = repo
        .create_record(new_record(&first_job, "item-1"))
        .await
        .unwrap();
    let second = repo
        .create_record(new_record(&second_job, "item-1"))
        .await
        .unwrap();
    repo.mark_imported(first.id, "odh", ReportStatus::Added)
        .await
        .unwrap();

    let result = sqlx::query("UPDATE harvest_records SET current = TRUE WHERE id = $1")
        .bind(second.id)
        .execute(&pool)
        .await;

    assert!(result.is_err(), "index must reject a second current record");
}

/// Test 8: A vanished remote item is stored as a not-found error.
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_not_found_error_kind_round_trips() {
    let (pool, _container) = setup_test_db().await;
    let job = job_for(&pool, "odh").await;
    let repo = RecordRepository::new(pool);
    let record = repo.create_record(new_record(&job, "item-1")).await.unwrap();

    repo.save_error(
        record.id,
        ErrorStage::Fetch,
        "not_found",
        "Remote item item-1 no longer exists",
    )
    .await
    .unwrap();

    let record = repo.get_record(record.id).await.unwrap().unwrap();
    assert_eq!(record.errors.len(), 1);
    assert!(record.errors[0].is_not_found());
    assert_eq!(record.errors[0].stage, ErrorStage::Fetch);
}
