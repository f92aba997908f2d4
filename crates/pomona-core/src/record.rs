//! Sync records: one per remote item per job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage a record has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStage {
    Gathered,
    Fetched,
    Imported,
    Errored,
}

impl RecordStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStage::Gathered => "gathered",
            RecordStage::Fetched => "fetched",
            RecordStage::Imported => "imported",
            RecordStage::Errored => "errored",
        }
    }
}

impl std::str::FromStr for RecordStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gathered" => Ok(RecordStage::Gathered),
            "fetched" => Ok(RecordStage::Fetched),
            "imported" => Ok(RecordStage::Imported),
            "errored" => Ok(RecordStage::Errored),
            _ => Err(format!("invalid record stage: {}", s)),
        }
    }
}

/// Result of the import stage as shown in job reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "added")]
    Added,
    #[serde(rename = "updated")]
    Updated,
    #[serde(rename = "not modified")]
    NotModified,
    #[serde(rename = "errored")]
    Errored,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Added => "added",
            ReportStatus::Updated => "updated",
            ReportStatus::NotModified => "not modified",
            ReportStatus::Errored => "errored",
        }
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(ReportStatus::Added),
            "updated" => Ok(ReportStatus::Updated),
            "not modified" => Ok(ReportStatus::NotModified),
            "errored" => Ok(ReportStatus::Errored),
            _ => Err(format!("invalid report status: {}", s)),
        }
    }
}

/// Stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Fetch,
    Import,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Fetch => "fetch",
            ErrorStage::Import => "import",
        }
    }
}

impl std::str::FromStr for ErrorStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(ErrorStage::Fetch),
            "import" => Ok(ErrorStage::Import),
            _ => Err(format!("invalid error stage: {}", s)),
        }
    }
}

/// A diagnostic attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub stage: ErrorStage,
    /// Error class as given by [`AppError::kind`](crate::error::AppError::kind),
    /// or [`RecordError::REFERENCE`] for a dropped cross-reference.
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl RecordError {
    /// Kind of the notes left when a group or organization reference is dropped.
    pub const REFERENCE: &'static str = "reference";

    /// True if the remote item no longer existed when it was fetched.
    pub fn is_not_found(&self) -> bool {
        self.kind == "not_found"
    }
}

/// The unit of work for one remote item within one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: Uuid,
    /// Remote identifier of the item.
    pub guid: String,
    pub job_id: Uuid,
    /// Raw payload; the search summary after gather, the full item after fetch.
    pub content: Option<Vec<u8>>,
    pub stage: RecordStage,
    pub report_status: Option<ReportStatus>,
    /// Diagnostics in the order they were recorded.
    pub errors: Vec<RecordError>,
    /// True if this is the last successfully imported record for its guid.
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

impl SyncRecord {
    /// True for records that left an unresolved failure behind.
    ///
    /// Only records that were superseded or never imported count; a
    /// "not modified" outcome is a success even though the record never
    /// became current.
    pub fn is_unresolved(&self) -> bool {
        !self.current && self.report_status != Some(ReportStatus::NotModified)
    }
}

/// Data needed to create a record during gather.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub guid: String,
    pub job_id: Uuid,
    pub content: Option<Vec<u8>>,
}
