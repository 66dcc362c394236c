use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Completed jobs are deleted, so a stored job is only ever pending or failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Failed => "Failed",
        }
    }
}

/// What an upload job points at. Segment-backed jobs also drive the segment's status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum UploadSource {
    Segment { segment_id: String, path: PathBuf },
    File { path: PathBuf },
}

impl UploadSource {
    pub fn path(&self) -> &PathBuf {
        match self {
            UploadSource::Segment { path, .. } | UploadSource::File { path } => path,
        }
    }

    pub fn segment_id(&self) -> Option<&str> {
        match self {
            UploadSource::Segment { segment_id, .. } => Some(segment_id),
            UploadSource::File { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: String,
    pub source: UploadSource,
    pub destination_key: String,
    /// Keys are unique by construction; downstream must not rely on ordering.
    pub metadata: HashMap<String, String>,
    pub attempt_count: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the local source file should be removed after a confirmed upload.
    pub delete_source_on_success: bool,
}

impl UploadJob {
    pub fn new(
        source: UploadSource,
        destination_key: impl Into<String>,
        metadata: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            destination_key: destination_key.into(),
            metadata,
            attempt_count: 0,
            next_eligible_at: now,
            status: JobStatus::Pending,
            last_error: None,
            created_at: now,
            delete_source_on_success: true,
        }
    }

    /// Destination "folder" of the key. Jobs sharing one drain sequentially.
    pub fn destination_group(&self) -> &str {
        self.destination_key
            .rsplit_once('/')
            .map(|(folder, _)| folder)
            .unwrap_or("")
    }
}
