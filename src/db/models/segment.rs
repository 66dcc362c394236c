//! Segment data model.
//!
//! A segment is one bounded-duration audio file. The recorder owns it while `Recording`;
//! ownership moves to the upload queue on finalize. The file is removed only once the segment
//! reaches `Uploaded`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SegmentStatus {
    Recording,
    Finalized,
    Queued,
    Uploaded,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Recording => "Recording",
            SegmentStatus::Finalized => "Finalized",
            SegmentStatus::Queued => "Queued",
            SegmentStatus::Uploaded => "Uploaded",
            SegmentStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_cap_ms: u64,
    pub duration_ms: Option<u64>,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", self.id))
    }
}
