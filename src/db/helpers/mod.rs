use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{JobStatus, Role, SegmentStatus};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_segment_status(value: &str) -> Result<SegmentStatus> {
    match value {
        "Recording" => Ok(SegmentStatus::Recording),
        "Finalized" => Ok(SegmentStatus::Finalized),
        "Queued" => Ok(SegmentStatus::Queued),
        "Uploaded" => Ok(SegmentStatus::Uploaded),
        "Failed" => Ok(SegmentStatus::Failed),
        other => Err(anyhow!("unknown segment status {other}")),
    }
}

pub fn parse_job_status(value: &str) -> Result<JobStatus> {
    match value {
        "Pending" => Ok(JobStatus::Pending),
        "Failed" => Ok(JobStatus::Failed),
        other => Err(anyhow!("unknown job status {other}")),
    }
}

pub fn parse_role(value: &str) -> Result<Role> {
    match value {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(anyhow!("unknown conversation role {other}")),
    }
}

/// Wrap a conversion failure so it can travel out of a `rusqlite` row mapper.
pub fn row_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}
