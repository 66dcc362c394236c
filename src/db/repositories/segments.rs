use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::PathBuf;

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, parse_segment_status, row_error, to_i64, to_u64},
    models::{Segment, SegmentStatus, UploadJob},
    Database,
};

use super::upload_jobs::insert_job_row;

const SEGMENT_COLUMNS: &str =
    "id, file_path, created_at, finished_at, duration_cap_ms, duration_ms, status";

fn row_to_segment(row: &Row) -> Result<Segment, rusqlite::Error> {
    let created_at: String = row.get("created_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;
    let status: String = row.get("status")?;
    let duration_cap_ms: i64 = row.get("duration_cap_ms")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(Segment {
        id: row.get("id")?,
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        created_at: parse_datetime(&created_at, "created_at").map_err(row_error)?,
        finished_at: parse_optional_datetime(finished_at, "finished_at").map_err(row_error)?,
        duration_cap_ms: to_u64(duration_cap_ms, "duration_cap_ms").map_err(row_error)?,
        duration_ms: duration_ms
            .map(|ms| to_u64(ms, "duration_ms"))
            .transpose()
            .map_err(row_error)?,
        status: parse_segment_status(&status).map_err(row_error)?,
    })
}

impl Database {
    pub async fn insert_segment(&self, segment: &Segment) -> Result<()> {
        let record = segment.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO segments (id, file_path, created_at, finished_at, duration_cap_ms, duration_ms, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.file_path.to_string_lossy(),
                    record.created_at.to_rfc3339(),
                    record.finished_at.map(|dt| dt.to_rfc3339()),
                    to_i64(record.duration_cap_ms)?,
                    record.duration_ms.map(to_i64).transpose()?,
                    record.status.as_str(),
                ],
            )
            .with_context(|| "failed to insert segment")?;
            Ok(())
        })
        .await
    }

    /// Finalize a segment and hand it to the upload queue in one transaction.
    ///
    /// Returns `false` without touching anything when the segment already has a job, so a
    /// repeated finalize (double stop, crash recovery racing a live recorder) never enqueues twice.
    pub async fn finalize_segment_and_enqueue(
        &self,
        segment_id: &str,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
        job: &UploadJob,
    ) -> Result<bool> {
        let segment_id = segment_id.to_string();
        let job = job.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM upload_jobs WHERE segment_id = ?1",
                    params![segment_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(false);
            }

            let updated = tx
                .execute(
                    "UPDATE segments
                     SET status = ?1, finished_at = ?2, duration_ms = ?3
                     WHERE id = ?4 AND status IN ('Recording', 'Finalized')",
                    params![
                        SegmentStatus::Queued.as_str(),
                        finished_at.to_rfc3339(),
                        to_i64(duration_ms)?,
                        segment_id,
                    ],
                )
                .with_context(|| "failed to finalize segment")?;
            if updated == 0 {
                return Ok(false);
            }

            insert_job_row(&tx, &job)?;
            tx.commit().context("failed to commit segment finalize")?;
            Ok(true)
        })
        .await
    }

    pub async fn get_segment(&self, segment_id: &str) -> Result<Option<Segment>> {
        let segment_id = segment_id.to_string();
        self.execute(move |conn| {
            let segment = conn
                .query_row(
                    &format!("SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = ?1"),
                    params![segment_id],
                    row_to_segment,
                )
                .optional()?;
            Ok(segment)
        })
        .await
    }

    pub async fn segments_with_status(&self, status: SegmentStatus) -> Result<Vec<Segment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments WHERE status = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![status.as_str()], row_to_segment)?;

            let mut segments = Vec::new();
            for segment in rows {
                segments.push(segment?);
            }
            Ok(segments)
        })
        .await
    }

    pub async fn mark_segment_status(&self, segment_id: &str, status: SegmentStatus) -> Result<()> {
        let segment_id = segment_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE segments SET status = ?1 WHERE id = ?2",
                params![status.as_str(), segment_id],
            )
            .with_context(|| "failed to update segment status")?;
            Ok(())
        })
        .await
    }

    /// Drop bookkeeping rows for segments uploaded before `before`. Files are already gone.
    pub async fn prune_uploaded_segments(&self, before: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM segments WHERE status = 'Uploaded' AND finished_at < ?1",
                    params![before.to_rfc3339()],
                )
                .with_context(|| "failed to prune uploaded segments")?;
            Ok(removed)
        })
        .await
    }
}
