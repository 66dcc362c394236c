use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::db::{
    helpers::{parse_datetime, parse_job_status, row_error, to_u32},
    models::{JobStatus, SegmentStatus, UploadJob, UploadSource},
    Database,
};

const JOB_COLUMNS: &str = "id, segment_id, source_path, destination_key, metadata, attempt_count,
     next_eligible_at, status, last_error, delete_source, created_at";

/// A job whose lease is held by one drain attempt.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: UploadJob,
    pub lease_owner: String,
}

/// Where a failed attempt left the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retry {
        attempt_count: u32,
        next_eligible_at: DateTime<Utc>,
    },
    Terminal {
        attempt_count: u32,
    },
    /// The lease was lost (expired and reclaimed); nothing was written.
    LeaseLost,
}

fn row_to_job(row: &Row) -> Result<UploadJob, rusqlite::Error> {
    let segment_id: Option<String> = row.get("segment_id")?;
    let path = PathBuf::from(row.get::<_, String>("source_path")?);
    let metadata_raw: String = row.get("metadata")?;
    let attempt_count: i64 = row.get("attempt_count")?;
    let next_eligible_at: String = row.get("next_eligible_at")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let delete_source: i64 = row.get("delete_source")?;

    let source = match segment_id {
        Some(segment_id) => UploadSource::Segment { segment_id, path },
        None => UploadSource::File { path },
    };
    let metadata: HashMap<String, String> = serde_json::from_str(&metadata_raw)
        .map_err(|err| row_error(anyhow::Error::new(err).context("invalid job metadata")))?;

    Ok(UploadJob {
        id: row.get("id")?,
        source,
        destination_key: row.get("destination_key")?,
        metadata,
        attempt_count: to_u32(attempt_count, "attempt_count").map_err(row_error)?,
        next_eligible_at: parse_datetime(&next_eligible_at, "next_eligible_at")
            .map_err(row_error)?,
        status: parse_job_status(&status).map_err(row_error)?,
        last_error: row.get("last_error")?,
        created_at: parse_datetime(&created_at, "created_at").map_err(row_error)?,
        delete_source_on_success: delete_source != 0,
    })
}

pub(crate) fn insert_job_row(tx: &Transaction<'_>, job: &UploadJob) -> Result<()> {
    let metadata = serde_json::to_string(&job.metadata).context("failed to encode job metadata")?;
    tx.execute(
        "INSERT INTO upload_jobs (
            id, segment_id, source_path, destination_key, metadata, attempt_count,
            next_eligible_at, status, last_error, delete_source, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            job.id,
            job.source.segment_id(),
            job.source.path().to_string_lossy(),
            job.destination_key,
            metadata,
            job.attempt_count,
            job.next_eligible_at.to_rfc3339(),
            job.status.as_str(),
            job.last_error,
            job.delete_source_on_success as i64,
            job.created_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to insert upload job {}", job.id))?;
    Ok(())
}

fn set_segment_status(tx: &Transaction<'_>, job_id: &str, status: SegmentStatus) -> Result<()> {
    tx.execute(
        "UPDATE segments SET status = ?1
         WHERE id = (SELECT segment_id FROM upload_jobs WHERE id = ?2)",
        params![status.as_str(), job_id],
    )?;
    Ok(())
}

impl Database {
    pub async fn insert_upload_job(&self, job: &UploadJob) -> Result<()> {
        let job = job.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            insert_job_row(&tx, &job)?;
            tx.commit().context("failed to commit upload job")?;
            Ok(())
        })
        .await
    }

    /// Lease up to `limit` pending jobs that are eligible at `now` and not leased by anyone else.
    pub async fn claim_eligible_jobs(
        &self,
        now: DateTime<Utc>,
        lease_owner: &str,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimedJob>> {
        let lease_owner = lease_owner.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let now_str = now.to_rfc3339();

            let candidates = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM upload_jobs
                     WHERE status = 'Pending'
                       AND next_eligible_at <= ?1
                       AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
                     ORDER BY next_eligible_at ASC, created_at ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![now_str, limit as i64], row_to_job)?;
                let mut jobs = Vec::new();
                for job in rows {
                    jobs.push(job?);
                }
                jobs
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            for job in candidates {
                let updated = tx.execute(
                    "UPDATE upload_jobs
                     SET lease_owner = ?1, lease_expires_at = ?2, updated_at = ?3
                     WHERE id = ?4 AND status = 'Pending'
                       AND (lease_expires_at IS NULL OR lease_expires_at <= ?3)",
                    params![lease_owner, lease_until.to_rfc3339(), now_str, job.id],
                )?;
                if updated == 1 {
                    claimed.push(ClaimedJob {
                        job,
                        lease_owner: lease_owner.clone(),
                    });
                }
            }

            tx.commit().context("failed to commit job claims")?;
            Ok(claimed)
        })
        .await
    }

    /// Extend a held lease right before an attempt. `false` means the lease was released or
    /// another drain owns the job now, so the caller must not attempt it.
    pub async fn renew_upload_lease(
        &self,
        job_id: &str,
        lease_owner: &str,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let job_id = job_id.to_string();
        let lease_owner = lease_owner.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE upload_jobs SET lease_expires_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND lease_owner = ?4 AND status = 'Pending'",
                params![lease_until.to_rfc3339(), now.to_rfc3339(), job_id, lease_owner],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    /// Confirmed upload: the job row goes away and its segment becomes `Uploaded`.
    pub async fn complete_upload_job(&self, job_id: &str, lease_owner: &str) -> Result<bool> {
        let job_id = job_id.to_string();
        let lease_owner = lease_owner.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let owned: Option<String> = tx
                .query_row(
                    "SELECT id FROM upload_jobs WHERE id = ?1 AND lease_owner = ?2",
                    params![job_id, lease_owner],
                    |row| row.get(0),
                )
                .optional()?;
            if owned.is_none() {
                return Ok(false);
            }

            set_segment_status(&tx, &job_id, SegmentStatus::Uploaded)?;
            tx.execute("DELETE FROM upload_jobs WHERE id = ?1", params![job_id])
                .with_context(|| "failed to delete completed upload job")?;
            tx.commit().context("failed to commit upload completion")?;
            Ok(true)
        })
        .await
    }

    /// Record one failed network attempt. `attempt_count` is the count including this attempt.
    pub async fn record_upload_failure(
        &self,
        job_id: &str,
        lease_owner: &str,
        attempt_count: u32,
        next_eligible_at: Option<DateTime<Utc>>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let job_id = job_id.to_string();
        let lease_owner = lease_owner.to_string();
        let error = error.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let outcome = match next_eligible_at {
                Some(next) => {
                    let updated = tx.execute(
                        "UPDATE upload_jobs
                         SET attempt_count = ?1, next_eligible_at = ?2, last_error = ?3,
                             lease_owner = NULL, lease_expires_at = NULL, updated_at = ?4
                         WHERE id = ?5 AND lease_owner = ?6",
                        params![attempt_count, next.to_rfc3339(), error, now.to_rfc3339(), job_id, lease_owner],
                    )?;
                    if updated == 0 {
                        FailureOutcome::LeaseLost
                    } else {
                        FailureOutcome::Retry {
                            attempt_count,
                            next_eligible_at: next,
                        }
                    }
                }
                None => {
                    let updated = tx.execute(
                        "UPDATE upload_jobs
                         SET attempt_count = ?1, status = 'Failed', last_error = ?2,
                             lease_owner = NULL, lease_expires_at = NULL, updated_at = ?3
                         WHERE id = ?4 AND lease_owner = ?5",
                        params![attempt_count, error, now.to_rfc3339(), job_id, lease_owner],
                    )?;
                    if updated == 0 {
                        FailureOutcome::LeaseLost
                    } else {
                        set_segment_status(&tx, &job_id, SegmentStatus::Failed)?;
                        FailureOutcome::Terminal { attempt_count }
                    }
                }
            };
            tx.commit().context("failed to commit upload failure")?;
            Ok(outcome)
        })
        .await
    }

    /// Fail a job that can never succeed without counting a network attempt.
    pub async fn mark_upload_malformed(
        &self,
        job_id: &str,
        lease_owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let job_id = job_id.to_string();
        let lease_owner = lease_owner.to_string();
        let error = error.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE upload_jobs
                 SET status = 'Failed', last_error = ?1,
                     lease_owner = NULL, lease_expires_at = NULL, updated_at = ?2
                 WHERE id = ?3 AND lease_owner = ?4",
                params![error, now.to_rfc3339(), job_id, lease_owner],
            )?;
            if updated == 1 {
                set_segment_status(&tx, &job_id, SegmentStatus::Failed)?;
            }
            tx.commit().context("failed to commit malformed job")?;
            Ok(updated == 1)
        })
        .await
    }

    /// Drop leases whose holder is gone. With `now = None` every lease is released (startup).
    pub async fn release_upload_leases(&self, now: Option<DateTime<Utc>>) -> Result<usize> {
        self.execute(move |conn| {
            let released = match now {
                Some(now) => conn.execute(
                    "UPDATE upload_jobs SET lease_owner = NULL, lease_expires_at = NULL
                     WHERE lease_expires_at IS NOT NULL AND lease_expires_at <= ?1",
                    params![now.to_rfc3339()],
                )?,
                None => conn.execute(
                    "UPDATE upload_jobs SET lease_owner = NULL, lease_expires_at = NULL
                     WHERE lease_owner IS NOT NULL",
                    [],
                )?,
            };
            Ok(released)
        })
        .await
    }

    pub async fn upload_jobs_with_status(&self, status: JobStatus) -> Result<Vec<UploadJob>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM upload_jobs WHERE status = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![status.as_str()], row_to_job)?;
            let mut jobs = Vec::new();
            for job in rows {
                jobs.push(job?);
            }
            Ok(jobs)
        })
        .await
    }

    pub async fn get_upload_job(&self, job_id: &str) -> Result<Option<UploadJob>> {
        let job_id = job_id.to_string();
        self.execute(move |conn| {
            let job = conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM upload_jobs WHERE id = ?1"),
                    params![job_id],
                    row_to_job,
                )
                .optional()?;
            Ok(job)
        })
        .await
    }

    /// Move a terminal job back to pending. The attempt count is kept so it never decreases.
    pub async fn requeue_failed_job(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let job_id = job_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE upload_jobs
                 SET status = 'Pending', next_eligible_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'Failed'",
                params![now.to_rfc3339(), job_id],
            )?;
            if updated == 1 {
                set_segment_status(&tx, &job_id, SegmentStatus::Queued)?;
            }
            tx.commit().context("failed to commit requeue")?;
            Ok(updated == 1)
        })
        .await
    }
}
