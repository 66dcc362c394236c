use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::{ClaimedJob, Database, FailureOutcome, JobStatus, Segment, UploadJob, UploadSource};
use crate::error::PipelineError;
use crate::notify::{Notification, NotificationSink};
use crate::retry::RetryPolicy;

use super::remote::RemoteStore;

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_error, log_info, log_warn};

const CLAIM_BATCH: usize = 64;

/// Result of one `drain` pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: usize,
    pub retrying: usize,
    pub failed: usize,
    pub malformed: usize,
    pub lease_lost: usize,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.uploaded + self.retrying + self.failed + self.malformed + self.lease_lost
    }

    fn merge(&mut self, other: DrainReport) {
        self.uploaded += other.uploaded;
        self.retrying += other.retrying;
        self.failed += other.failed;
        self.malformed += other.malformed;
        self.lease_lost += other.lease_lost;
    }
}

/// Durable at-least-once upload queue backed by the `upload_jobs` table.
///
/// `enqueue` returns only after the job is committed. `drain` must only be called when the
/// network constraint holds; the queue itself never checks connectivity.
#[derive(Clone)]
pub struct UploadQueue {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    lease: Duration,
    max_parallel: usize,
    namespace: String,
    wake: Arc<Notify>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl UploadQueue {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        policy: RetryPolicy,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            db,
            remote,
            policy,
            attempt_timeout: Duration::from_secs(120),
            lease: Duration::from_secs(300),
            max_parallel: 4,
            namespace: namespace.into(),
            wake: Arc::new(Notify::new()),
            notifier: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Signalled whenever a job is enqueued so a network-constrained runner can drain early.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub async fn enqueue(&self, job: UploadJob) -> Result<()> {
        self.db
            .insert_upload_job(&job)
            .await
            .with_context(|| format!("failed to persist upload job {}", job.id))?;
        log_debug!("enqueued upload job {} -> {}", job.id, job.destination_key);
        self.wake.notify_one();
        Ok(())
    }

    /// Build the upload job for a finished audio segment.
    pub fn segment_job(&self, segment: &Segment, now: DateTime<Utc>) -> UploadJob {
        let file_name = segment.file_name();
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), "audio".to_string());
        metadata.insert("filename".to_string(), file_name.clone());
        metadata.insert("user".to_string(), self.namespace.clone());
        metadata.insert("segment-id".to_string(), segment.id.clone());

        let destination_key = format!(
            "{}/audio/{}_{}",
            self.namespace,
            segment.created_at.format("%Y%m%dT%H%M%S"),
            file_name
        );

        UploadJob::new(
            UploadSource::Segment {
                segment_id: segment.id.clone(),
                path: segment.file_path.clone(),
            },
            destination_key,
            metadata,
            now,
        )
    }

    /// Finalize `segment` and enqueue its job atomically. Returns `false` if it was already queued.
    pub async fn enqueue_segment(
        &self,
        segment: &Segment,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<bool> {
        let job = self.segment_job(segment, finished_at);
        let enqueued = self
            .db
            .finalize_segment_and_enqueue(&segment.id, finished_at, duration_ms, &job)
            .await?;
        if enqueued {
            log_info!(
                "segment {} finalized ({} ms) and queued as job {}",
                segment.id,
                duration_ms,
                job.id
            );
            self.wake.notify_one();
        } else {
            log_warn!("segment {} already queued; skipping duplicate finalize", segment.id);
        }
        Ok(enqueued)
    }

    pub async fn drain(&self) -> Result<DrainReport> {
        self.drain_at(Utc::now()).await
    }

    /// Attempt every job eligible at `now` once. Different destination folders drain in
    /// parallel; jobs sharing a folder go one after another.
    pub async fn drain_at(&self, now: DateTime<Utc>) -> Result<DrainReport> {
        let owner = Uuid::new_v4().to_string();
        let lease_until = now + to_chrono(self.effective_lease());
        let claimed = self
            .db
            .claim_eligible_jobs(now, &owner, lease_until, CLAIM_BATCH)
            .await
            .context("failed to claim upload jobs")?;

        if claimed.is_empty() {
            return Ok(DrainReport::default());
        }
        log_info!("draining {} upload job(s)", claimed.len());

        let mut groups: HashMap<String, Vec<ClaimedJob>> = HashMap::new();
        for job in claimed {
            groups
                .entry(job.job.destination_group().to_string())
                .or_default()
                .push(job);
        }

        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        for (_, jobs) in groups {
            let queue = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let mut report = DrainReport::default();
                for claimed in jobs {
                    queue.attempt(claimed, &mut report).await;
                }
                report
            });
        }

        let mut report = DrainReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partial) => report.merge(partial),
                Err(err) => log_error!("upload drain task panicked: {err}"),
            }
        }

        log_info!(
            "drain finished: {} uploaded, {} retrying, {} failed, {} malformed",
            report.uploaded,
            report.retrying,
            report.failed,
            report.malformed
        );
        Ok(report)
    }

    /// A lease shorter than one attempt would let a second drain steal a live job.
    fn effective_lease(&self) -> Duration {
        self.lease.max(self.attempt_timeout + Duration::from_secs(1))
    }

    async fn attempt(&self, claimed: ClaimedJob, report: &mut DrainReport) {
        let ClaimedJob { job, lease_owner } = claimed;
        let path = job.source.path().clone();

        // The claim-time lease may have run out while earlier jobs in this folder uploaded.
        let now = Utc::now();
        match self
            .db
            .renew_upload_lease(&job.id, &lease_owner, now + to_chrono(self.effective_lease()), now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                report.lease_lost += 1;
                log_warn!("lease on job {} lost before its attempt; skipping", job.id);
                return;
            }
            Err(err) => {
                report.lease_lost += 1;
                log_error!("could not renew lease on job {}: {err:?}", job.id);
                return;
            }
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                self.fail_malformed(&job, &lease_owner, "source file is empty", report)
                    .await;
                return;
            }
            Err(err) => {
                let reason = format!("source file {} unreadable: {err}", path.display());
                self.fail_malformed(&job, &lease_owner, &reason, report).await;
                return;
            }
        };

        let attempt_count = job.attempt_count + 1;
        let result = match tokio::time::timeout(
            self.attempt_timeout,
            self.remote.put(&job.destination_key, bytes, &job.metadata),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::transient(format!(
                "upload timed out after {}s",
                self.attempt_timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => self.complete(&job, &lease_owner, attempt_count, report).await,
            // Rejected before any network I/O; no attempt is consumed.
            Err(PipelineError::Malformed(reason)) => {
                self.fail_malformed(&job, &lease_owner, &reason, report).await
            }
            Err(err) => {
                self.record_failure(&job, &lease_owner, attempt_count, err, report)
                    .await
            }
        }
    }

    async fn complete(
        &self,
        job: &UploadJob,
        lease_owner: &str,
        attempt_count: u32,
        report: &mut DrainReport,
    ) {
        match self.db.complete_upload_job(&job.id, lease_owner).await {
            Ok(true) => {
                report.uploaded += 1;
                log_info!(
                    "uploaded job {} to {} (attempt_count={})",
                    job.id,
                    job.destination_key,
                    attempt_count
                );
                if job.delete_source_on_success {
                    let path = job.source.path();
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        log_warn!("uploaded file {} not deleted: {err}", path.display());
                    }
                }
            }
            Ok(false) => {
                report.lease_lost += 1;
                log_warn!("lease on job {} lost before completion was recorded", job.id);
            }
            Err(err) => {
                // The remote write is idempotent; the job will simply be uploaded again.
                report.lease_lost += 1;
                log_error!("failed to record completion of job {}: {err:?}", job.id);
            }
        }
    }

    async fn record_failure(
        &self,
        job: &UploadJob,
        lease_owner: &str,
        attempt_count: u32,
        err: PipelineError,
        report: &mut DrainReport,
    ) {
        let now = Utc::now();
        let retryable = (self.policy.retryable)(&err);
        let next_eligible_at = if retryable && !self.policy.is_exhausted(attempt_count) {
            Some(now + to_chrono(self.policy.delay_for(job.attempt_count)))
        } else {
            None
        };
        let message = err.to_string();

        match self
            .db
            .record_upload_failure(&job.id, lease_owner, attempt_count, next_eligible_at, &message, now)
            .await
        {
            Ok(FailureOutcome::Retry {
                attempt_count,
                next_eligible_at,
            }) => {
                report.retrying += 1;
                log_warn!(
                    "upload of job {} failed (attempt {attempt_count}/{}), next try at {next_eligible_at}: {message}",
                    job.id,
                    self.policy.max_attempts
                );
            }
            Ok(FailureOutcome::Terminal { attempt_count }) => {
                report.failed += 1;
                log_error!(
                    "upload of job {} gave up after {attempt_count} attempts: {message}",
                    job.id
                );
                self.surface_failure(job, &message).await;
            }
            Ok(FailureOutcome::LeaseLost) => {
                report.lease_lost += 1;
                log_warn!("lease on job {} lost before failure was recorded", job.id);
            }
            Err(db_err) => {
                report.lease_lost += 1;
                log_error!("failed to record failure of job {}: {db_err:?}", job.id);
            }
        }
    }

    async fn fail_malformed(
        &self,
        job: &UploadJob,
        lease_owner: &str,
        reason: &str,
        report: &mut DrainReport,
    ) {
        match self
            .db
            .mark_upload_malformed(&job.id, lease_owner, reason, Utc::now())
            .await
        {
            Ok(true) => {
                report.malformed += 1;
                log_error!("job {} can never upload: {reason}", job.id);
                self.surface_failure(job, reason).await;
            }
            Ok(false) => report.lease_lost += 1,
            Err(err) => {
                report.lease_lost += 1;
                log_error!("failed to mark job {} malformed: {err:?}", job.id);
            }
        }
    }

    async fn surface_failure(&self, job: &UploadJob, reason: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification = Notification::capture(
            "Upload failed",
            format!("{} will not be uploaded: {reason}", job.destination_key),
        );
        if let Err(err) = notifier.show(notification).await {
            log_warn!("could not surface failed job {}: {err}", job.id);
        }
    }

    pub async fn pending_jobs(&self) -> Result<Vec<UploadJob>> {
        self.db.upload_jobs_with_status(JobStatus::Pending).await
    }

    pub async fn failed_jobs(&self) -> Result<Vec<UploadJob>> {
        self.db.upload_jobs_with_status(JobStatus::Failed).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<UploadJob>> {
        self.db.get_upload_job(job_id).await
    }

    /// Give a terminal job another chance. Its attempt count carries over.
    pub async fn requeue_failed(&self, job_id: &str) -> Result<bool> {
        let requeued = self.db.requeue_failed_job(job_id, Utc::now()).await?;
        if requeued {
            log_info!("failed job {job_id} requeued");
            self.wake.notify_one();
        }
        Ok(requeued)
    }

    /// Release leases left by a crashed process.
    pub async fn recover(&self) -> Result<usize> {
        let released = self.db.release_upload_leases(None).await?;
        if released > 0 {
            log_info!("released {released} upload lease(s) from a previous run");
        }
        Ok(released)
    }

    pub async fn release_expired_leases(&self) -> Result<usize> {
        self.db.release_upload_leases(Some(Utc::now())).await
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
