use chrono::Utc;
use log::{info, warn};

use crate::capture::SegmentRecorder;
use crate::db::Database;
use crate::error::PipelineError;
use crate::upload::UploadQueue;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub recorder_restarted: bool,
    pub leases_released: usize,
    pub segments_pruned: usize,
}

/// Housekeeping run on its own schedule. Each step is independent; a failing step is logged
/// and the rest still run. Failed jobs are left for the user to requeue.
pub async fn run_maintenance(
    recorder: &SegmentRecorder,
    queue: &UploadQueue,
    db: &Database,
    auto_restart: bool,
    uploaded_retention_days: i64,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    if auto_restart {
        match recorder.ensure_running().await {
            Ok(restarted) => report.recorder_restarted = restarted,
            Err(PipelineError::PermissionDenied(what)) => {
                warn!("recorder restart needs {what} permission; leaving idle")
            }
            Err(err) => warn!("recorder restart failed: {err}"),
        }
    }

    match queue.release_expired_leases().await {
        Ok(released) => report.leases_released = released,
        Err(err) => warn!("releasing expired leases failed: {err:?}"),
    }

    let cutoff = chrono::Duration::try_days(uploaded_retention_days.max(0))
        .and_then(|retention| Utc::now().checked_sub_signed(retention));
    match cutoff {
        Some(cutoff) => match db.prune_uploaded_segments(cutoff).await {
            Ok(pruned) => report.segments_pruned = pruned,
            Err(err) => warn!("pruning uploaded segments failed: {err:?}"),
        },
        None => warn!("retention of {uploaded_retention_days} days is out of range; not pruning"),
    }

    info!(
        "maintenance: restarted={} leases_released={} segments_pruned={}",
        report.recorder_restarted, report.leases_released, report.segments_pruned
    );
    report
}
