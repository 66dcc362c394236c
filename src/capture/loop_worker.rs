use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{Database, Segment, SegmentStatus};
use crate::upload::UploadQueue;

use super::backend::{ActiveRecording, RecordingBackend};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub(super) enum CaptureCommand {
    /// Finalize now and start a fresh segment. Replies whether a new segment is recording.
    Rollover(oneshot::Sender<bool>),
}

pub(super) struct CaptureContext {
    pub db: Database,
    pub queue: UploadQueue,
    pub backend: Arc<dyn RecordingBackend>,
    pub segment_dir: PathBuf,
    pub extension: String,
    pub duration_cap: Duration,
}

pub(super) struct ActiveSegment {
    segment: Segment,
    recording: Box<dyn ActiveRecording>,
    started: Instant,
}

enum LoopEvent {
    Stop,
    Rollover(Option<oneshot::Sender<bool>>),
}

/// Record back-to-back segments until cancelled. Each segment is finalized and enqueued before
/// the next one starts, so the only gap is the finalize + restart latency.
pub(super) async fn capture_loop(
    ctx: Arc<CaptureContext>,
    mut current: ActiveSegment,
    mut commands: mpsc::Receiver<CaptureCommand>,
    cancel_token: CancellationToken,
) {
    loop {
        let deadline = current.started + ctx.duration_cap;

        let event = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => LoopEvent::Stop,
            Some(command) = commands.recv() => match command {
                CaptureCommand::Rollover(ack) => LoopEvent::Rollover(Some(ack)),
            },
            _ = tokio::time::sleep_until(deadline) => LoopEvent::Rollover(None),
        };

        finalize_segment(&ctx, current).await;

        match event {
            LoopEvent::Stop => {
                log_info!("capture loop shutting down");
                break;
            }
            LoopEvent::Rollover(ack) => match begin_segment(&ctx).await {
                Ok(next) => {
                    current = next;
                    if let Some(ack) = ack {
                        let _ = ack.send(true);
                    }
                }
                Err(err) => {
                    log_error!("could not start next segment, recorder going idle: {err:?}");
                    if let Some(ack) = ack {
                        let _ = ack.send(false);
                    }
                    break;
                }
            },
        }
    }
}

pub(super) async fn begin_segment(ctx: &CaptureContext) -> Result<ActiveSegment> {
    tokio::fs::create_dir_all(&ctx.segment_dir)
        .await
        .with_context(|| format!("failed to create {}", ctx.segment_dir.display()))?;

    let id = Uuid::new_v4().to_string();
    let file_path = ctx.segment_dir.join(format!("{id}.{}", ctx.extension));
    let segment = Segment {
        id,
        file_path,
        created_at: Utc::now(),
        finished_at: None,
        duration_cap_ms: ctx.duration_cap.as_millis() as u64,
        duration_ms: None,
        status: SegmentStatus::Recording,
    };

    // Persist first so a crash mid-recording leaves a row for startup recovery.
    ctx.db
        .insert_segment(&segment)
        .await
        .context("failed to persist new segment")?;

    let recording = match ctx.backend.begin(&segment.file_path).await {
        Ok(recording) => recording,
        Err(err) => {
            if let Err(db_err) = ctx
                .db
                .mark_segment_status(&segment.id, SegmentStatus::Failed)
                .await
            {
                log_warn!("could not mark segment {} failed: {db_err:?}", segment.id);
            }
            return Err(err.context("recording primitive failed to start"));
        }
    };

    log_info!("segment {} recording to {}", segment.id, segment.file_path.display());
    Ok(ActiveSegment {
        segment,
        recording,
        started: Instant::now(),
    })
}

/// Stop the primitive and hand the segment to the upload queue. Exactly one job per segment.
pub(super) async fn finalize_segment(ctx: &CaptureContext, active: ActiveSegment) {
    let ActiveSegment {
        segment,
        recording,
        started,
    } = active;

    // The primitive stops at the cap; a late timer wakeup does not lengthen the audio.
    let elapsed = started.elapsed().min(ctx.duration_cap);

    if let Err(err) = recording.finish().await {
        log_warn!("recorder did not stop cleanly for segment {}: {err:?}", segment.id);
    }

    match ctx
        .queue
        .enqueue_segment(&segment, Utc::now(), elapsed.as_millis() as u64)
        .await
    {
        Ok(_) => {}
        Err(err) => log_error!(
            "segment {} not enqueued; startup recovery will pick it up: {err:?}",
            segment.id
        ),
    }
}
