use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, SegmentStatus};
use crate::error::{PipelineError, PipelineResult};
use crate::notify::{Notification, NotificationSink};
use crate::upload::UploadQueue;

use super::backend::RecordingBackend;
use super::loop_worker::{begin_segment, capture_loop, CaptureCommand, CaptureContext};

struct ActiveCapture {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
    commands: mpsc::Sender<CaptureCommand>,
}

/// Outcome of re-enqueuing segments orphaned by a crash.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub enqueued: usize,
    pub failed: usize,
}

/// Continuous segmented recorder. Idle -> Recording -> (rollover -> Recording | stop -> Idle).
pub struct SegmentRecorder {
    ctx: Arc<CaptureContext>,
    active: Mutex<Option<ActiveCapture>>,
    /// Whether the host wants capture running; maintenance restarts an idle recorder when set.
    desired: AtomicBool,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl SegmentRecorder {
    pub fn new(
        db: Database,
        queue: UploadQueue,
        backend: Arc<dyn RecordingBackend>,
        segment_dir: PathBuf,
        extension: impl Into<String>,
        duration_cap: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(CaptureContext {
                db,
                queue,
                backend,
                segment_dir,
                extension: extension.into(),
                duration_cap,
            }),
            active: Mutex::new(None),
            desired: AtomicBool::new(false),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn duration_cap(&self) -> Duration {
        self.ctx.duration_cap
    }

    /// Begin recording. Already recording is a no-op.
    ///
    /// Missing microphone permission returns `PermissionDenied` and is not retried here. A
    /// primitive that fails to start is logged and leaves the recorder idle.
    pub async fn start(&self) -> PipelineResult<()> {
        let mut guard = self.active.lock().await;
        if let Some(active) = guard.as_ref() {
            if !active.handle.is_finished() {
                info!("recorder already running");
                return Ok(());
            }
        }
        // A loop that ended on its own (primitive failure) leaves a finished handle behind.
        if let Some(stale) = guard.take() {
            let _ = stale.handle.await;
        }

        self.desired.store(true, Ordering::SeqCst);

        if !self.ctx.backend.microphone_permitted() {
            warn!("microphone permission missing; recording not started");
            self.desired.store(false, Ordering::SeqCst);
            self.notify("Recording paused", "Microphone permission is required to record.")
                .await;
            return Err(PipelineError::PermissionDenied("microphone".into()));
        }

        let first = match begin_segment(&self.ctx).await {
            Ok(segment) => segment,
            Err(err) => {
                error!("recorder failed to start: {err:?}");
                return Err(PipelineError::Other(err));
            }
        };

        let cancel_token = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(4);
        let handle = tokio::spawn(capture_loop(
            Arc::clone(&self.ctx),
            first,
            command_rx,
            cancel_token.clone(),
        ));

        *guard = Some(ActiveCapture {
            handle,
            cancel_token,
            commands: command_tx,
        });
        drop(guard);

        info!(
            "recording started with {}s segments",
            self.ctx.duration_cap.as_secs_f32()
        );
        self.notify(
            "Recording",
            format!(
                "Capturing audio in {}-second segments.",
                self.ctx.duration_cap.as_secs()
            ),
        )
        .await;
        Ok(())
    }

    /// Finalize the active segment (if any) and go idle. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        self.desired.store(false, Ordering::SeqCst);
        let active = self.active.lock().await.take();
        let Some(active) = active else {
            return Ok(());
        };

        active.cancel_token.cancel();
        active
            .handle
            .await
            .context("capture loop task failed to join")?;

        info!("recording stopped");
        self.notify("Recording stopped", "Audio capture is off.").await;
        Ok(())
    }

    /// Finalize the current segment now and continue in a fresh one.
    pub async fn rollover(&self) -> Result<bool> {
        let commands = {
            let guard = self.active.lock().await;
            match guard.as_ref() {
                Some(active) if !active.handle.is_finished() => active.commands.clone(),
                _ => return Err(anyhow!("recorder is not running")),
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        commands
            .send(CaptureCommand::Rollover(ack_tx))
            .await
            .map_err(|_| anyhow!("capture loop is gone"))?;
        ack_rx.await.map_err(|_| anyhow!("capture loop ended during rollover"))
    }

    pub async fn is_recording(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }

    /// Restart an idle recorder the host still wants running. Returns whether a start happened.
    pub async fn ensure_running(&self) -> PipelineResult<bool> {
        if !self.desired.load(Ordering::SeqCst) || self.is_recording().await {
            return Ok(false);
        }
        warn!("recorder found idle while capture is wanted; restarting");
        self.start().await.map(|_| true)
    }

    /// Enqueue segments a previous process left behind. Call before `start`.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        if self.is_recording().await {
            return Err(anyhow!("recovery must run before recording starts"));
        }

        let mut report = RecoveryReport::default();
        let mut orphans = self.ctx.db.segments_with_status(SegmentStatus::Recording).await?;
        orphans.extend(self.ctx.db.segments_with_status(SegmentStatus::Finalized).await?);

        for segment in orphans {
            let has_audio = tokio::fs::metadata(&segment.file_path)
                .await
                .map(|meta| meta.len() > 0)
                .unwrap_or(false);
            if !has_audio {
                warn!("orphaned segment {} has no audio; marking failed", segment.id);
                self.ctx
                    .db
                    .mark_segment_status(&segment.id, SegmentStatus::Failed)
                    .await?;
                report.failed += 1;
                continue;
            }

            let now = Utc::now();
            let elapsed = (now - segment.created_at)
                .num_milliseconds()
                .clamp(0, segment.duration_cap_ms as i64) as u64;
            if self.ctx.queue.enqueue_segment(&segment, now, elapsed).await? {
                report.enqueued += 1;
            }
        }

        if report.enqueued + report.failed > 0 {
            warn!(
                "recovered orphaned segments: {} enqueued, {} failed",
                report.enqueued, report.failed
            );
        }
        Ok(report)
    }

    async fn notify(&self, title: &str, text: impl Into<String>) {
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.show(Notification::capture(title, text)).await {
                warn!("capture notice not shown: {err}");
            }
        }
    }
}
