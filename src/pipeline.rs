use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::capture::{CommandBackend, RecordingBackend, SegmentRecorder};
use crate::context::{ContextAssembler, SqliteStores};
use crate::db::Database;
use crate::error::PipelineResult;
use crate::feedback::{FeedbackChannel, FeedbackKind, FeedbackStore, HttpFeedbackStore};
use crate::generation::{
    GenerationApi, GenerationScheduler, HttpGenerationClient, HttpReachability, ReachabilityCheck,
};
use crate::notify::{DesktopNotifier, LogNotificationSink, NotificationSink};
use crate::retry::RetryPolicy;
use crate::settings::PipelineConfig;
use crate::telemetry::{
    FixedLocation, IioAccelerometer, MotionSource, NoMotionSensor, OpenMeteoWeather, SysfsBattery,
    TelemetrySampler,
};
use crate::triggers::{constraint_met, run_maintenance, TriggerSet};
use crate::upload::{HttpRemoteStore, RemoteStore, UploadQueue};

/// External collaborators the pipeline talks to. Swapped for stubs in tests.
pub struct Collaborators {
    pub recording: Arc<dyn RecordingBackend>,
    pub remote: Arc<dyn RemoteStore>,
    pub generation: Arc<dyn GenerationApi>,
    /// Gates generation runs.
    pub reachability: Arc<dyn ReachabilityCheck>,
    /// Gates upload drains.
    pub upload_reachability: Arc<dyn ReachabilityCheck>,
    pub notifications: Arc<dyn NotificationSink>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub sampler: TelemetrySampler,
    /// Polled on its own trigger when present; also the sampler's motion source.
    pub accelerometer: Option<Arc<IioAccelerometer>>,
}

impl Collaborators {
    /// HTTP- and process-backed collaborators built from config.
    pub fn from_config(
        config: &PipelineConfig,
        feedback_tx: mpsc::UnboundedSender<(u32, FeedbackKind)>,
    ) -> PipelineResult<Self> {
        let api_key = std::env::var(&config.generation.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "{} is not set; generation requests will be unauthenticated",
                config.generation.api_key_env
            );
        }

        let notifications: Arc<dyn NotificationSink> = if config.desktop_notifications {
            Arc::new(DesktopNotifier::new(feedback_tx))
        } else {
            Arc::new(LogNotificationSink)
        };

        let telemetry = &config.telemetry;
        let accelerometer = IioAccelerometer::discover(
            telemetry.accelerometer_path.clone(),
            Duration::from_millis(telemetry.motion_sample_ms.max(1)),
        )
        .map(Arc::new);
        let motion: Arc<dyn MotionSource> = match &accelerometer {
            Some(sensor) => Arc::clone(sensor) as Arc<dyn MotionSource>,
            None => Arc::new(NoMotionSensor),
        };
        let mut sampler = TelemetrySampler::new(
            Arc::new(SysfsBattery::new(telemetry.battery_path.clone())),
            Arc::new(FixedLocation::new(telemetry.latitude, telemetry.longitude)),
            motion,
            telemetry.movement,
        )
        .with_location_permission(telemetry.location_permitted);
        if telemetry.weather_enabled {
            sampler = sampler.with_weather(Arc::new(OpenMeteoWeather::new(
                telemetry.weather_endpoint.clone(),
            )?));
        }

        Ok(Self {
            recording: Arc::new(CommandBackend::new(&config.capture)),
            remote: Arc::new(HttpRemoteStore::new(
                config.upload.endpoint.clone(),
                Duration::from_secs(config.upload.attempt_timeout_secs),
            )?),
            generation: Arc::new(HttpGenerationClient::new(
                config.generation.endpoint.clone(),
                config.generation.model.clone(),
                api_key,
                config.generation.system_prompt.clone(),
                Duration::from_secs(config.generation.request_timeout_secs),
            )?),
            reachability: Arc::new(HttpReachability::new(
                config.generation.reachability_url.clone(),
            )),
            upload_reachability: Arc::new(HttpReachability::new(
                config.upload.reachability_url().to_string(),
            )),
            notifications,
            feedback: Arc::new(HttpFeedbackStore::new(
                config.feedback.endpoint.clone(),
                config.device_namespace.clone(),
            )?),
            sampler,
            accelerometer,
        })
    }
}

/// The wired pipeline: every component shares the one database handle.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub db: Database,
    pub recorder: Arc<SegmentRecorder>,
    pub queue: UploadQueue,
    pub scheduler: Arc<GenerationScheduler>,
    pub feedback: FeedbackChannel,
    pub stores: SqliteStores,
    upload_reachability: Arc<dyn ReachabilityCheck>,
    accelerometer: Option<Arc<IioAccelerometer>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, data_dir: &Path, db: Database, collaborators: Collaborators) -> Self {
        let Collaborators {
            recording,
            remote,
            generation,
            reachability,
            upload_reachability,
            notifications,
            feedback,
            sampler,
            accelerometer,
        } = collaborators;

        let queue = UploadQueue::new(
            db.clone(),
            remote,
            RetryPolicy::from(&config.upload.retry),
            config.device_namespace.clone(),
        )
        .with_attempt_timeout(Duration::from_secs(config.upload.attempt_timeout_secs))
        .with_lease(Duration::from_secs(config.upload.lease_secs))
        .with_max_parallel(config.upload.max_parallel_destinations)
        .with_notifier(Arc::clone(&notifications));

        let segment_dir = resolve_dir(data_dir, &config.capture.segment_dir);
        let recorder = SegmentRecorder::new(
            db.clone(),
            queue.clone(),
            recording,
            segment_dir,
            config.capture.extension.clone(),
            Duration::from_secs(config.capture.segment_secs),
        )
        .with_notifier(Arc::clone(&notifications));

        let stores = SqliteStores::new(db.clone(), config.device_namespace.clone());
        let assembler = ContextAssembler::new(Arc::new(stores.clone()), Arc::new(stores.clone()));
        let scheduler = GenerationScheduler::new(
            db.clone(),
            config.device_namespace.clone(),
            assembler,
            Arc::new(sampler),
            generation,
            reachability,
            Arc::clone(&notifications),
        )
        .with_policy(RetryPolicy::from(&config.generation.retry))
        .with_min_spacing(Duration::from_secs(config.generation.min_spacing_secs))
        .with_limits(
            config.generation.max_conversation_turns,
            config.generation.max_transcript_items,
        );

        let feedback = FeedbackChannel::new(feedback, notifications);

        Self {
            config,
            db,
            recorder: Arc::new(recorder),
            queue,
            scheduler: Arc::new(scheduler),
            feedback,
            stores,
            upload_reachability,
            accelerometer,
        }
    }

    /// Crash recovery: release stale leases, then enqueue orphaned segments.
    pub async fn recover(&self) -> Result<()> {
        self.queue.recover().await?;
        self.recorder.recover().await?;
        Ok(())
    }

    /// Start the generation, maintenance, upload-drain, and motion-sampling trigger sources.
    pub fn spawn_triggers(&self) -> TriggerSet {
        let mut triggers = TriggerSet::new();

        let scheduler = Arc::clone(&self.scheduler);
        triggers.spawn_periodic(
            "generation",
            Duration::from_secs(self.config.generation.interval_secs.max(1)),
            move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    if let Err(err) = scheduler.run_once().await {
                        warn!("generation cycle failed: {err}");
                    }
                }
            },
        );

        let recorder = Arc::clone(&self.recorder);
        let queue = self.queue.clone();
        let db = self.db.clone();
        let auto_restart = self.config.capture.auto_restart;
        let retention = self.config.maintenance.uploaded_retention_days;
        triggers.spawn_periodic(
            "maintenance",
            Duration::from_secs(self.config.maintenance.interval_secs.max(1)),
            move || {
                let recorder = Arc::clone(&recorder);
                let queue = queue.clone();
                let db = db.clone();
                async move {
                    run_maintenance(&recorder, &queue, &db, auto_restart, retention).await;
                }
            },
        );

        triggers.spawn_network_drain(
            self.queue.clone(),
            self.config.upload.network,
            Arc::clone(&self.upload_reachability),
            Duration::from_secs(self.config.upload.drain_interval_secs.max(1)),
        );

        if let Some(sensor) = &self.accelerometer {
            let sensor = Arc::clone(sensor);
            let every = sensor.interval();
            triggers.spawn_periodic("motion", every, move || {
                let sensor = Arc::clone(&sensor);
                async move {
                    if !sensor.poll() {
                        debug!("accelerometer read failed");
                    }
                }
            });
        }

        triggers
    }

    /// Stop triggers, force the final segment into the queue, and try one last drain.
    pub async fn shutdown(&self, triggers: TriggerSet) {
        triggers.shutdown().await;

        if let Err(err) = self.recorder.stop().await {
            warn!("recorder did not stop cleanly: {err:?}");
        }

        if constraint_met(self.config.upload.network, self.upload_reachability.as_ref()).await {
            let budget = Duration::from_secs(self.config.upload.attempt_timeout_secs + 5);
            match tokio::time::timeout(budget, self.queue.drain()).await {
                Ok(Ok(report)) => info!("final drain uploaded {} job(s)", report.uploaded),
                Ok(Err(err)) => warn!("final drain failed: {err:?}"),
                Err(_) => warn!("final drain cut short; pending jobs stay queued"),
            }
        }
    }
}

fn resolve_dir(data_dir: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        data_dir.join(configured)
    }
}
