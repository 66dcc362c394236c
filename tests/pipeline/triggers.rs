use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thoughtstream_lib::capture::SegmentRecorder;
use thoughtstream_lib::db::SegmentStatus;
use thoughtstream_lib::settings::{MovementThresholds, NetworkConstraint, PipelineConfig};
use thoughtstream_lib::telemetry::{FixedLocation, NoMotionSensor, SysfsBattery, TelemetrySampler};
use thoughtstream_lib::triggers::{run_maintenance, TriggerSet};
use thoughtstream_lib::{Collaborators, Pipeline};

use super::support::{
    recorded_segment, FakeMicrophone, MemoryFeedbackStore, Reachable, RecordingSink, ScriptedGeneration,
    ScriptedRemote,
};
use super::{temp_db, test_queue};

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done()
}

#[tokio::test]
async fn enqueue_wakes_the_network_drain() {
    let (tmp, db) = temp_db();
    let remote = ScriptedRemote::ok();
    let queue = test_queue(&db, remote.clone(), 3);

    let mut triggers = TriggerSet::new();
    triggers.spawn_network_drain(
        queue.clone(),
        NetworkConstraint::Connected,
        Reachable::yes(),
        Duration::from_secs(3_600),
    );
    assert_eq!(triggers.len(), 1);

    let segment = recorded_segment(&db, tmp.path(), b"RIFF").await;
    queue
        .enqueue_segment(&segment, Utc::now(), 100)
        .await
        .expect("enqueue");

    assert!(wait_for(|| remote.calls() == 1).await);
    triggers.shutdown().await;
}

#[tokio::test]
async fn disabled_network_never_drains() {
    let (tmp, db) = temp_db();
    let remote = ScriptedRemote::ok();
    let queue = test_queue(&db, remote.clone(), 3);

    let mut triggers = TriggerSet::new();
    triggers.spawn_network_drain(
        queue.clone(),
        NetworkConstraint::Disabled,
        Reachable::yes(),
        Duration::from_millis(20),
    );

    let segment = recorded_segment(&db, tmp.path(), b"RIFF").await;
    queue
        .enqueue_segment(&segment, Utc::now(), 100)
        .await
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(200)).await;
    triggers.shutdown().await;

    assert_eq!(remote.calls(), 0);
    assert_eq!(queue.pending_jobs().await.expect("pending").len(), 1);
}

#[tokio::test]
async fn periodic_trigger_runs_until_shutdown() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut triggers = TriggerSet::new();
    let counter = Arc::clone(&runs);
    triggers.spawn_periodic("tick", Duration::from_millis(30), move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(250)).await;
    triggers.shutdown().await;
    let after_shutdown = runs.load(Ordering::SeqCst);
    assert!(after_shutdown >= 2, "ran {after_shutdown} times");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
}

#[tokio::test]
async fn maintenance_releases_stale_leases_and_prunes_uploaded_rows() {
    let (tmp, db) = temp_db();
    let remote = ScriptedRemote::ok();
    let queue = test_queue(&db, remote.clone(), 3);
    let recorder = SegmentRecorder::new(
        db.clone(),
        queue.clone(),
        FakeMicrophone::new(),
        tmp.path().join("segments"),
        "wav",
        Duration::from_secs(60),
    );

    let uploaded = recorded_segment(&db, tmp.path(), b"RIFF").await;
    queue
        .enqueue_segment(&uploaded, Utc::now() - chrono::Duration::seconds(5), 100)
        .await
        .expect("enqueue");
    assert_eq!(queue.drain().await.expect("drain").uploaded, 1);

    let stale = recorded_segment(&db, tmp.path(), b"RIFF").await;
    queue
        .enqueue_segment(&stale, Utc::now(), 100)
        .await
        .expect("enqueue");
    let now = Utc::now();
    let claimed = db
        .claim_eligible_jobs(now, "crashed-drain", now - chrono::Duration::seconds(1), 10)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);

    let report = run_maintenance(&recorder, &queue, &db, true, 0).await;
    assert!(!report.recorder_restarted);
    assert_eq!(report.leases_released, 1);
    assert_eq!(report.segments_pruned, 1);

    assert!(db.get_segment(&uploaded.id).await.expect("get").is_none());
    let stale = db.get_segment(&stale.id).await.expect("get").expect("row");
    assert_eq!(stale.status, SegmentStatus::Queued);
}

#[tokio::test]
async fn maintenance_survives_an_out_of_range_retention() {
    let (tmp, db) = temp_db();
    let queue = test_queue(&db, ScriptedRemote::ok(), 3);
    let recorder = SegmentRecorder::new(
        db.clone(),
        queue.clone(),
        FakeMicrophone::new(),
        tmp.path().join("segments"),
        "wav",
        Duration::from_secs(60),
    );

    let uploaded = recorded_segment(&db, tmp.path(), b"RIFF").await;
    queue
        .enqueue_segment(&uploaded, Utc::now(), 100)
        .await
        .expect("enqueue");
    assert_eq!(queue.drain().await.expect("drain").uploaded, 1);

    let report = run_maintenance(&recorder, &queue, &db, false, i64::MAX).await;
    assert_eq!(report.segments_pruned, 0);
    assert!(db.get_segment(&uploaded.id).await.expect("get").is_some());
}

#[tokio::test]
async fn upload_drain_follows_upload_reachability_not_generation() {
    let (tmp, db) = temp_db();
    let remote = ScriptedRemote::ok();
    let generation = ScriptedGeneration::replying("unused");

    let mut config = PipelineConfig::default();
    config.device_namespace = "device-1".into();
    config.desktop_notifications = false;
    config.upload.network = NetworkConstraint::Connected;
    config.upload.drain_interval_secs = 3_600;
    config.generation.interval_secs = 3_600;

    let collaborators = Collaborators {
        recording: FakeMicrophone::new(),
        remote: remote.clone(),
        generation: generation.clone(),
        reachability: Reachable::no(),
        upload_reachability: Reachable::yes(),
        notifications: Arc::new(RecordingSink::default()),
        feedback: Arc::new(MemoryFeedbackStore::default()),
        sampler: TelemetrySampler::new(
            Arc::new(SysfsBattery::new(Some(tmp.path().join("no-battery")))),
            Arc::new(FixedLocation::new(None, None)),
            Arc::new(NoMotionSensor),
            MovementThresholds::default(),
        ),
        accelerometer: None,
    };
    let pipeline = Pipeline::new(config, tmp.path(), db.clone(), collaborators);
    let triggers = pipeline.spawn_triggers();

    let segment = recorded_segment(&db, tmp.path(), b"RIFF").await;
    pipeline
        .queue
        .enqueue_segment(&segment, Utc::now(), 100)
        .await
        .expect("enqueue");

    assert!(wait_for(|| remote.calls() == 1).await);
    pipeline.shutdown(triggers).await;
    assert!(pipeline.queue.pending_jobs().await.expect("pending").is_empty());
    assert_eq!(generation.calls(), 0);
}
