use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use thoughtstream_lib::capture::SegmentRecorder;
use thoughtstream_lib::db::{Database, SegmentStatus};
use thoughtstream_lib::error::PipelineError;
use thoughtstream_lib::notify::NotificationChannel;
use thoughtstream_lib::upload::UploadQueue;

use super::support::{recorded_segment, FakeMicrophone, RecordingSink, ScriptedRemote};
use super::{temp_db, test_queue};

fn recorder(
    tmp: &TempDir,
    db: &Database,
    mic: Arc<FakeMicrophone>,
    cap: Duration,
) -> (SegmentRecorder, UploadQueue, Arc<RecordingSink>) {
    let queue = test_queue(db, ScriptedRemote::ok(), 3);
    let sink = Arc::new(RecordingSink::default());
    let recorder = SegmentRecorder::new(
        db.clone(),
        queue.clone(),
        mic,
        tmp.path().join("segments"),
        "wav",
        cap,
    )
    .with_notifier(sink.clone());
    (recorder, queue, sink)
}

#[tokio::test]
async fn segments_roll_over_at_the_cap() {
    let (tmp, db) = temp_db();
    let (recorder, queue, _sink) = recorder(&tmp, &db, FakeMicrophone::new(), Duration::from_secs(1));

    recorder.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let queued = db
        .segments_with_status(SegmentStatus::Queued)
        .await
        .expect("queued segments");
    assert_eq!(queued.len(), 3);
    for segment in &queued {
        let duration = segment.duration_ms.expect("finalized duration");
        assert!(duration <= 1_000, "segment ran {duration} ms");
        assert!(segment.finished_at.is_some());
    }
    assert_eq!(queue.pending_jobs().await.expect("jobs").len(), 3);
    assert!(recorder.is_recording().await);

    recorder.stop().await.expect("stop");
    assert_eq!(queue.pending_jobs().await.expect("jobs").len(), 4);
}

#[tokio::test]
async fn rollovers_then_stop_enqueue_one_job_per_segment() {
    let (tmp, db) = temp_db();
    let mic = FakeMicrophone::new();
    let (recorder, queue, _sink) = recorder(&tmp, &db, mic.clone(), Duration::from_secs(60));

    recorder.start().await.expect("start");
    for _ in 0..3 {
        assert!(recorder.rollover().await.expect("rollover"));
    }
    recorder.stop().await.expect("stop");
    recorder.stop().await.expect("second stop is a no-op");

    let jobs = queue.pending_jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 4);
    assert_eq!(mic.begun(), 4);

    let mut paths: Vec<_> = jobs.iter().map(|job| job.source.path().clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    for job in &jobs {
        assert_eq!(job.attempt_count, 0);
        assert!(job.destination_key.starts_with("device-1/audio/"));
        assert_eq!(job.metadata.get("source").map(String::as_str), Some("audio"));
    }
    assert!(!recorder.is_recording().await);
}

#[tokio::test]
async fn start_while_recording_is_a_no_op() {
    let (tmp, db) = temp_db();
    let mic = FakeMicrophone::new();
    let (recorder, queue, _sink) = recorder(&tmp, &db, mic.clone(), Duration::from_secs(60));

    recorder.start().await.expect("start");
    recorder.start().await.expect("second start");
    assert_eq!(mic.begun(), 1);

    recorder.stop().await.expect("stop");
    assert_eq!(queue.pending_jobs().await.expect("jobs").len(), 1);
}

#[tokio::test]
async fn missing_permission_is_reported_and_nothing_records() {
    let (tmp, db) = temp_db();
    let (recorder, queue, sink) =
        recorder(&tmp, &db, FakeMicrophone::without_permission(), Duration::from_secs(1));

    let err = recorder.start().await.expect_err("permission denied");
    assert!(matches!(err, PipelineError::PermissionDenied(_)));
    assert!(!recorder.is_recording().await);
    assert!(queue.pending_jobs().await.expect("jobs").is_empty());

    let shown = sink.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].channel, NotificationChannel::Capture);

    // The host did not get capture, so maintenance must not try to restart it.
    assert!(!recorder.ensure_running().await.expect("ensure running"));
}

#[tokio::test]
async fn primitive_failure_leaves_recorder_idle() {
    let (tmp, db) = temp_db();
    let mic = FakeMicrophone::new();
    mic.fail_next_begins();
    let (recorder, queue, _sink) = recorder(&tmp, &db, mic, Duration::from_secs(1));

    let err = recorder.start().await.expect_err("begin fails");
    assert!(matches!(err, PipelineError::Other(_)));
    assert!(!recorder.is_recording().await);

    let failed = db
        .segments_with_status(SegmentStatus::Failed)
        .await
        .expect("failed segments");
    assert_eq!(failed.len(), 1);
    assert!(queue.pending_jobs().await.expect("jobs").is_empty());
}

#[tokio::test]
async fn rollover_requires_a_running_recorder() {
    let (tmp, db) = temp_db();
    let (recorder, _queue, _sink) = recorder(&tmp, &db, FakeMicrophone::new(), Duration::from_secs(1));

    assert!(recorder.rollover().await.is_err());
    recorder.stop().await.expect("stop while idle");
}

#[tokio::test]
async fn recovery_enqueues_orphans_with_audio_once() {
    let (tmp, db) = temp_db();
    let (recorder, queue, _sink) = recorder(&tmp, &db, FakeMicrophone::new(), Duration::from_secs(60));

    let with_audio = recorded_segment(&db, tmp.path(), b"RIFF....").await;
    let empty = recorded_segment(&db, tmp.path(), b"").await;

    let report = recorder.recover().await.expect("recover");
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.failed, 1);

    let jobs = queue.pending_jobs().await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].source.segment_id(), Some(with_audio.id.as_str()));

    let empty = db.get_segment(&empty.id).await.expect("get").expect("row");
    assert_eq!(empty.status, SegmentStatus::Failed);

    let again = recorder.recover().await.expect("second recover");
    assert_eq!(again.enqueued, 0);
    assert_eq!(queue.pending_jobs().await.expect("jobs").len(), 1);
}
