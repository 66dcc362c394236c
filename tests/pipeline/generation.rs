use std::sync::Arc;
use std::time::Duration;

use thoughtstream_lib::context::{ContextAssembler, SqliteStores};
use thoughtstream_lib::db::{ConversationView, Database, LAST_GENERATION_AT};
use thoughtstream_lib::error::PipelineError;
use thoughtstream_lib::generation::{GenerationOutcome, GenerationScheduler, SkipReason};
use thoughtstream_lib::notify::{NotificationAction, NotificationChannel};
use thoughtstream_lib::settings::MovementThresholds;
use thoughtstream_lib::telemetry::{FixedLocation, NoMotionSensor, SysfsBattery, TelemetrySampler};

use super::support::{Reachable, RecordingSink, ScriptedGeneration};
use super::{instant_policy, temp_db};

fn sampler(tmp: &tempfile::TempDir) -> Arc<TelemetrySampler> {
    Arc::new(TelemetrySampler::new(
        Arc::new(SysfsBattery::new(Some(tmp.path().join("no-battery")))),
        Arc::new(FixedLocation::new(None, None)),
        Arc::new(NoMotionSensor),
        MovementThresholds::default(),
    ))
}

fn scheduler(
    tmp: &tempfile::TempDir,
    db: &Database,
    api: Arc<ScriptedGeneration>,
    reachable: Arc<Reachable>,
    sink: Arc<RecordingSink>,
) -> GenerationScheduler {
    let stores = Arc::new(SqliteStores::new(db.clone(), "device-1"));
    GenerationScheduler::new(
        db.clone(),
        "device-1",
        ContextAssembler::new(stores.clone(), stores),
        sampler(tmp),
        api,
        reachable,
        sink,
    )
    .with_policy(instant_policy(3))
    .with_min_spacing(Duration::ZERO)
}

#[tokio::test]
async fn each_run_appends_a_thought_to_every_view_and_notifies() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(
        &tmp,
        &db,
        ScriptedGeneration::replying("Take an umbrella, rain starts at five."),
        Reachable::yes(),
        sink.clone(),
    );

    for _ in 0..2 {
        let outcome = scheduler.run_once().await.expect("run");
        assert!(matches!(outcome, GenerationOutcome::Delivered(_)));
    }

    let complete = db.thoughts("device-1", ConversationView::Complete).await.expect("complete");
    let ui = db.thoughts("device-1", ConversationView::Ui).await.expect("ui");
    assert_eq!(complete.len(), 2);
    assert_eq!(complete, ui);
    assert_ne!(complete[0].id, complete[1].id);

    let shown = sink.shown();
    assert_eq!(shown.len(), 2);
    for (thought, notification) in complete.iter().zip(&shown) {
        assert_eq!(thought.delivered_notification_id, Some(notification.id));
        assert_eq!(notification.channel, NotificationChannel::Thoughts);
        assert_eq!(
            notification.actions,
            vec![NotificationAction::Good, NotificationAction::Bad]
        );
        assert_eq!(notification.text, thought.content);
    }
}

#[tokio::test]
async fn empty_reply_means_nothing_to_say() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::replying("   ");
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::yes(), sink.clone());

    let outcome = scheduler.run_once().await.expect("run");
    assert_eq!(outcome, GenerationOutcome::NothingToSay);
    assert_eq!(api.calls(), 1);
    assert_eq!(db.conversation_len("device-1", ConversationView::Complete).await.expect("len"), 0);
    assert_eq!(db.conversation_len("device-1", ConversationView::Ui).await.expect("len"), 0);
    assert!(sink.shown().is_empty());
}

#[tokio::test]
async fn unreachable_backend_skips_without_side_effects() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::replying("hello");
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::no(), sink.clone());

    let outcome = scheduler.run_once().await.expect("run");
    assert_eq!(outcome, GenerationOutcome::Skipped(SkipReason::Unreachable));
    assert_eq!(api.calls(), 0);
    assert!(db.get_state(LAST_GENERATION_AT).await.expect("state").is_none());
    assert_eq!(db.conversation_len("device-1", ConversationView::Complete).await.expect("len"), 0);
    assert!(sink.shown().is_empty());
}

#[tokio::test]
async fn runs_closer_than_min_spacing_are_skipped() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::replying("Stretch your legs.");
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::yes(), sink.clone())
        .with_min_spacing(Duration::from_secs(3_600));

    assert!(matches!(
        scheduler.run_once().await.expect("first run"),
        GenerationOutcome::Delivered(_)
    ));
    assert!(matches!(
        scheduler.run_once().await.expect("second run"),
        GenerationOutcome::Skipped(SkipReason::TooSoon { .. })
    ));
    assert_eq!(api.calls(), 1);
    assert_eq!(sink.shown().len(), 1);
}

#[tokio::test]
async fn transient_backend_failure_is_retried() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::scripted(
        vec![Err(PipelineError::transient("429 too many requests"))],
        Some("Your meeting starts in ten minutes."),
    );
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::yes(), sink.clone());

    let outcome = scheduler.run_once().await.expect("run");
    assert!(matches!(outcome, GenerationOutcome::Delivered(_)));
    assert_eq!(api.calls(), 2);
    assert_eq!(sink.shown().len(), 1);
}

#[tokio::test]
async fn exhausted_backend_returns_terminal_error() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::scripted(Vec::new(), None);
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::yes(), sink.clone());

    let err = scheduler.run_once().await.expect_err("terminal");
    assert!(matches!(err, PipelineError::Terminal { attempts: 3, .. }));
    assert_eq!(api.calls(), 3);
    assert_eq!(db.conversation_len("device-1", ConversationView::Complete).await.expect("len"), 0);
    assert!(sink.shown().is_empty());
}

#[tokio::test]
async fn generated_thoughts_feed_the_next_context() {
    let (tmp, db) = temp_db();
    let sink = Arc::new(RecordingSink::default());
    let api = ScriptedGeneration::replying("Drink some water.");
    let scheduler = scheduler(&tmp, &db, api.clone(), Reachable::yes(), sink);

    scheduler.run_once().await.expect("first");
    scheduler.run_once().await.expect("second");

    let payloads = api.payloads.lock().unwrap().clone();
    assert!(payloads[0].conversation_turns.is_empty());
    assert_eq!(payloads[1].conversation_turns.len(), 1);
    assert_eq!(payloads[1].conversation_turns[0].content, "Drink some water.");
    assert_eq!(payloads[1].telemetry.battery_percent, None);
}
