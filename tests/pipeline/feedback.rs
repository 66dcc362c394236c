use std::sync::Arc;

use thoughtstream_lib::feedback::{FeedbackChannel, FeedbackKind};

use super::support::{MemoryFeedbackStore, RecordingSink};

#[tokio::test]
async fn explicit_feedback_closes_notification_and_is_relayed() {
    let store = Arc::new(MemoryFeedbackStore::default());
    let sink = Arc::new(RecordingSink::default());
    let channel = FeedbackChannel::new(store.clone(), sink.clone());

    channel
        .on_feedback(41, FeedbackKind::Good)
        .await
        .await
        .expect("relay task");
    channel
        .on_feedback(42, FeedbackKind::Bad)
        .await
        .await
        .expect("relay task");

    assert_eq!(sink.cancelled(), vec![41, 42]);
    let events = store.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].notification_id, 41);
    assert_eq!(events[0].kind, FeedbackKind::Good);
    assert_eq!(events[1].kind, FeedbackKind::Bad);
}

#[tokio::test]
async fn dismissal_is_relayed_without_cancelling() {
    let store = Arc::new(MemoryFeedbackStore::default());
    let sink = Arc::new(RecordingSink::default());
    let channel = FeedbackChannel::new(store.clone(), sink.clone());

    channel
        .on_feedback(7, FeedbackKind::Dismissed)
        .await
        .await
        .expect("relay task");

    assert!(sink.cancelled().is_empty());
    let events = store.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FeedbackKind::Dismissed);
}

#[tokio::test]
async fn relay_failure_is_swallowed() {
    let sink = Arc::new(RecordingSink::default());
    let channel = FeedbackChannel::new(MemoryFeedbackStore::failing(), sink.clone());

    let relay = channel.on_feedback(9, FeedbackKind::Good).await;
    relay.await.expect("failed relay still completes");
    assert_eq!(sink.cancelled(), vec![9]);
}
