//! Notification delivery.
//!
//! Two logical channels: capture-state notices (recording started/stopped, upload gave up) and
//! generated thoughts, which carry Good/Bad actions plus a dismiss callback.

mod desktop;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

pub use desktop::DesktopNotifier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum NotificationChannel {
    Capture,
    Thoughts,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Capture => "capture",
            NotificationChannel::Thoughts => "thoughts",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationAction {
    Good,
    Bad,
}

impl NotificationAction {
    pub fn key(&self) -> &'static str {
        match self {
            NotificationAction::Good => "good",
            NotificationAction::Bad => "bad",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NotificationAction::Good => "Good",
            NotificationAction::Bad => "Bad",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: u32,
    pub channel: NotificationChannel,
    pub title: String,
    pub text: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn capture(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: next_notification_id(),
            channel: NotificationChannel::Capture,
            title: title.into(),
            text: text.into(),
            actions: Vec::new(),
        }
    }

    pub fn thought(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            channel: NotificationChannel::Thoughts,
            title: "New thought".into(),
            text: text.into(),
            actions: vec![NotificationAction::Good, NotificationAction::Bad],
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: Notification) -> PipelineResult<()>;

    /// Remove a live notification. Unknown ids are ignored.
    async fn cancel(&self, id: u32);
}

/// Process-unique notification ids, seeded from the clock so ids from an earlier run are
/// unlikely to collide with this one.
pub fn next_notification_id() -> u32 {
    static NEXT: OnceLock<AtomicU32> = OnceLock::new();
    let counter = NEXT.get_or_init(|| {
        let seed = chrono::Utc::now().timestamp_millis().rem_euclid(i32::MAX as i64) as u32;
        AtomicU32::new(seed.max(1))
    });
    counter.fetch_add(1, Ordering::Relaxed)
}

/// Headless sink: notifications are only logged.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn show(&self, notification: Notification) -> PipelineResult<()> {
        info!(
            "[{}] notification {}: {} - {}",
            notification.channel.as_str(),
            notification.id,
            notification.title,
            notification.text
        );
        Ok(())
    }

    async fn cancel(&self, id: u32) {
        info!("notification {id} cancelled");
    }
}
