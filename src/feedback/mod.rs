//! Relay of user reactions to delivered thoughts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{PipelineError, PipelineResult};
use crate::notify::NotificationSink;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackKind {
    Good,
    Bad,
    Dismissed,
}

impl FeedbackKind {
    /// Explicit verdicts close the notification; a passive dismissal already did.
    pub fn is_explicit(&self) -> bool {
        matches!(self, FeedbackKind::Good | FeedbackKind::Bad)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub notification_id: u32,
    pub kind: FeedbackKind,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn record(&self, event: &FeedbackEvent) -> PipelineResult<()>;
}

/// POSTs each event as JSON.
pub struct HttpFeedbackStore {
    client: reqwest::Client,
    endpoint: String,
    namespace: String,
}

impl HttpFeedbackStore {
    pub fn new(endpoint: impl Into<String>, namespace: impl Into<String>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| PipelineError::Other(anyhow::anyhow!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            namespace: namespace.into(),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackBody<'a> {
    user: &'a str,
    #[serde(flatten)]
    event: &'a FeedbackEvent,
}

#[async_trait]
impl FeedbackStore for HttpFeedbackStore {
    async fn record(&self, event: &FeedbackEvent) -> PipelineResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&FeedbackBody {
                user: &self.namespace,
                event,
            })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PipelineError::transient(format!("feedback endpoint returned {status}")))
        }
    }
}

/// Receives Good/Bad/Dismissed reactions and forwards them without blocking the caller.
#[derive(Clone)]
pub struct FeedbackChannel {
    store: Arc<dyn FeedbackStore>,
    notifications: Arc<dyn NotificationSink>,
}

impl FeedbackChannel {
    pub fn new(store: Arc<dyn FeedbackStore>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Handle one reaction. The relay runs on its own task; its failure is logged and dropped.
    /// The returned handle is only for callers that want to wait (tests, shutdown).
    pub async fn on_feedback(&self, notification_id: u32, kind: FeedbackKind) -> JoinHandle<()> {
        if kind.is_explicit() {
            self.notifications.cancel(notification_id).await;
        }

        let event = FeedbackEvent {
            notification_id,
            kind,
            timestamp: Utc::now(),
        };
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.record(&event).await {
                Ok(()) => info!(
                    "feedback {:?} for notification {} relayed",
                    event.kind, event.notification_id
                ),
                Err(err) => warn!(
                    "feedback {:?} for notification {} not relayed: {err}",
                    event.kind, event.notification_id
                ),
            }
        })
    }
}
