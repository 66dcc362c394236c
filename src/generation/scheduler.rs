use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ContextAssembler;
use crate::db::{Database, Thought, LAST_GENERATION_AT};
use crate::error::{PipelineError, PipelineResult};
use crate::notify::{next_notification_id, Notification, NotificationSink};
use crate::retry::RetryPolicy;
use crate::telemetry::TelemetrySampler;

use super::client::GenerationApi;
use super::reachability::ReachabilityCheck;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TooSoon { next_allowed: DateTime<Utc> },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The eligibility gate said no; nothing was written.
    Skipped(SkipReason),
    /// The backend had nothing to say. A normal outcome.
    NothingToSay,
    Delivered(Thought),
}

/// One proactive-generation cycle per trigger: gate, assemble context, call the backend with
/// retries, then persist the thought and raise its notification.
///
/// Overlapping runs are tolerated; each append is atomic and identical replies are not
/// deduplicated.
pub struct GenerationScheduler {
    db: Database,
    namespace: String,
    assembler: ContextAssembler,
    sampler: Arc<TelemetrySampler>,
    api: Arc<dyn GenerationApi>,
    reachability: Arc<dyn ReachabilityCheck>,
    notifier: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    min_spacing: Duration,
    max_conversation_turns: usize,
    max_transcript_items: usize,
}

impl GenerationScheduler {
    pub fn new(
        db: Database,
        namespace: impl Into<String>,
        assembler: ContextAssembler,
        sampler: Arc<TelemetrySampler>,
        api: Arc<dyn GenerationApi>,
        reachability: Arc<dyn ReachabilityCheck>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            db,
            namespace: namespace.into(),
            assembler,
            sampler,
            api,
            reachability,
            notifier,
            policy: RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30)),
            min_spacing: Duration::from_secs(900),
            max_conversation_turns: 20,
            max_transcript_items: 30,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_min_spacing(mut self, min_spacing: Duration) -> Self {
        self.min_spacing = min_spacing;
        self
    }

    pub fn with_limits(mut self, max_conversation_turns: usize, max_transcript_items: usize) -> Self {
        self.max_conversation_turns = max_conversation_turns;
        self.max_transcript_items = max_transcript_items;
        self
    }

    pub async fn run_once(&self) -> PipelineResult<GenerationOutcome> {
        let now = Utc::now();
        if let Some(reason) = self.check_gate(now).await? {
            log_info!("generation skipped: {reason:?}");
            return Ok(GenerationOutcome::Skipped(reason));
        }

        self.db
            .set_state(LAST_GENERATION_AT, &now.to_rfc3339())
            .await?;

        let telemetry = self.sampler.sample().await;
        let payload = self
            .assembler
            .assemble(
                self.max_conversation_turns,
                self.max_transcript_items,
                telemetry,
            )
            .await?;

        let reply = self
            .policy
            .run("generation", |_| self.api.complete(&payload))
            .await?;

        let Some(content) = meaningful(&reply) else {
            log_info!("generation returned nothing to say");
            return Ok(GenerationOutcome::NothingToSay);
        };

        let notification_id = next_notification_id();
        let thought = Thought {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            delivered_notification_id: Some(notification_id),
        };
        self.db.append_thought(&self.namespace, &thought).await?;

        if let Err(err) = self
            .notifier
            .show(Notification::thought(notification_id, &thought.content))
            .await
        {
            log_warn!("thought {} saved but its notification failed: {err}", thought.id);
        }
        log_info!("delivered thought {} as notification {notification_id}", thought.id);
        Ok(GenerationOutcome::Delivered(thought))
    }

    async fn check_gate(&self, now: DateTime<Utc>) -> PipelineResult<Option<SkipReason>> {
        let spacing = chrono::Duration::from_std(self.min_spacing)
            .map_err(|err| PipelineError::Other(err.into()))?;
        if let Some(last) = self.db.get_state_datetime(LAST_GENERATION_AT).await? {
            let next_allowed = last + spacing;
            if now < next_allowed {
                return Ok(Some(SkipReason::TooSoon { next_allowed }));
            }
        }

        if !self.reachability.is_reachable().await {
            return Ok(Some(SkipReason::Unreachable));
        }
        Ok(None)
    }
}

/// Trimmed reply, or `None` for empty and `null` sentinels.
fn meaningful(reply: &str) -> Option<&str> {
    let trimmed = reply.trim().trim_matches('"').trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(reply.trim())
    }
}
