use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::{ConversationEntry, ConversationView, Database, TranscriptItem};
use crate::telemetry::TelemetrySnapshot;

use super::payload::ContextPayload;

/// Conversation history, keyed by the store's own namespace.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Newest `limit` turns, oldest first.
    async fn recent_turns(&self, limit: usize) -> Result<Vec<ConversationEntry>>;
    async fn append(&self, entry: &ConversationEntry) -> Result<()>;
}

/// Transcribed speech produced by an external transcription collaborator.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Most recent `limit` items, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<TranscriptItem>>;
    async fn append(&self, item: &TranscriptItem) -> Result<()>;
}

/// SQLite-backed stores scoped to one namespace. Conversation reads come from the complete
/// view; appends go to every view together.
#[derive(Clone)]
pub struct SqliteStores {
    db: Database,
    namespace: String,
}

impl SqliteStores {
    pub fn new(db: Database, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteStores {
    async fn recent_turns(&self, limit: usize) -> Result<Vec<ConversationEntry>> {
        self.db
            .recent_conversation(&self.namespace, ConversationView::Complete, limit)
            .await
    }

    async fn append(&self, entry: &ConversationEntry) -> Result<()> {
        self.db
            .append_conversation_entry(&self.namespace, entry, None)
            .await
    }
}

#[async_trait]
impl TranscriptStore for SqliteStores {
    async fn recent(&self, limit: usize) -> Result<Vec<TranscriptItem>> {
        self.db.recent_transcripts(&self.namespace, limit).await
    }

    async fn append(&self, item: &TranscriptItem) -> Result<()> {
        self.db.append_transcript(&self.namespace, item).await
    }
}

/// Builds the bounded prompt context. Read-only over its stores.
#[derive(Clone)]
pub struct ContextAssembler {
    conversations: Arc<dyn ConversationStore>,
    transcripts: Arc<dyn TranscriptStore>,
}

impl ContextAssembler {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        transcripts: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            conversations,
            transcripts,
        }
    }

    /// Newest `max_conversation_turns` turns (returned oldest first) and newest
    /// `max_transcript_items` transcript items (returned newest first). Caps hold even if a
    /// store hands back more than asked.
    pub async fn assemble(
        &self,
        max_conversation_turns: usize,
        max_transcript_items: usize,
        telemetry: TelemetrySnapshot,
    ) -> Result<ContextPayload> {
        let mut turns = if max_conversation_turns == 0 {
            Vec::new()
        } else {
            self.conversations.recent_turns(max_conversation_turns).await?
        };
        turns.sort_by_key(|turn| turn.created_at);
        if turns.len() > max_conversation_turns {
            turns.drain(..turns.len() - max_conversation_turns);
        }

        let mut items = if max_transcript_items == 0 {
            Vec::new()
        } else {
            self.transcripts.recent(max_transcript_items).await?
        };
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(max_transcript_items);

        Ok(ContextPayload {
            conversation_turns: turns,
            transcript_items: items,
            telemetry,
        })
    }
}
