use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Projections of the conversation log that are kept in lockstep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationView {
    /// Everything, used as generation context.
    Complete,
    /// What the user-facing client renders.
    Ui,
}

impl ConversationView {
    pub const ALL: [ConversationView; 2] = [ConversationView::Complete, ConversationView::Ui];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationView::Complete => "complete",
            ConversationView::Ui => "ui",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub entry_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One generated assistant message. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub delivered_notification_id: Option<u32>,
}
