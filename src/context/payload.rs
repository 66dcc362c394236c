use serde::{Deserialize, Serialize};

use crate::db::{ConversationEntry, TranscriptItem};
use crate::telemetry::TelemetrySnapshot;

/// Everything one generation call sees. Built per cycle and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    /// Oldest first.
    pub conversation_turns: Vec<ConversationEntry>,
    /// Newest first.
    pub transcript_items: Vec<TranscriptItem>,
    pub telemetry: TelemetrySnapshot,
}

/// Collapse an entry onto one line so each entry stays one logical line in the prompt.
pub fn flatten(text: &str) -> String {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ContextPayload {
    pub fn conversation_block(&self) -> String {
        self.conversation_turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), flatten(&turn.content)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn transcript_block(&self) -> String {
        self.transcript_items
            .iter()
            .map(|item| {
                format!(
                    "[{}] {}",
                    item.timestamp.format("%Y-%m-%d %H:%M"),
                    flatten(&item.text)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The user-turn text sent alongside the conversation history.
    pub fn render_context(&self) -> String {
        let transcripts = self.transcript_block();
        let transcripts = if transcripts.is_empty() {
            "(nothing recent)".to_string()
        } else {
            transcripts
        };
        format!(
            "Recently overheard (newest first):\n{transcripts}\n\nDevice context:\n{}",
            self.telemetry.to_json()
        )
    }
}
