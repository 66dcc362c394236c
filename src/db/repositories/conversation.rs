use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_role, row_error, to_u32},
    models::{ConversationEntry, ConversationView, Role, Thought},
    Database,
};

fn row_to_entry(row: &Row) -> Result<ConversationEntry, rusqlite::Error> {
    let role: String = row.get("role")?;
    let created_at: String = row.get("created_at")?;
    Ok(ConversationEntry {
        entry_id: row.get("entry_id")?,
        role: parse_role(&role).map_err(row_error)?,
        content: row.get("content")?,
        created_at: parse_datetime(&created_at, "created_at").map_err(row_error)?,
    })
}

fn row_to_thought(row: &Row) -> Result<Thought, rusqlite::Error> {
    let created_at: String = row.get("created_at")?;
    let notification_id: Option<i64> = row.get("notification_id")?;
    Ok(Thought {
        id: row.get("entry_id")?,
        content: row.get("content")?,
        created_at: parse_datetime(&created_at, "created_at").map_err(row_error)?,
        delivered_notification_id: notification_id
            .map(|id| to_u32(id, "notification_id"))
            .transpose()
            .map_err(row_error)?,
    })
}

impl Database {
    /// Append one entry to every view of `namespace` in a single transaction so the views
    /// never diverge.
    pub async fn append_conversation_entry(
        &self,
        namespace: &str,
        entry: &ConversationEntry,
        notification_id: Option<u32>,
    ) -> Result<()> {
        let namespace = namespace.to_string();
        let entry = entry.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for view in ConversationView::ALL {
                tx.execute(
                    "INSERT INTO conversation_log
                         (namespace, view, entry_id, role, content, notification_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        namespace,
                        view.as_str(),
                        entry.entry_id,
                        entry.role.as_str(),
                        entry.content,
                        notification_id,
                        entry.created_at.to_rfc3339(),
                    ],
                )
                .with_context(|| format!("failed to append to {} log", view.as_str()))?;
            }
            tx.commit().context("failed to commit conversation append")?;
            Ok(())
        })
        .await
    }

    pub async fn append_thought(&self, namespace: &str, thought: &Thought) -> Result<()> {
        let entry = ConversationEntry {
            entry_id: thought.id.clone(),
            role: Role::Assistant,
            content: thought.content.clone(),
            created_at: thought.created_at,
        };
        self.append_conversation_entry(namespace, &entry, thought.delivered_notification_id)
            .await
    }

    /// The newest `limit` entries of a view, returned oldest first.
    pub async fn recent_conversation(
        &self,
        namespace: &str,
        view: ConversationView,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, role, content, created_at FROM conversation_log
                 WHERE namespace = ?1 AND view = ?2
                 ORDER BY seq DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![namespace, view.as_str(), limit as i64], row_to_entry)?;
            let mut entries = Vec::new();
            for entry in rows {
                entries.push(entry?);
            }
            entries.reverse();
            Ok(entries)
        })
        .await
    }

    pub async fn thoughts(&self, namespace: &str, view: ConversationView) -> Result<Vec<Thought>> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, content, notification_id, created_at FROM conversation_log
                 WHERE namespace = ?1 AND view = ?2 AND role = 'assistant'
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![namespace, view.as_str()], row_to_thought)?;
            let mut thoughts = Vec::new();
            for thought in rows {
                thoughts.push(thought?);
            }
            Ok(thoughts)
        })
        .await
    }

    pub async fn conversation_len(&self, namespace: &str, view: ConversationView) -> Result<usize> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversation_log WHERE namespace = ?1 AND view = ?2",
                params![namespace, view.as_str()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
        .await
    }
}
