use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::{
    helpers::{parse_datetime, row_error},
    models::TranscriptItem,
    Database,
};

impl Database {
    pub async fn append_transcript(&self, namespace: &str, item: &TranscriptItem) -> Result<()> {
        let namespace = namespace.to_string();
        let item = item.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO transcripts (namespace, timestamp, text) VALUES (?1, ?2, ?3)",
                params![namespace, item.timestamp.to_rfc3339(), item.text],
            )
            .with_context(|| "failed to append transcript")?;
            Ok(())
        })
        .await
    }

    /// The `limit` most recent transcript items, newest first.
    pub async fn recent_transcripts(
        &self,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptItem>> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, text FROM transcripts
                 WHERE namespace = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![namespace, limit as i64], |row| {
                let timestamp: String = row.get(0)?;
                Ok(TranscriptItem {
                    timestamp: parse_datetime(&timestamp, "timestamp").map_err(row_error)?,
                    text: row.get(1)?,
                })
            })?;
            let mut items = Vec::new();
            for item in rows {
                items.push(item?);
            }
            Ok(items)
        })
        .await
    }
}
