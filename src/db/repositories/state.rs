use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{helpers::parse_datetime, Database};

pub const LAST_GENERATION_AT: &str = "last_generation_at";

impl Database {
    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM pipeline_state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pipeline_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| "failed to write pipeline state")?;
            Ok(())
        })
        .await
    }

    pub async fn get_state_datetime(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_state(key).await? {
            Some(raw) => parse_datetime(&raw, key).map(Some),
            None => Ok(None),
        }
    }
}
