use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps; entry `n` moves `user_version` from `n` to `n + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("capture and upload queue", include_str!("schemas/schema_v1.sql")),
    ("conversation, transcripts, pipeline state", include_str!("schemas/schema_v2.sql")),
    ("conversation namespaces", include_str!("schemas/schema_v3.sql")),
];

fn target_version() -> i32 {
    MIGRATIONS.len() as i32
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let target = target_version();

    if current > target {
        bail!("database schema v{current} is newer than this build understands (v{target})");
    }
    if current == target {
        return Ok(());
    }

    // All pending steps commit together so a crash never leaves a half-migrated file.
    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, (name, sql)) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("migration v{} ({name}) failed", index + 1))?;
    }
    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("database schema migrated v{current} -> v{target}");
    Ok(())
}
