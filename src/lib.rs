pub mod capture;
pub mod context;
pub mod db;
pub mod error;
pub mod feedback;
pub mod generation;
pub mod notify;
mod pipeline;
pub mod retry;
pub mod settings;
pub mod telemetry;
pub mod triggers;
pub mod upload;
pub mod utils;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use tokio::sync::mpsc;

use db::Database;
use error::PipelineError;
use settings::ConfigStore;

pub use pipeline::{Collaborators, Pipeline};

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("THOUGHTSTREAM_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "thoughtstream")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("no home directory to place pipeline data in"))
}

/// Run the pipeline until ctrl-c.
pub async fn run() -> Result<()> {
    utils::logging::init_logging();
    info!("thoughtstream starting up...");

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let config_path = std::env::var("THOUGHTSTREAM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("config.json"));
    let config = ConfigStore::new(config_path)?.snapshot();

    let database = Database::new(data_dir.join("thoughtstream.sqlite3"))?;

    let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
    let collaborators = Collaborators::from_config(&config, feedback_tx)?;
    let pipeline = Pipeline::new(config, &data_dir, database, collaborators);

    // Segments and leases left behind by a previous crash.
    pipeline.recover().await?;

    match pipeline.recorder.start().await {
        Ok(()) => {}
        Err(PipelineError::PermissionDenied(what)) => {
            warn!("capture not started: {what} permission denied")
        }
        Err(err) => error!("capture not started: {err}"),
    }

    let triggers = pipeline.spawn_triggers();

    let feedback = pipeline.feedback.clone();
    let forwarder = tokio::spawn(async move {
        while let Some((notification_id, kind)) = feedback_rx.recv().await {
            let _relay = feedback.on_feedback(notification_id, kind).await;
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");

    pipeline.shutdown(triggers).await;
    forwarder.abort();
    info!("thoughtstream stopped");
    Ok(())
}
