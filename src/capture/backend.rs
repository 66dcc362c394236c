use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::{Child, Command};

use crate::settings::CaptureSettings;

/// The platform recording primitive: one call per segment file.
#[async_trait]
pub trait RecordingBackend: Send + Sync {
    fn microphone_permitted(&self) -> bool;

    /// Start writing audio to `path`. Errors leave no recording running.
    async fn begin(&self, path: &Path) -> Result<Box<dyn ActiveRecording>>;
}

#[async_trait]
pub trait ActiveRecording: Send {
    /// Stop recording and flush the file.
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Records by running an external program (`arecord`, `ffmpeg`, `sox`, ...) per segment.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    microphone_enabled: bool,
}

impl CommandBackend {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            microphone_enabled: settings.microphone_enabled,
        }
    }

    fn expand_args(&self, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{path}", &path))
            .collect()
    }
}

#[async_trait]
impl RecordingBackend for CommandBackend {
    fn microphone_permitted(&self) -> bool {
        self.microphone_enabled
    }

    async fn begin(&self, path: &Path) -> Result<Box<dyn ActiveRecording>> {
        let mut child = Command::new(&self.program)
            .args(self.expand_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn recorder {}", self.program))?;

        // A recorder that dies immediately (device busy, bad args) is a start failure.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if let Some(status) = child.try_wait()? {
            return Err(anyhow!("recorder {} exited at start with {status}", self.program));
        }

        debug!("recorder {} writing {}", self.program, path.display());
        Ok(Box::new(CommandRecording {
            child,
            path: path.to_path_buf(),
        }))
    }
}

struct CommandRecording {
    child: Child,
    path: PathBuf,
}

#[async_trait]
impl ActiveRecording for CommandRecording {
    async fn finish(mut self: Box<Self>) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            self.child
                .start_kill()
                .with_context(|| format!("failed to stop recorder for {}", self.path.display()))?;
        }
        let status = self.child.wait().await?;
        if !status.success() {
            // Killed recorders report a signal exit; the file is still usable.
            debug!("recorder for {} exited with {status}", self.path.display());
        }
        if tokio::fs::metadata(&self.path).await.is_err() {
            warn!("recorder left no file at {}", self.path.display());
        }
        Ok(())
    }
}
