use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::{PipelineError, PipelineResult};
use crate::feedback::FeedbackKind;

use super::{Notification, NotificationSink};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_warn};

/// Desktop notifications through `notify-send`.
///
/// Notifications with actions are shown with `--wait`; the chosen action (or a dismissal) is
/// sent on the feedback channel as `(notification_id, kind)`.
pub struct DesktopNotifier {
    program: String,
    feedback_tx: mpsc::UnboundedSender<(u32, FeedbackKind)>,
    live: Arc<Mutex<HashMap<u32, AbortHandle>>>,
}

impl DesktopNotifier {
    pub fn new(feedback_tx: mpsc::UnboundedSender<(u32, FeedbackKind)>) -> Self {
        Self {
            program: "notify-send".into(),
            feedback_tx,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_command(&self, notification: &Notification) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--app-name=thoughtstream")
            .arg(format!("--category={}", notification.channel.as_str()));
        if !notification.actions.is_empty() {
            command.arg("--wait");
            for action in &notification.actions {
                command.arg(format!("--action={}={}", action.key(), action.label()));
            }
        }
        command
            .arg(&notification.title)
            .arg(&notification.text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

fn parse_selection(stdout: &str) -> FeedbackKind {
    match stdout.trim() {
        "good" => FeedbackKind::Good,
        "bad" => FeedbackKind::Bad,
        _ => FeedbackKind::Dismissed,
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifier {
    async fn show(&self, notification: Notification) -> PipelineResult<()> {
        let mut child = self
            .build_command(&notification)
            .spawn()
            .map_err(|err| PipelineError::transient(format!("{} failed to start: {err}", self.program)))?;

        if notification.actions.is_empty() {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Ok(());
        }

        let id = notification.id;
        let feedback_tx = self.feedback_tx.clone();
        let live = Arc::clone(&self.live);
        let task = tokio::spawn(async move {
            let mut stdout = String::new();
            if let Some(mut pipe) = child.stdout.take() {
                if let Err(err) = pipe.read_to_string(&mut stdout).await {
                    log_warn!("reading notify-send output for {id} failed: {err}");
                }
            }
            let _ = child.wait().await;

            let kind = parse_selection(&stdout);
            log_debug!("notification {id} closed with {kind:?}");
            if let Ok(mut guard) = live.lock() {
                guard.remove(&id);
            }
            let _ = feedback_tx.send((id, kind));
        });

        if let Ok(mut guard) = self.live.lock() {
            guard.insert(id, task.abort_handle());
        }
        Ok(())
    }

    async fn cancel(&self, id: u32) {
        let handle = match self.live.lock() {
            Ok(mut guard) => guard.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
