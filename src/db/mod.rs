use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod helpers;
mod migrations;
pub mod models;
mod repositories;

use migrations::run_migrations;

pub use models::{
    ConversationEntry, ConversationView, JobStatus, Role, Segment, SegmentStatus, Thought,
    TranscriptItem, UploadJob, UploadSource,
};
pub use repositories::state::LAST_GENERATION_AT;
pub use repositories::upload_jobs::{ClaimedJob, FailureOutcome};

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Close,
}

struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(thread) = thread else {
            return;
        };

        if self.requests.send(Request::Close).is_err() {
            warn!("database thread already gone at shutdown");
        }
        if let Err(panic) = thread.join() {
            error!("database thread panicked: {panic:?}");
        }
    }
}

/// Handle to the pipeline's SQLite file.
///
/// A single connection lives on a dedicated thread; every call is a closure run there, so each
/// repository operation is atomic with respect to every other one without a process-wide lock.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;

    // The capture loop and the drain write concurrently with the generation trigger.
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to enable WAL")?;
    if !mode.eq_ignore_ascii_case("wal") {
        warn!("SQLite kept journal_mode={mode}; concurrent readers will block on writes");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, requests: mpsc::Receiver<Request>) {
    while let Ok(request) = requests.recv() {
        match request {
            Request::Run(job) => job(&mut conn),
            Request::Close => break,
        }
    }
    info!("database thread shutting down");
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = db_path.clone();

        let thread = thread::Builder::new()
            .name("thoughtstream-db".into())
            .spawn(move || match open_connection(&thread_path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, request_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database thread")?;

        ready_rx
            .recv()
            .context("database thread exited before it was ready")??;
        info!("database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                requests: request_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `task` on the database thread and wait for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                warn!("database caller went away before its result was ready");
            }
        });

        self.worker
            .requests
            .send(Request::Run(job))
            .map_err(|_| anyhow!("database thread is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }
}
