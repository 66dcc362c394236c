use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use thoughtstream_lib::capture::{ActiveRecording, RecordingBackend};
use thoughtstream_lib::context::ContextPayload;
use thoughtstream_lib::db::{Database, Segment, SegmentStatus};
use thoughtstream_lib::error::{PipelineError, PipelineResult};
use thoughtstream_lib::feedback::{FeedbackEvent, FeedbackStore};
use thoughtstream_lib::generation::{GenerationApi, ReachabilityCheck};
use thoughtstream_lib::notify::{Notification, NotificationSink};
use thoughtstream_lib::upload::RemoteStore;

/// Writes a few bytes at begin and a few more at finish, like a real encoder would.
pub(crate) struct FakeMicrophone {
    permitted: bool,
    fail_begin: AtomicBool,
    begun: AtomicUsize,
}

impl FakeMicrophone {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            permitted: true,
            fail_begin: AtomicBool::new(false),
            begun: AtomicUsize::new(0),
        })
    }

    pub(crate) fn without_permission() -> Arc<Self> {
        Arc::new(Self {
            permitted: false,
            fail_begin: AtomicBool::new(false),
            begun: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fail_next_begins(&self) {
        self.fail_begin.store(true, Ordering::SeqCst);
    }

    pub(crate) fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }
}

struct FakeRecording {
    path: PathBuf,
}

#[async_trait]
impl RecordingBackend for FakeMicrophone {
    fn microphone_permitted(&self) -> bool {
        self.permitted
    }

    async fn begin(&self, path: &Path) -> Result<Box<dyn ActiveRecording>> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(anyhow!("device busy"));
        }
        tokio::fs::write(path, b"RIFF").await?;
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecording {
            path: path.to_path_buf(),
        }))
    }
}

#[async_trait]
impl ActiveRecording for FakeRecording {
    async fn finish(self: Box<Self>) -> Result<()> {
        let mut bytes = tokio::fs::read(&self.path).await?;
        bytes.extend_from_slice(b"fmt data");
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

/// Remote store that answers from a script, then succeeds.
#[derive(Default)]
pub(crate) struct ScriptedRemote {
    script: Mutex<VecDeque<PipelineResult<()>>>,
    always_fail: AtomicBool,
    delay: Option<Duration>,
    pub(crate) puts: Mutex<Vec<(String, usize, HashMap<String, String>)>>,
}

impl ScriptedRemote {
    pub(crate) fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_first(times: usize) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut script = remote.script.lock().unwrap();
            for n in 0..times {
                script.push_back(Err(PipelineError::transient(format!("connection reset #{n}"))));
            }
        }
        Arc::new(remote)
    }

    pub(crate) fn rejecting_first(times: usize, reason: &str) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut script = remote.script.lock().unwrap();
            for _ in 0..times {
                script.push_back(Err(PipelineError::malformed(reason.to_string())));
            }
        }
        Arc::new(remote)
    }

    /// Every put takes `delay` before it succeeds.
    pub(crate) fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub(crate) fn always_failing() -> Arc<Self> {
        let remote = Self::default();
        remote.always_fail.store(true, Ordering::SeqCst);
        Arc::new(remote)
    }

    pub(crate) fn calls(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn put(
        &self,
        destination_key: &str,
        bytes: Vec<u8>,
        metadata: &HashMap<String, String>,
    ) -> PipelineResult<()> {
        self.puts
            .lock()
            .unwrap()
            .push((destination_key.to_string(), bytes.len(), metadata.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(PipelineError::transient("503 service unavailable"));
        }
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Keeps every notification shown and every id cancelled.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) shown: Mutex<Vec<Notification>>,
    pub(crate) cancelled: Mutex<Vec<u32>>,
}

impl RecordingSink {
    pub(crate) fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<u32> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: Notification) -> PipelineResult<()> {
        self.shown.lock().unwrap().push(notification);
        Ok(())
    }

    async fn cancel(&self, id: u32) {
        self.cancelled.lock().unwrap().push(id);
    }
}

/// Generation backend answering from a script; an exhausted script keeps repeating `fallback`.
pub(crate) struct ScriptedGeneration {
    script: Mutex<VecDeque<PipelineResult<String>>>,
    fallback: Option<String>,
    pub(crate) payloads: Mutex<Vec<ContextPayload>>,
}

impl ScriptedGeneration {
    pub(crate) fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn scripted(script: Vec<PipelineResult<String>>, fallback: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: fallback.map(str::to_string),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationApi for ScriptedGeneration {
    async fn complete(&self, payload: &ContextPayload) -> PipelineResult<String> {
        self.payloads.lock().unwrap().push(payload.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => Err(PipelineError::transient("model overloaded")),
        }
    }
}

pub(crate) struct Reachable(pub(crate) AtomicBool);

impl Reachable {
    pub(crate) fn yes() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(true)))
    }

    pub(crate) fn no() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }
}

#[async_trait]
impl ReachabilityCheck for Reachable {
    async fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct MemoryFeedbackStore {
    fail: bool,
    pub(crate) events: Mutex<Vec<FeedbackEvent>>,
}

impl MemoryFeedbackStore {
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            events: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn record(&self, event: &FeedbackEvent) -> PipelineResult<()> {
        if self.fail {
            return Err(PipelineError::transient("feedback endpoint returned 502"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A segment row in `Recording` state whose file holds `bytes`.
pub(crate) async fn recorded_segment(db: &Database, dir: &Path, bytes: &[u8]) -> Segment {
    let id = uuid::Uuid::new_v4().to_string();
    let file_path = dir.join(format!("{id}.wav"));
    tokio::fs::write(&file_path, bytes).await.expect("write segment");
    let segment = Segment {
        id,
        file_path,
        created_at: Utc::now(),
        finished_at: None,
        duration_cap_ms: 60_000,
        duration_ms: None,
        status: SegmentStatus::Recording,
    };
    db.insert_segment(&segment).await.expect("insert segment");
    segment
}
