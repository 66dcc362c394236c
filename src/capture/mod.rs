mod backend;
mod controller;
mod loop_worker;

pub use backend::{ActiveRecording, CommandBackend, RecordingBackend};
pub use controller::{RecoveryReport, SegmentRecorder};
