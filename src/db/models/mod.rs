pub mod conversation;
pub mod segment;
pub mod transcript;
pub mod upload_job;

pub use conversation::{ConversationEntry, ConversationView, Role, Thought};
pub use segment::{Segment, SegmentStatus};
pub use transcript::TranscriptItem;
pub use upload_job::{JobStatus, UploadJob, UploadSource};
