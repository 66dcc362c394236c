pub mod conversation;
pub mod segments;
pub mod state;
pub mod transcripts;
pub mod upload_jobs;
