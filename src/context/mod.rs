mod assembler;
mod payload;

pub use assembler::{ContextAssembler, ConversationStore, SqliteStores, TranscriptStore};
pub use payload::{flatten, ContextPayload};
