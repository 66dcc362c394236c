mod queue;
mod remote;

pub use queue::{DrainReport, UploadQueue};
pub use remote::{DirectoryStore, HttpRemoteStore, RemoteStore};
