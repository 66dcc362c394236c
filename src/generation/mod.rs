mod client;
mod reachability;
mod scheduler;

pub use client::{GenerationApi, HttpGenerationClient};
pub use reachability::{HttpReachability, ReachabilityCheck};
pub use scheduler::{GenerationOutcome, GenerationScheduler, SkipReason};
