//! Import pipeline: fetch -> filter -> dedupe -> assemble -> persist -> commit.

pub mod dedup;
pub mod filters;
pub mod orchestrator;
pub mod persistence;
pub mod retry;
pub mod store;
pub mod threads;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{CancelHandle, Collaborators, SyncEvent, SyncOrchestrator};
pub use retry::RetryPolicy;
