//! Concurrent per-item download management

mod coordinator;
mod error;
mod progress;
mod registry;
mod sink;
mod source;
mod state;
mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{DownloadCoordinator, DownloadStats, RequestOutcome};
pub use source::{HttpSource, TransferSource};
pub use state::{DownloadState, StateUpdate};
pub use task::{DownloadRequest, TaskOptions};
