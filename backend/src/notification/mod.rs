//! Download notifications: one record per item, latest state wins

mod board;
mod channel;

pub use board::NotificationBoard;
pub use channel::NotificationChannel;

use crate::catalog::ItemId;
use async_trait::async_trait;
use serde::Serialize;

/// Receives download lifecycle changes. Each call replaces what is shown for
/// the item, so repeated calls may be coalesced. The coordinator waits for
/// every call to return before publishing the matching state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_started(&self, id: &ItemId, title: &str);

    async fn on_progress(&self, id: &ItemId, percent: u8);

    async fn on_succeeded(&self, id: &ItemId);

    async fn on_failed(&self, id: &ItemId);

    /// Cancellation is shown like a failure unless a sink says otherwise
    async fn on_cancelled(&self, id: &ItemId) {
        self.on_failed(id).await;
    }
}

/// Phase label shown as the notification text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    WaitingForNetwork,
    InProgress,
    Complete,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Self::WaitingForNetwork => "Waiting for network",
            Self::InProgress => "Download in progress",
            Self::Complete => "Download complete",
            Self::Failed => "Download failed",
            Self::Cancelled => "Download cancelled",
        }
    }
}

/// Determinate progress bar of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressBar {
    pub max: u8,
    pub current: u8,
    pub indeterminate: bool,
}

impl ProgressBar {
    pub fn percent(current: u8) -> Self {
        Self {
            max: 100,
            current: current.min(100),
            indeterminate: false,
        }
    }
}

/// What is currently shown for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: ItemId,
    pub channel_id: String,
    pub title: String,
    pub phase: Phase,
    pub text: &'static str,
    /// Cleared once the download has finished
    pub progress: Option<ProgressBar>,
}
