//! Per-item download state and the lifecycle events that drive it

use super::error::FailureKind;
use crate::catalog::ItemId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Lifecycle event emitted by a download task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { title: String },
    Progress(u8),
    Succeeded { path: PathBuf },
    Failed(FailureKind),
    Cancelled,
}

/// An event tagged with the item it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub id: ItemId,
    pub event: DownloadEvent,
}

/// The single source of truth for what the list and notifications show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", content = "percent", rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Idle,
    InProgress(u8),
    Succeeded,
    Failed,
}

impl DownloadState {
    /// State after `event`, or `None` when the transition is not allowed
    pub fn apply(self, event: &DownloadEvent) -> Option<Self> {
        use DownloadEvent as E;

        match (self, event) {
            (Self::Idle | Self::Failed, E::Started { .. }) => Some(Self::InProgress(0)),
            (Self::InProgress(current), E::Progress(percent)) if *percent >= current => {
                Some(Self::InProgress((*percent).min(100)))
            }
            (Self::InProgress(_), E::Succeeded { .. }) => Some(Self::Succeeded),
            (Self::InProgress(_), E::Failed(_)) => Some(Self::Failed),
            // A cancelled item can be downloaded again
            (Self::InProgress(_), E::Cancelled) => Some(Self::Idle),
            _ => None,
        }
    }
}

/// State change broadcast to UI subscribers
#[derive(Debug, Clone, Serialize)]
pub struct StateUpdate {
    pub id: ItemId,
    pub state: DownloadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub at: DateTime<Utc>,
}
