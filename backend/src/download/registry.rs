//! Active download registry

use super::error::FailureKind;
use super::state::{DownloadEvent, TaskEvent};
use crate::catalog::ItemId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a download request did not start a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyActive,
    AlreadyDownloaded,
}

/// Items with a running task, plus items that already finished successfully.
/// Always used behind the coordinator's lock.
#[derive(Debug, Default)]
pub struct ActiveDownloadRegistry {
    active: HashMap<ItemId, CancellationToken>,
    completed: HashSet<ItemId>,
}

impl ActiveDownloadRegistry {
    /// Check and insert in one step
    pub fn try_begin(&mut self, id: &ItemId) -> Result<CancellationToken, Rejection> {
        if self.active.contains_key(id) {
            return Err(Rejection::AlreadyActive);
        }
        if self.completed.contains(id) {
            return Err(Rejection::AlreadyDownloaded);
        }

        let token = CancellationToken::new();
        self.active.insert(id.clone(), token.clone());
        Ok(token)
    }

    /// Remove the entry for `id`; returns whether one was present
    pub fn finish(&mut self, id: &ItemId, succeeded: bool) -> bool {
        if succeeded {
            self.completed.insert(id.clone());
        }
        self.active.remove(id).is_some()
    }

    /// Trigger the cancellation token of an active download
    pub fn cancel(&self, id: &ItemId) -> bool {
        match self.active.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active download
    pub fn cancel_all(&self) {
        for token in self.active.values() {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, id: &ItemId) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Owns one registry entry for the lifetime of a spawned task.
///
/// The entry is released and the terminal event queued under the registry
/// lock, so once a subscriber sees the terminal state the item can be
/// requested again. Dropping the guard without [`ActiveEntry::finish`] (a
/// panicking or aborted task) releases the entry and reports the item as
/// failed.
pub struct ActiveEntry {
    registry: Arc<Mutex<ActiveDownloadRegistry>>,
    events: mpsc::UnboundedSender<TaskEvent>,
    id: ItemId,
    finished: bool,
}

impl ActiveEntry {
    pub fn new(
        registry: Arc<Mutex<ActiveDownloadRegistry>>,
        events: mpsc::UnboundedSender<TaskEvent>,
        id: ItemId,
    ) -> Self {
        Self {
            registry,
            events,
            id,
            finished: false,
        }
    }

    /// Release the entry and queue the task's terminal event
    pub fn finish(mut self, terminal: DownloadEvent) {
        self.finished = true;
        self.release(terminal);
    }

    fn release(&self, terminal: DownloadEvent) {
        let succeeded = matches!(terminal, DownloadEvent::Succeeded { .. });

        // A new task for the item can only queue its events after this one
        let mut registry = self.registry.lock();
        registry.finish(&self.id, succeeded);
        let _ = self.events.send(TaskEvent {
            id: self.id.clone(),
            event: terminal,
        });
    }
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        if !self.finished {
            self.release(DownloadEvent::Failed(FailureKind::Aborted));
        }
    }
}
