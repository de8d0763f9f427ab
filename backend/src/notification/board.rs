//! In-process notification shade

use super::{
    NotificationChannel, NotificationRecord, NotificationSink, Phase, ProgressBar,
};
use crate::catalog::ItemId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Keeps the latest notification for every item and logs each change
pub struct NotificationBoard {
    channel: &'static NotificationChannel,
    records: RwLock<HashMap<ItemId, NotificationRecord>>,
}

impl NotificationBoard {
    pub fn new(channel: &'static NotificationChannel) -> Self {
        Self {
            channel,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &ItemId) -> Option<NotificationRecord> {
        self.records.read().get(id).cloned()
    }

    /// All current notifications, ordered by item
    pub fn records(&self) -> Vec<NotificationRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn show(&self, id: &ItemId, title: Option<&str>, phase: Phase, progress: Option<ProgressBar>) {
        let mut records = self.records.write();
        let record = records
            .entry(id.clone())
            .or_insert_with(|| NotificationRecord {
                id: id.clone(),
                channel_id: self.channel.id.clone(),
                title: title.unwrap_or(id.as_str()).to_string(),
                phase,
                text: phase.label(),
                progress,
            });

        if let Some(title) = title {
            record.title = title.to_string();
        }
        record.phase = phase;
        record.text = phase.label();
        record.progress = progress;
    }
}

#[async_trait]
impl NotificationSink for NotificationBoard {
    async fn on_started(&self, id: &ItemId, title: &str) {
        info!("[{}] {}: {}", self.channel.id, title, Phase::WaitingForNetwork.label());
        self.show(
            id,
            Some(title),
            Phase::WaitingForNetwork,
            Some(ProgressBar::percent(0)),
        );
    }

    async fn on_progress(&self, id: &ItemId, percent: u8) {
        debug!("[{}] {}: {}%", self.channel.id, id, percent);
        self.show(id, None, Phase::InProgress, Some(ProgressBar::percent(percent)));
    }

    async fn on_succeeded(&self, id: &ItemId) {
        info!("[{}] {}: {}", self.channel.id, id, Phase::Complete.label());
        self.show(id, None, Phase::Complete, None);
    }

    async fn on_failed(&self, id: &ItemId) {
        info!("[{}] {}: {}", self.channel.id, id, Phase::Failed.label());
        self.show(id, None, Phase::Failed, None);
    }

    async fn on_cancelled(&self, id: &ItemId) {
        info!("[{}] {}: {}", self.channel.id, id, Phase::Cancelled.label());
        self.show(id, None, Phase::Cancelled, None);
    }
}
