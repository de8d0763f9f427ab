//! Process-wide notification channel

use crate::config::NotificationSettings;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::info;

static CHANNEL: OnceCell<NotificationChannel> = OnceCell::new();

/// The channel every download notification is posted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl NotificationChannel {
    /// Register the channel once; later calls return the first registration
    pub fn init(settings: &NotificationSettings) -> &'static NotificationChannel {
        CHANNEL.get_or_init(|| {
            info!("Registering notification channel {}", settings.channel_id);
            NotificationChannel {
                id: settings.channel_id.clone(),
                name: settings.channel_name.clone(),
                description: settings.channel_description.clone(),
            }
        })
    }

    #[cfg(test)]
    pub fn get() -> Option<&'static NotificationChannel> {
        CHANNEL.get()
    }
}
