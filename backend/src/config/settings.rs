//! Settings data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server configuration
    pub server: ServerSettings,

    /// Remote photo catalog
    pub catalog: CatalogSettings,

    /// Download behaviour and destination
    pub downloads: DownloadSettings,

    /// Notification channel shown for every download
    pub notifications: NotificationSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to (0.0.0.0 for LAN access)
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Catalog API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Base URL of the catalog API; the list lives at `{base_url}list`
    pub base_url: String,

    /// How many entries of the remote list are shown
    pub sample_size: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: "https://picsum.photos/".to_string(),
            sample_size: 20,
        }
    }
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Directory downloaded images are written to
    pub directory: PathBuf,

    /// Bytes read from the connection per iteration
    pub chunk_size: usize,

    /// Capacity of the buffered reader in front of the connection
    pub buffer_capacity: usize,

    pub connect_timeout_secs: u64,

    pub read_timeout_secs: u64,

    /// Maximum number of concurrent downloads, 0 for no limit
    pub max_concurrent_downloads: usize,

    /// Leave `.part` files on disk after a failed or cancelled download
    pub keep_partial_files: bool,

    pub user_agent: String,
}

impl DownloadSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let pictures_dir = dirs::picture_dir().unwrap_or_else(|| PathBuf::from("./Pictures"));

        Self {
            directory: pictures_dir.join("Picsum"),
            chunk_size: 1024,
            buffer_capacity: 8192,
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            max_concurrent_downloads: 0,
            keep_partial_files: false,
            user_agent: format!("PicsumDownloader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub channel_id: String,
    pub channel_name: String,
    pub channel_description: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_id: "downloader_channel".to_string(),
            channel_name: "Downloader Notification Channel".to_string(),
            channel_description: "Progress of image downloads".to_string(),
        }
    }
}
