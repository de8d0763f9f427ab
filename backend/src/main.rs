//! Picsum Downloader - browse a remote photo catalog and download images
//!
//! Fetches a sample of the catalog, serves it over a small HTTP API and
//! downloads selected images concurrently, with per-item progress streamed
//! over a WebSocket and mirrored into one notification per download.

mod catalog;
mod config;
mod download;
mod notification;
mod server;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::catalog::{Catalog, CatalogClient};
use crate::config::Settings;
use crate::download::{DownloadCoordinator, HttpSource, TaskOptions, TransferSource};
use crate::notification::{NotificationBoard, NotificationChannel};

/// How long cancelled downloads get to clean up on exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across all components
pub struct AppState {
    pub settings: Settings,
    pub catalog: Catalog,
    pub downloads: DownloadCoordinator,
    pub notifications: Arc<NotificationBoard>,
}

impl AppState {
    /// Wire everything to the network. Must be called inside the runtime.
    pub fn new(settings: Settings) -> Result<Self> {
        let source = HttpSource::from_settings(&settings.downloads)?;
        let catalog_client = CatalogClient::new(source.client().clone(), &settings.catalog.base_url)?;
        Self::build(settings, catalog_client, Arc::new(source))
    }

    /// Like [`AppState::new`] but downloads through `source`
    #[cfg(test)]
    pub fn with_source(settings: Settings, source: Arc<dyn TransferSource>) -> Result<Self> {
        let catalog_client = CatalogClient::new(reqwest::Client::new(), &settings.catalog.base_url)?;
        Self::build(settings, catalog_client, source)
    }

    fn build(
        settings: Settings,
        catalog_client: CatalogClient,
        source: Arc<dyn TransferSource>,
    ) -> Result<Self> {
        let channel = NotificationChannel::init(&settings.notifications);
        let notifications = Arc::new(NotificationBoard::new(channel));

        let downloads = DownloadCoordinator::new(
            source,
            TaskOptions::from(&settings.downloads),
            settings.downloads.max_concurrent_downloads,
            notifications.clone(),
        );
        let catalog = Catalog::new(catalog_client, settings.catalog.sample_size);

        Ok(Self {
            settings,
            catalog,
            downloads,
            notifications,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Picsum Downloader v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = config::load_or_create_default()?;
    info!("Configuration loaded from {:?}", config::config_path());
    info!("Images are saved to {}", settings.downloads.directory.display());

    let state = Arc::new(AppState::new(settings)?);

    // Load the catalog in the background; a failure is reported by the list endpoint
    let catalog = state.catalog.clone();
    tokio::spawn(async move {
        let _ = catalog.refresh().await;
    });

    server::run(Arc::clone(&state)).await?;

    // Let cancelled downloads remove their partial files before exiting
    state.downloads.shutdown(SHUTDOWN_GRACE).await;
    info!("Shutdown complete");
    Ok(())
}
