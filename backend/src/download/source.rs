//! Where download bytes come from

use super::error::DownloadError;
use crate::config::DownloadSettings;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::io;
use tracing::debug;

/// An opened transfer: announced length plus the body
pub struct Transfer {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Opens a connection to a download URL
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<Transfer, DownloadError>;
}

/// Transfers over HTTP with a shared client
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build the shared client with connect and read timeouts
    pub fn from_settings(settings: &DownloadSettings) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout())
            .build()?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl TransferSource for HttpSource {
    async fn open(&self, url: &str) -> Result<Transfer, DownloadError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::Connection(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let content_length = response.content_length();
        debug!("Opened {} with content length {:?}", url, content_length);

        let body = response.bytes_stream().map_err(io::Error::other).boxed();

        Ok(Transfer {
            content_length,
            body,
        })
    }
}
