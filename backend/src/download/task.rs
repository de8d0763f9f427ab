//! A single item's network-to-disk transfer

use super::error::DownloadError;
use super::progress::ProgressTracker;
use super::registry::ActiveEntry;
use super::sink::{DiskSink, StorageDirectory};
use super::source::TransferSource;
use super::state::{DownloadEvent, TaskEvent};
use crate::catalog::{CatalogItem, ItemId};
use crate::config::DownloadSettings;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to download and where to put it
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub id: ItemId,
    /// Shown as the notification title
    pub title: String,
    pub filename: String,
    pub url: String,
}

impl From<&CatalogItem> for DownloadRequest {
    fn from(item: &CatalogItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.filename.clone(),
            filename: item.filename.clone(),
            url: item.download_url(),
        }
    }
}

/// Per-task settings shared by every task of a coordinator
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub directory: PathBuf,
    pub chunk_size: usize,
    pub buffer_capacity: usize,
    pub keep_partial_files: bool,
}

impl From<&DownloadSettings> for TaskOptions {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            chunk_size: settings.chunk_size,
            buffer_capacity: settings.buffer_capacity,
            keep_partial_files: settings.keep_partial_files,
        }
    }
}

/// Performs exactly one transfer and reports its lifecycle as [`TaskEvent`]s:
/// `Started`, strictly increasing `Progress`, then one terminal event.
pub struct DownloadTask {
    request: DownloadRequest,
    options: Arc<TaskOptions>,
    source: Arc<dyn TransferSource>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TaskEvent>,
    /// Registry entry released together with the terminal event
    entry: Option<ActiveEntry>,
}

impl DownloadTask {
    pub fn new(
        request: DownloadRequest,
        options: Arc<TaskOptions>,
        source: Arc<dyn TransferSource>,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        Self {
            request,
            options,
            source,
            limiter: None,
            cancel: CancellationToken::new(),
            events,
            entry: None,
        }
    }

    /// Wait for a permit of `limiter` before connecting
    pub fn with_limiter(mut self, limiter: Option<Arc<Semaphore>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_entry(mut self, entry: ActiveEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Run to completion and return the terminal event that was emitted
    pub async fn run(mut self) -> DownloadEvent {
        info!(
            "Starting download: {} -> {}",
            self.request.url, self.request.filename
        );
        self.emit(DownloadEvent::Started {
            title: self.request.title.clone(),
        });

        let outcome = match self.transfer().await {
            Ok(path) => {
                info!("Download complete: {}", path.display());
                DownloadEvent::Succeeded { path }
            }
            Err(e) => match e.kind() {
                Some(kind) => {
                    warn!("Download failed: {}: {}", self.request.filename, e);
                    DownloadEvent::Failed(kind)
                }
                None => {
                    info!("Download cancelled: {}", self.request.filename);
                    DownloadEvent::Cancelled
                }
            },
        };

        match self.entry.take() {
            Some(entry) => entry.finish(outcome.clone()),
            None => self.emit(outcome.clone()),
        }
        outcome
    }

    fn emit(&self, event: DownloadEvent) {
        // The consumer only goes away on shutdown
        let _ = self.events.send(TaskEvent {
            id: self.request.id.clone(),
            event,
        });
    }

    async fn transfer(&self) -> Result<PathBuf, DownloadError> {
        // Storage is a precondition checked before any network activity
        let storage = StorageDirectory::resolve(&self.options.directory).await?;
        let final_path = storage.file_path(&self.request.filename)?;

        let _permit = self.acquire_permit().await?;

        let transfer = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            opened = self.source.open(&self.request.url) => opened?,
        };

        let total = match transfer.content_length {
            Some(len) if len > 0 => len,
            _ => return Err(DownloadError::UnknownLength),
        };

        let mut reader = BufReader::with_capacity(
            self.options.buffer_capacity.max(1),
            StreamReader::new(transfer.body),
        );
        let mut sink = DiskSink::create(final_path).await?;

        match self.stream_body(&mut reader, &mut sink, total).await {
            Ok(()) => {
                let part_path = sink.part_path().to_path_buf();
                match sink.commit().await {
                    Ok(path) => Ok(path),
                    Err(e) => {
                        if !self.options.keep_partial_files {
                            if let Err(remove_err) = tokio::fs::remove_file(&part_path).await {
                                warn!(
                                    "Failed to remove {}: {}",
                                    part_path.display(),
                                    remove_err
                                );
                            }
                        }
                        Err(e)
                    }
                }
            }
            Err(e) => {
                sink.abandon(self.options.keep_partial_files).await;
                Err(e)
            }
        }
    }

    async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>, DownloadError> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            permit = Arc::clone(limiter).acquire_owned() => {
                // Closed only on shutdown
                permit.map(Some).map_err(|_| DownloadError::Cancelled)
            }
        }
    }

    /// Read chunk, write chunk, report progress; cancellation is checked per chunk
    async fn stream_body<R>(
        &self,
        reader: &mut R,
        sink: &mut DiskSink,
        total: u64,
    ) -> Result<(), DownloadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut tracker = ProgressTracker::new(total);
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];

        loop {
            let count = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                read = reader.read(&mut buf) => read?,
            };
            if count == 0 {
                break;
            }

            sink.write(&buf[..count]).await?;

            if let Some(percent) = tracker.advance(count) {
                debug!("{}: {}%", self.request.id, percent);
                self.emit(DownloadEvent::Progress(percent));
            }
        }

        if !tracker.is_complete() {
            return Err(DownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "stream ended after {} of {} bytes",
                    tracker.transferred(),
                    tracker.total()
                ),
            )));
        }

        Ok(())
    }
}
