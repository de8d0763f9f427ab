//! Fakes shared by the download tests

use super::error::DownloadError;
use super::source::{Transfer, TransferSource};
use super::state::{DownloadEvent, TaskEvent};
use crate::catalog::ItemId;
use crate::notification::NotificationSink;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

enum Tail {
    End,
    Fail,
    Wait(oneshot::Receiver<()>),
}

/// Scripted response for one `open` call
pub struct Script {
    content_length: Option<u64>,
    chunks: Vec<Vec<u8>>,
    tail: Tail,
    gate: Option<oneshot::Receiver<()>>,
}

impl Script {
    /// A complete body with a matching content length
    pub fn body(bytes: Vec<u8>) -> Self {
        Self::chunks(Some(bytes.len() as u64), vec![bytes])
    }

    pub fn chunks(content_length: Option<u64>, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            content_length,
            chunks,
            tail: Tail::End,
            gate: None,
        }
    }

    /// Reset the connection after the scripted chunks
    pub fn then_fail(mut self) -> Self {
        self.tail = Tail::Fail;
        self
    }

    /// Stall after the scripted chunks until the returned sender is dropped
    pub fn then_wait(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.tail = Tail::Wait(rx);
        (self, tx)
    }

    /// Hold `open` until the returned sender fires or is dropped
    pub fn gated(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.gate = Some(rx);
        (self, tx)
    }

    fn into_transfer(self) -> Transfer {
        let chunks = stream::iter(
            self.chunks
                .into_iter()
                .map(|chunk| Ok::<_, io::Error>(Bytes::from(chunk))),
        );

        let body = match self.tail {
            Tail::End => chunks.boxed(),
            Tail::Fail => chunks
                .chain(stream::once(async {
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))
                }))
                .boxed(),
            Tail::Wait(rx) => chunks
                .chain(
                    stream::once(async move {
                        let _ = rx.await;
                    })
                    .filter_map(|()| async { None::<io::Result<Bytes>> }),
                )
                .boxed(),
        };

        Transfer {
            content_length: self.content_length,
            body,
        }
    }
}

/// Serves scripts by URL, one per `open` call, in the order they were added
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    opened: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, script: Script) -> Self {
        self.push(url, script);
        self
    }

    pub fn push(&self, url: &str, script: Script) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(script);
    }

    /// Number of `open` calls so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferSource for ScriptedSource {
    async fn open(&self, url: &str) -> Result<Transfer, DownloadError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        let Some(mut script) = script else {
            return Err(DownloadError::Connection(format!("no route to {url}")));
        };

        if let Some(gate) = script.gate.take() {
            let _ = gate.await;
        }

        Ok(script.into_transfer())
    }
}

/// Events received so far, without waiting
pub fn drain(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.event);
    }
    events
}

/// One call made on a notification sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notified {
    Started(String),
    Progress(u8),
    Succeeded,
    Failed,
    Cancelled,
}

/// Records every notification call in order
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(ItemId, Notified)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made for `id`, in delivery order
    pub fn calls_for(&self, id: &str) -> Vec<Notified> {
        self.calls
            .lock()
            .iter()
            .filter(|(item, _)| item.as_str() == id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn record(&self, id: &ItemId, call: Notified) {
        self.calls.lock().push((id.clone(), call));
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn on_started(&self, id: &ItemId, title: &str) {
        self.record(id, Notified::Started(title.to_string()));
    }

    async fn on_progress(&self, id: &ItemId, percent: u8) {
        self.record(id, Notified::Progress(percent));
    }

    async fn on_succeeded(&self, id: &ItemId) {
        self.record(id, Notified::Succeeded);
    }

    async fn on_failed(&self, id: &ItemId) {
        self.record(id, Notified::Failed);
    }

    async fn on_cancelled(&self, id: &ItemId) {
        self.record(id, Notified::Cancelled);
    }
}
