//! Download coordinator: at most one running task per item

use super::registry::{ActiveDownloadRegistry, ActiveEntry, Rejection};
use super::source::TransferSource;
use super::state::{DownloadEvent, DownloadState, StateUpdate, TaskEvent};
use super::task::{DownloadRequest, DownloadTask, TaskOptions};
use crate::catalog::ItemId;
use crate::notification::NotificationSink;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Result of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    /// A task for the item is already running; nothing was started
    AlreadyActive,
    /// The item was downloaded successfully before
    AlreadyDownloaded,
}

/// Download statistics
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    pub active: usize,
    /// 0 when unlimited
    pub max_concurrent: usize,
    /// Connected UI listeners
    pub subscribers: usize,
}

/// Inner state shared by all clones
struct CoordinatorInner {
    registry: Arc<Mutex<ActiveDownloadRegistry>>,

    /// Written only by the event consumer
    states: Arc<RwLock<HashMap<ItemId, DownloadState>>>,

    source: Arc<dyn TransferSource>,
    options: Arc<TaskOptions>,

    /// Optional cap on concurrently running transfers
    limiter: Option<Arc<Semaphore>>,
    max_concurrent: usize,

    /// Every spawned download task, awaited on shutdown
    tasks: TaskTracker,

    events_tx: mpsc::UnboundedSender<TaskEvent>,
    updates_tx: broadcast::Sender<StateUpdate>,
}

/// Maps "download item X" requests onto download tasks and routes their
/// events to the state table, the notification sink and UI subscribers.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl DownloadCoordinator {
    /// Create a coordinator and spawn its event consumer. Must be called
    /// inside a tokio runtime.
    pub fn new(
        source: Arc<dyn TransferSource>,
        options: TaskOptions,
        max_concurrent: usize,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(1024);
        let states = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(deliver_events(
            events_rx,
            Arc::clone(&states),
            notifier,
            updates_tx.clone(),
        ));

        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));

        Self {
            inner: Arc::new(CoordinatorInner {
                registry: Arc::new(Mutex::new(ActiveDownloadRegistry::default())),
                states,
                source,
                options: Arc::new(options),
                limiter,
                max_concurrent,
                tasks: TaskTracker::new(),
                events_tx,
                updates_tx,
            }),
        }
    }

    /// Start a download for `request.id` unless one is running or already done
    pub fn request_download(&self, request: DownloadRequest) -> RequestOutcome {
        let id = request.id.clone();

        // Check and insert happen under one lock
        let cancel = match self.inner.registry.lock().try_begin(&id) {
            Ok(token) => token,
            Err(Rejection::AlreadyActive) => {
                debug!("Download for {} already running", id);
                return RequestOutcome::AlreadyActive;
            }
            Err(Rejection::AlreadyDownloaded) => {
                debug!("{} was already downloaded", id);
                return RequestOutcome::AlreadyDownloaded;
            }
        };

        let entry = ActiveEntry::new(
            Arc::clone(&self.inner.registry),
            self.inner.events_tx.clone(),
            id,
        );

        let task = DownloadTask::new(
            request,
            Arc::clone(&self.inner.options),
            Arc::clone(&self.inner.source),
            self.inner.events_tx.clone(),
        )
        .with_limiter(self.inner.limiter.clone())
        .with_cancellation(cancel)
        .with_entry(entry);

        // A panicking task drops its entry, which reports the item as failed
        self.inner.tasks.spawn(task.run());

        RequestOutcome::Started
    }

    /// Cancel a running download
    pub fn cancel(&self, id: &ItemId) -> bool {
        self.inner.registry.lock().cancel(id)
    }

    /// Cancel every running download
    pub fn cancel_all(&self) {
        self.inner.registry.lock().cancel_all();
    }

    /// Cancel every running download and wait up to `grace` for the tasks to
    /// clean up after themselves. Returns `false` if some were still running.
    ///
    /// No new downloads should be requested afterwards.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel_all();
        self.inner.tasks.close();

        match tokio::time::timeout(grace, self.inner.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} download tasks still running after {:?}",
                    self.inner.tasks.len(),
                    grace
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, id: &ItemId) -> bool {
        self.inner.registry.lock().is_active(id)
    }

    /// Current state of `id`; items never requested are idle
    pub fn state(&self, id: &ItemId) -> DownloadState {
        self.inner.states.read().get(id).copied().unwrap_or_default()
    }

    /// Subscribe to state updates
    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.inner.updates_tx.subscribe()
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            active: self.inner.registry.lock().active_count(),
            max_concurrent: self.inner.max_concurrent,
            subscribers: self.inner.updates_tx.receiver_count(),
        }
    }
}

/// The single consumer of task events. Applies each event to the state table,
/// waits for the notification sink, then publishes the new state.
async fn deliver_events(
    mut events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    states: Arc<RwLock<HashMap<ItemId, DownloadState>>>,
    notifier: Arc<dyn NotificationSink>,
    updates_tx: broadcast::Sender<StateUpdate>,
) {
    while let Some(TaskEvent { id, event }) = events_rx.recv().await {
        let next = {
            let mut states = states.write();
            let current = states.get(&id).copied().unwrap_or_default();
            match current.apply(&event) {
                Some(next) => {
                    states.insert(id.clone(), next);
                    next
                }
                None => {
                    warn!("Ignoring {:?} for {} in state {:?}", event, id, current);
                    continue;
                }
            }
        };

        let mut failure = None;
        let mut path = None;
        match event {
            DownloadEvent::Started { title } => notifier.on_started(&id, &title).await,
            DownloadEvent::Progress(percent) => notifier.on_progress(&id, percent).await,
            DownloadEvent::Succeeded { path: saved } => {
                notifier.on_succeeded(&id).await;
                path = Some(saved);
            }
            DownloadEvent::Failed(kind) => {
                notifier.on_failed(&id).await;
                failure = Some(kind);
            }
            DownloadEvent::Cancelled => notifier.on_cancelled(&id).await,
        }

        // No subscribers is fine
        let _ = updates_tx.send(StateUpdate {
            id,
            state: next,
            failure,
            path,
            at: chrono::Utc::now(),
        });
    }

    info!("Download event consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::error::{DownloadError, FailureKind};
    use crate::download::source::Transfer;
    use crate::download::test_support::{Notified, RecordingSink, Script, ScriptedSource};
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tokio::time::timeout;

    fn options(dir: &Path) -> TaskOptions {
        TaskOptions {
            directory: dir.to_path_buf(),
            chunk_size: 1024,
            buffer_capacity: 8192,
            keep_partial_files: false,
        }
    }

    fn request(id: &str) -> DownloadRequest {
        DownloadRequest {
            id: ItemId::new(id),
            title: format!("{id}.jpeg"),
            filename: format!("{id}.jpeg"),
            url: format!("mem://{id}"),
        }
    }

    fn setup(
        dir: &Path,
        source: Arc<ScriptedSource>,
        max_concurrent: usize,
    ) -> (DownloadCoordinator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let coordinator = DownloadCoordinator::new(source, options(dir), max_concurrent, sink.clone());
        (coordinator, sink)
    }

    fn is_finished(state: DownloadState) -> bool {
        matches!(
            state,
            DownloadState::Succeeded | DownloadState::Failed | DownloadState::Idle
        )
    }

    /// Wait for the update that ends the current run of `id`
    async fn wait_finished(rx: &mut broadcast::Receiver<StateUpdate>, id: &str) -> StateUpdate {
        timeout(Duration::from_secs(5), async {
            loop {
                let update = rx.recv().await.unwrap();
                if update.id.as_str() == id && is_finished(update.state) {
                    return update;
                }
            }
        })
        .await
        .expect("download did not finish")
    }

    async fn wait_for(rx: &mut broadcast::Receiver<StateUpdate>, id: &str, state: DownloadState) {
        timeout(Duration::from_secs(5), async {
            loop {
                let update = rx.recv().await.unwrap();
                if update.id.as_str() == id && update.state == state {
                    return;
                }
            }
        })
        .await
        .expect("state not reached")
    }

    fn progress_values(calls: &[Notified]) -> Vec<u8> {
        calls
            .iter()
            .filter_map(|c| match c {
                Notified::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn successful_download_is_routed_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new().with("mem://a", Script::body(vec![3u8; 2048])));
        let (coordinator, sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();

        assert_eq!(coordinator.request_download(request("a")), RequestOutcome::Started);
        let last = wait_finished(&mut updates, "a").await;

        assert_eq!(last.state, DownloadState::Succeeded);
        assert_eq!(last.path.as_deref(), Some(dir.path().join("a.jpeg").as_path()));
        assert_eq!(
            sink.calls_for("a"),
            vec![
                Notified::Started("a.jpeg".into()),
                Notified::Progress(50),
                Notified::Progress(100),
                Notified::Succeeded,
            ]
        );
        assert_eq!(coordinator.state(&ItemId::new("a")), DownloadState::Succeeded);
        assert_eq!(std::fs::metadata(dir.path().join("a.jpeg")).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn registry_entry_is_removed_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new().with("mem://a", Script::body(vec![3u8; 10])));
        let (coordinator, _sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();

        coordinator.request_download(request("a"));
        wait_finished(&mut updates, "a").await;

        assert_eq!(coordinator.stats().active, 0);
        assert_eq!(
            coordinator.request_download(request("a")),
            RequestOutcome::AlreadyDownloaded
        );
    }

    #[tokio::test]
    async fn failure_mid_stream_then_retry() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new().with(
            "mem://b",
            Script::chunks(Some(2048), vec![vec![0u8; 512]]).then_fail(),
        ));
        let (coordinator, sink) = setup(dir.path(), source.clone(), 0);
        let mut updates = coordinator.subscribe();

        coordinator.request_download(request("b"));
        let last = wait_finished(&mut updates, "b").await;

        assert_eq!(last.state, DownloadState::Failed);
        assert_eq!(last.failure, Some(FailureKind::Io));
        assert_eq!(
            sink.calls_for("b"),
            vec![
                Notified::Started("b.jpeg".into()),
                Notified::Progress(25),
                Notified::Failed,
            ]
        );

        // failed items can be retried as soon as the failure is seen
        source.push("mem://b", Script::body(vec![1u8; 2048]));
        assert_eq!(coordinator.request_download(request("b")), RequestOutcome::Started);
        let last = wait_finished(&mut updates, "b").await;
        assert_eq!(last.state, DownloadState::Succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_right_after_failure_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new());
        for _ in 0..50 {
            source.push(
                "mem://b",
                Script::chunks(Some(2048), vec![vec![0u8; 512]]).then_fail(),
            );
        }
        let (coordinator, _sink) = setup(dir.path(), source.clone(), 0);
        let mut updates = coordinator.subscribe();
        let id = ItemId::new("b");

        for round in 0..50 {
            assert_eq!(
                coordinator.request_download(request("b")),
                RequestOutcome::Started,
                "round {round}"
            );
            let last = wait_finished(&mut updates, "b").await;
            assert_eq!(last.state, DownloadState::Failed, "round {round}");
            assert!(!coordinator.is_active(&id), "round {round}");
        }
        assert_eq!(source.opened(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn success_is_final_as_soon_as_it_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new());
        let ids: Vec<String> = (0..20).map(|i| format!("s{i}")).collect();
        for id in &ids {
            source.push(&format!("mem://{id}"), Script::body(vec![1u8; 64]));
        }
        let (coordinator, _sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();

        for id in &ids {
            coordinator.request_download(request(id));
            let last = wait_finished(&mut updates, id).await;
            assert_eq!(last.state, DownloadState::Succeeded);
            assert_eq!(
                coordinator.request_download(request(id)),
                RequestOutcome::AlreadyDownloaded
            );
        }
        assert_eq!(coordinator.stats().active, 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_tasks_to_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _release_first) = Script::chunks(Some(2048), vec![vec![1u8; 1024]]).then_wait();
        let (second, _release_second) = Script::chunks(Some(2048), vec![vec![2u8; 1024]]).then_wait();
        let source = Arc::new(
            ScriptedSource::new()
                .with("mem://u", first)
                .with("mem://v", second),
        );
        let (coordinator, sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();

        coordinator.request_download(request("u"));
        wait_for(&mut updates, "u", DownloadState::InProgress(50)).await;
        coordinator.request_download(request("v"));
        wait_for(&mut updates, "v", DownloadState::InProgress(50)).await;
        assert!(dir.path().join("u.jpeg.part").exists());

        assert!(coordinator.shutdown(Duration::from_secs(5)).await);

        assert_eq!(coordinator.stats().active, 0);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
        let mut cancelled = Vec::new();
        while cancelled.len() < 2 {
            let update = timeout(Duration::from_secs(5), updates.recv())
                .await
                .unwrap()
                .unwrap();
            if update.state == DownloadState::Idle {
                cancelled.push(update.id);
            }
        }
        for id in ["u", "v"] {
            assert_eq!(sink.calls_for(id).last(), Some(&Notified::Cancelled));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_items_keep_independent_progress() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = || (0..10).map(|_| vec![5u8; 100]).collect::<Vec<_>>();
        let source = Arc::new(
            ScriptedSource::new()
                .with("mem://x", Script::chunks(Some(1000), chunks()))
                .with("mem://y", Script::chunks(Some(1000), chunks())),
        );
        let (coordinator, sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();

        assert_eq!(coordinator.request_download(request("x")), RequestOutcome::Started);
        assert_eq!(coordinator.request_download(request("y")), RequestOutcome::Started);

        let mut finished = Vec::new();
        while finished.len() < 2 {
            let update = timeout(Duration::from_secs(5), updates.recv())
                .await
                .unwrap()
                .unwrap();
            if update.state == DownloadState::Succeeded {
                finished.push(update.id);
            }
        }

        for id in ["x", "y"] {
            let calls = sink.calls_for(id);
            assert_eq!(calls.first(), Some(&Notified::Started(format!("{id}.jpeg"))));
            assert_eq!(calls.last(), Some(&Notified::Succeeded));
            assert_eq!(
                progress_values(&calls),
                vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
            );
            assert_eq!(std::fs::metadata(dir.path().join(format!("{id}.jpeg"))).unwrap().len(), 1000);
        }
    }

    #[tokio::test]
    async fn duplicate_request_while_active_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (script, release) = Script::body(vec![1u8; 2048]).gated();
        let source = Arc::new(ScriptedSource::new().with("mem://a", script));
        let (coordinator, sink) = setup(dir.path(), source.clone(), 0);
        let mut updates = coordinator.subscribe();

        assert_eq!(coordinator.request_download(request("a")), RequestOutcome::Started);
        assert_eq!(
            coordinator.request_download(request("a")),
            RequestOutcome::AlreadyActive
        );
        assert_eq!(coordinator.stats().active, 1);

        release.send(()).unwrap();
        let last = wait_finished(&mut updates, "a").await;

        assert_eq!(last.state, DownloadState::Succeeded);
        assert_eq!(source.opened(), 1);
        let starts = sink
            .calls_for("a")
            .into_iter()
            .filter(|c| matches!(c, Notified::Started(_)))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_requests_start_exactly_one_task() {
        let dir = tempfile::tempdir().unwrap();
        let (script, release) = Script::body(vec![1u8; 64]).gated();
        let source = Arc::new(ScriptedSource::new().with("mem://r", script));
        let (coordinator, _sink) = setup(dir.path(), source.clone(), 0);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.request_download(request("r")) })
            })
            .collect();

        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() == RequestOutcome::Started {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        assert_eq!(coordinator.stats().active, 1);
        drop(release);
    }

    #[tokio::test]
    async fn cancel_returns_item_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (script, _release) = Script::chunks(Some(2048), vec![vec![1u8; 1024]]).then_wait();
        let source = Arc::new(ScriptedSource::new().with("mem://c", script));
        let (coordinator, sink) = setup(dir.path(), source, 0);
        let mut updates = coordinator.subscribe();
        let id = ItemId::new("c");

        coordinator.request_download(request("c"));
        wait_for(&mut updates, "c", DownloadState::InProgress(50)).await;

        assert!(coordinator.cancel(&id));
        let last = wait_finished(&mut updates, "c").await;

        assert_eq!(last.state, DownloadState::Idle);
        assert_eq!(sink.calls_for("c").last(), Some(&Notified::Cancelled));
        assert!(!dir.path().join("c.jpeg.part").exists());
        assert!(!coordinator.cancel(&ItemId::new("unknown")));
    }

    #[tokio::test]
    async fn limiter_holds_back_extra_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let (first, release_first) = Script::body(vec![1u8; 100]).gated();
        let source = Arc::new(
            ScriptedSource::new()
                .with("mem://one", first)
                .with("mem://two", Script::body(vec![2u8; 100])),
        );
        let (coordinator, _sink) = setup(dir.path(), source.clone(), 1);
        let mut updates = coordinator.subscribe();

        coordinator.request_download(request("one"));
        timeout(Duration::from_secs(5), async {
            while source.opened() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        coordinator.request_download(request("two"));
        wait_for(&mut updates, "two", DownloadState::InProgress(0)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // "two" is started but waits for the permit held by "one"
        assert_eq!(source.opened(), 1);
        assert_eq!(coordinator.stats().active, 2);
        assert_eq!(coordinator.stats().max_concurrent, 1);

        release_first.send(()).unwrap();
        wait_finished(&mut updates, "one").await;
        let last = wait_finished(&mut updates, "two").await;
        assert_eq!(last.state, DownloadState::Succeeded);
        assert_eq!(source.opened(), 2);
    }

    struct PanickingSource;

    #[async_trait]
    impl TransferSource for PanickingSource {
        async fn open(&self, _url: &str) -> Result<Transfer, DownloadError> {
            panic!("source blew up");
        }
    }

    #[tokio::test]
    async fn panicking_task_still_releases_its_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let coordinator =
            DownloadCoordinator::new(Arc::new(PanickingSource), options(dir.path()), 0, sink.clone());
        let mut updates = coordinator.subscribe();

        coordinator.request_download(request("p"));
        let last = wait_finished(&mut updates, "p").await;

        assert_eq!(last.state, DownloadState::Failed);
        assert_eq!(last.failure, Some(FailureKind::Aborted));
        assert!(!coordinator.is_active(&ItemId::new("p")));
        assert_eq!(
            sink.calls_for("p"),
            vec![Notified::Started("p.jpeg".into()), Notified::Failed]
        );
    }
}
