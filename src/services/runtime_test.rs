use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use super::*;
use crate::services::controller::UiEvent;
use crate::services::phase::DataPhase;
use crate::store::{MemoryStore, Registry, RecordStatus, ServerRecord};

// =============================================================================
// FAKES
// =============================================================================

/// Memory store whose next `failures` writes report `Unavailable`.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self { inner: MemoryStore::new(), failures: AtomicUsize::new(failures) }
    }

    fn check(&self) -> Result<(), StoreError> {
        let failed = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match failed {
            Ok(_) => Err(StoreError::Unavailable("injected".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ModeStore for FlakyStore {
    async fn write_mode(&self, server: &str, mode: Mode) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write_mode(server, mode).await
    }

    async fn write_active_client(&self, server: &str, client: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write_active_client(server, client).await
    }

    async fn write_data_session(&self, server: &str, session: &DataSession) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write_data_session(server, session).await
    }

    async fn write_record_session(
        &self,
        server: &str,
        client: &str,
        session: &RecordSession,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write_record_session(server, client, session).await
    }

    async fn subscribe_mode(&self, server: &str) -> Result<Subscription<Mode>, StoreError> {
        self.inner.subscribe_mode(server).await
    }

    async fn subscribe_active_client(&self, server: &str) -> Result<Subscription<String>, StoreError> {
        self.inner.subscribe_active_client(server).await
    }

    async fn subscribe_data_session(&self, server: &str) -> Result<Subscription<DataSession>, StoreError> {
        self.inner.subscribe_data_session(server).await
    }

    async fn subscribe_record_session(
        &self,
        server: &str,
        client: &str,
    ) -> Result<Subscription<Option<RecordSession>>, StoreError> {
        self.inner.subscribe_record_session(server, client).await
    }

    async fn snapshot(&self, server: &str) -> Result<ServerRecord, StoreError> {
        self.inner.snapshot(server).await
    }

    async fn registry(&self) -> Registry {
        self.inner.registry().await
    }

    async fn subscribe_registry(&self) -> Subscription<Registry> {
        self.inner.subscribe_registry().await
    }

    async fn create_server(&self, server: &str, location: &str) -> Result<(), StoreError> {
        self.inner.create_server(server, location).await
    }

    async fn delete_server(&self, server: &str) -> Result<(), StoreError> {
        self.inner.delete_server(server).await
    }

    async fn set_server_location(&self, server: &str, location: &str) -> Result<(), StoreError> {
        self.inner.set_server_location(server, location).await
    }

    async fn create_client(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError> {
        self.inner.create_client(server, client, location).await
    }

    async fn set_client_location(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError> {
        self.inner.set_client_location(server, client, location).await
    }

    async fn delete_client(&self, server: &str, client: &str) -> Result<(), StoreError> {
        self.inner.delete_client(server, client).await
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        reset_delay: Duration::from_millis(30),
        countdown_tick: Duration::from_millis(20),
        write_retries: 3,
        retry_base_ms: 5,
    }
}

struct Viewer {
    handle: ControllerHandle,
    events: UnboundedReceiver<ViewerEvent>,
    aggregator: SharedAggregator,
}

async fn store_with_server() -> Arc<dyn ModeStore> {
    let store = MemoryStore::new();
    store.create_server("server1", "North Ridge").await.unwrap();
    Arc::new(store)
}

async fn viewer_with(store: &Arc<dyn ModeStore>, client: &str, aggregator: SharedAggregator) -> Viewer {
    let (tx, events) = mpsc::unbounded_channel();
    let handle = spawn(Arc::clone(store), "server1", client, Arc::clone(&aggregator), tx, test_config())
        .await
        .unwrap();
    Viewer { handle, events, aggregator }
}

async fn viewer(store: &Arc<dyn ModeStore>, client: &str) -> Viewer {
    viewer_with(store, client, Arc::new(Mutex::new(ServerAggregator::new("server1")))).await
}

async fn wait_for(events: &mut UnboundedReceiver<ViewerEvent>, pred: impl Fn(&ViewerEvent) -> bool) -> ViewerEvent {
    timeout(Duration::from_secs(1), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

async fn wait_store<T: Clone>(sub: &mut Subscription<T>, pred: impl Fn(&T) -> bool) -> T {
    let current = sub.current();
    if pred(&current) {
        return current;
    }
    timeout(Duration::from_secs(1), async {
        loop {
            let value = sub.changed().await.expect("store path closed");
            if pred(&value) {
                return value;
            }
        }
    })
    .await
    .expect("store never reached expected value")
}

fn is_ui(event: &ViewerEvent, pred: impl Fn(&UiEvent) -> bool) -> bool {
    matches!(event, ViewerEvent::Client { event, .. } if pred(event))
}

/// Wait until the claim batch has fully landed. Its last write is the
/// fresh data session.
async fn claimed_folder(store: &Arc<dyn ModeStore>) -> String {
    let mut data = store.subscribe_data_session("server1").await.unwrap();
    wait_store(&mut data, |session| !session.folder_id.is_empty()).await.folder_id
}

// =============================================================================
// data
// =============================================================================

#[tokio::test]
async fn start_data_claims_store_and_locks_server() {
    let store = store_with_server().await;
    let mut v = viewer(&store, "client1").await;

    v.handle.start_data().await.unwrap();

    wait_for(&mut v.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::ActiveStatus { active: true, .. }))).await;
    wait_for(&mut v.events, |e| {
        matches!(e, ViewerEvent::Server { event: AggregatorEvent::ServerBusyChange { busy: true }, .. })
    })
    .await;
    assert!(v.aggregator.lock().await.is_busy());

    let folder = claimed_folder(&store).await;
    let snapshot = store.snapshot("server1").await.unwrap();
    assert_eq!(snapshot.mode, Mode::Data);
    assert_eq!(snapshot.active_client, "client1");
    assert!(folder.starts_with("FLD_"));

    let err = v.handle.start_data().await.unwrap_err();
    assert_eq!(err, SessionError::AlreadyActive("data"));
}

#[tokio::test]
async fn busy_server_rejects_sibling_start() {
    let store = store_with_server().await;
    store.create_client("server1", "client2", "").await.unwrap();
    let first = viewer(&store, "client1").await;
    let second = viewer_with(&store, "client2", Arc::clone(&first.aggregator)).await;

    first.handle.start_data().await.unwrap();

    let err = second.handle.start_data().await.unwrap_err();
    assert!(matches!(err, SessionError::ServerBusy(server) if server == "server1"));
}

#[tokio::test]
async fn completion_shows_full_progress_then_resets_store() {
    let store = store_with_server().await;
    let mut v = viewer(&store, "client1").await;
    v.handle.start_data().await.unwrap();
    let folder = claimed_folder(&store).await;
    wait_for(&mut v.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::DataPhase { phase: DataPhase::Live, .. }))).await;

    let done = DataSession {
        connected: true,
        sensor_file_ready: true,
        image_file_ready: true,
        audio_file_ready: true,
        transmission_completed: true,
        ..DataSession::fresh(folder)
    };
    store.write_data_session("server1", &done).await.unwrap();

    wait_for(&mut v.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::DataProgress { percentage: 100, .. }))).await;
    wait_for(&mut v.events, |e| {
        is_ui(e, |ui| matches!(ui, UiEvent::DataPhase { phase: DataPhase::Completed, .. }))
    })
    .await;

    let mut mode = store.subscribe_mode("server1").await.unwrap();
    wait_store(&mut mode, |mode| *mode == Mode::Idle).await;
    let snapshot = store.snapshot("server1").await.unwrap();
    assert!(snapshot.active_client.is_empty());
    assert_eq!(snapshot.data, DataSession::zeroed());

    let view = v.handle.view().await.unwrap();
    assert_eq!(view.data_phase, DataPhase::Completed);
    assert_eq!(view.progress, 100);
    assert!(!v.aggregator.lock().await.is_busy());
}

#[tokio::test]
async fn second_viewer_mirrors_session_and_progress() {
    let store = store_with_server().await;
    let owner = viewer(&store, "client1").await;
    let mut mirror = viewer(&store, "client1").await;

    owner.handle.start_data().await.unwrap();
    let folder = claimed_folder(&store).await;

    wait_for(&mut mirror.events, |e| {
        is_ui(e, |ui| matches!(ui, UiEvent::DataPhase { phase: DataPhase::Live, .. }))
    })
    .await;
    assert!(mirror.aggregator.lock().await.is_busy());

    let partial = DataSession { connected: true, sensor_file_ready: true, ..DataSession::fresh(folder) };
    store.write_data_session("server1", &partial).await.unwrap();

    wait_for(&mut mirror.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::DataProgress { percentage: 40, .. }))).await;
}

#[tokio::test]
async fn stop_releases_and_viewers_converge() {
    let store = store_with_server().await;
    let owner = viewer(&store, "client1").await;
    let mut mirror = viewer(&store, "client1").await;

    owner.handle.start_data().await.unwrap();
    claimed_folder(&store).await;
    wait_for(&mut mirror.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::DataPhase { phase: DataPhase::Live, .. })))
        .await;

    owner.handle.stop_data().await.unwrap();

    let mut mode = store.subscribe_mode("server1").await.unwrap();
    wait_store(&mut mode, |mode| *mode == Mode::Idle).await;
    wait_for(&mut mirror.events, |e| {
        is_ui(e, |ui| matches!(ui, UiEvent::ActiveStatus { active: false, .. }))
    })
    .await;
    assert!(!mirror.aggregator.lock().await.is_busy());
    assert_eq!(mirror.handle.view().await.unwrap().data_phase, DataPhase::Inactive);
}

// =============================================================================
// record
// =============================================================================

#[tokio::test]
async fn record_done_starts_countdown() {
    let store = store_with_server().await;
    let mut v = viewer(&store, "client1").await;

    v.handle.start_record("12:00 AM - 11:59 PM".into(), "2024-08-15".into()).await.unwrap();

    let mut entry = store.subscribe_record_session("server1", "client1").await.unwrap();
    let requested = wait_store(&mut entry, |entry| entry.as_ref().is_some_and(|e| e.requested)).await;
    let done = RecordSession { status: RecordStatus::Done, ..requested.unwrap() };
    store.write_record_session("server1", "client1", &done).await.unwrap();

    wait_for(&mut v.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::RecordCountdown { .. }))).await;

    // The finished entry is cleared behind the pinned badge.
    wait_store(&mut entry, |entry| entry.as_ref() == Some(&RecordSession::idle())).await;
    assert!(!v.aggregator.lock().await.is_busy());
}

// =============================================================================
// failures
// =============================================================================

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let store: Arc<dyn ModeStore> = Arc::new(FlakyStore::new(2));
    store.create_server("server1", "North Ridge").await.unwrap();
    let v = viewer(&store, "client1").await;

    v.handle.start_data().await.unwrap();

    claimed_folder(&store).await;
    let snapshot = store.snapshot("server1").await.unwrap();
    assert_eq!(snapshot.mode, Mode::Data);
    assert!(v.handle.view().await.unwrap().in_sync);
}

#[tokio::test]
async fn abandoned_claim_reverts_and_reports_out_of_sync() {
    let store: Arc<dyn ModeStore> = Arc::new(FlakyStore::new(usize::MAX));
    store.create_server("server1", "North Ridge").await.unwrap();
    let mut v = viewer(&store, "client1").await;

    v.handle.start_data().await.unwrap();

    wait_for(&mut v.events, |e| is_ui(e, |ui| matches!(ui, UiEvent::SyncStatus { in_sync: false }))).await;
    let view = v.handle.view().await.unwrap();
    assert_eq!(view.data_phase, DataPhase::Inactive);
    assert!(!view.in_sync);
    assert!(!v.aggregator.lock().await.is_busy());
    assert_eq!(store.snapshot("server1").await.unwrap().mode, Mode::Idle);
}

#[tokio::test]
async fn deleted_server_stops_controller() {
    let store = store_with_server().await;
    let v = viewer(&store, "client1").await;

    store.delete_server("server1").await.unwrap();

    let stopped = timeout(Duration::from_secs(1), async {
        loop {
            if v.handle.view().await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "controller should stop after server removal");
    assert_eq!(v.handle.start_data().await.unwrap_err(), SessionError::Stopped);
}

#[tokio::test]
async fn spawn_fails_for_unknown_server() {
    let store: Arc<dyn ModeStore> = Arc::new(MemoryStore::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let aggregator = Arc::new(Mutex::new(ServerAggregator::new("server9")));

    let err = spawn(store, "server9", "client1", aggregator, tx, test_config()).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownServer(_)));
}
