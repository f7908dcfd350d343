//! Controller runtime: drives one `SessionController` against the store.
//!
//! ARCHITECTURE
//! ============
//! Each controller runs in its own task:
//!
//! ```text
//! store subscriptions ─┐
//! operator commands  ──┼─► driver ─► SessionController ─► effects
//! write/timer feedback ┘                                   │
//!            ┌──────────────┬──────────────┬───────────────┼──────────────┐
//!            ▼              ▼              ▼               ▼              ▼
//!       writer task    aggregator     viewer events   subscriptions     timers
//! ```
//!
//! The writer task and timers live in a `JoinSet` owned by the driver, so
//! dropping the `ControllerHandle` aborts the driver and everything it owns.
//!
//! DESIGN
//! ======
//! - Effects are applied in the order the reducer returned them. Optimistic
//!   UI events and locks are therefore visible before the claim write lands.
//! - Writes are queued FIFO to a single writer per controller. Retryable
//!   failures are retried with linear back-off; the rest of a failed batch is
//!   abandoned and reported back as feedback.
//! - Viewer events use an unbounded channel: the driver never blocks on a
//!   slow viewer while the viewer waits on a command reply.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::aggregator::{AggregatorEvent, ServerAggregator};
use super::controller::{
    self, ControllerView, Effect, SessionController, SessionError, StoreWrite, Stream, WriteIntent,
};
use super::countdown;
use super::events::ViewerEvent;
use crate::config::DashboardConfig;
use crate::frame::ErrorCode;
use crate::store::{DataSession, Mode, ModeStore, RecordSession, StoreError, Subscription};

const COMMAND_QUEUE_CAPACITY: usize = 32;
const FEEDBACK_QUEUE_CAPACITY: usize = 64;

/// Aggregator shared by every controller of one server within a dashboard.
pub type SharedAggregator = Arc<Mutex<ServerAggregator>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub reset_delay: Duration,
    pub countdown_tick: Duration,
    /// Attempts per write, including the first.
    pub write_retries: usize,
    pub retry_base_ms: u64,
}

impl From<&DashboardConfig> for RuntimeConfig {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            reset_delay: config.data_reset_delay(),
            countdown_tick: config.countdown_tick(),
            write_retries: config.store_write_retries,
            retry_base_ms: config.store_retry_base_ms,
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    StartData(Reply<Result<(), SessionError>>),
    StopData(Reply<Result<(), SessionError>>),
    HideData(Reply<Result<(), SessionError>>),
    StartRecord { time_range: String, date: String, reply: Reply<Result<(), SessionError>> },
    CloseRecord(Reply<Result<(), SessionError>>),
    View(Reply<ControllerView>),
}

/// Owner of a running controller. Dropping it stops the controller.
#[derive(Debug)]
pub struct ControllerHandle {
    server: String,
    client: String,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    #[must_use]
    pub fn client(&self) -> &str {
        &self.client
    }

    pub async fn start_data(&self) -> Result<(), SessionError> {
        self.request(Command::StartData).await?
    }

    pub async fn stop_data(&self) -> Result<(), SessionError> {
        self.request(Command::StopData).await?
    }

    pub async fn hide_data(&self) -> Result<(), SessionError> {
        self.request(Command::HideData).await?
    }

    pub async fn start_record(&self, time_range: String, date: String) -> Result<(), SessionError> {
        self.request(|reply| Command::StartRecord { time_range, date, reply }).await?
    }

    pub async fn close_record(&self) -> Result<(), SessionError> {
        self.request(Command::CloseRecord).await?
    }

    pub async fn view(&self) -> Result<ControllerView, SessionError> {
        self.request(Command::View).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(build(tx)).await.is_err() {
            return Err(SessionError::Stopped);
        }
        rx.await.map_err(|_| SessionError::Stopped)
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe to the server's mode and active client, then start the driver.
pub async fn spawn(
    store: Arc<dyn ModeStore>,
    server: &str,
    client: &str,
    aggregator: SharedAggregator,
    events: mpsc::UnboundedSender<ViewerEvent>,
    config: RuntimeConfig,
) -> Result<ControllerHandle, StoreError> {
    let mut mode_sub = store.subscribe_mode(server).await?;
    let mut active_sub = store.subscribe_active_client(server).await?;

    let mut controller = SessionController::new(server, client);
    let mut initial = controller.observe_active_client(&active_sub.current());
    initial.extend(controller.observe_mode(mode_sub.current()));

    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_QUEUE_CAPACITY);
    let (write_tx, write_rx) = mpsc::unbounded_channel();

    let mut tasks = JoinSet::new();
    tasks.spawn(run_writer(
        Arc::clone(&store),
        server.to_string(),
        client.to_string(),
        config,
        write_rx,
        feedback_tx.clone(),
    ));

    let mut driver = Driver {
        controller,
        store,
        aggregator,
        events,
        writes: write_tx,
        feedback: feedback_tx,
        tasks,
        countdown: None,
        data_sub: None,
        record_sub: None,
        config,
    };

    let task = tokio::spawn(async move {
        driver.apply(initial).await;
        driver.run(mode_sub, active_sub, command_rx, feedback_rx).await;
    });

    info!(%server, %client, "runtime: controller started");
    Ok(ControllerHandle { server: server.to_string(), client: client.to_string(), commands: command_tx, task })
}

// =============================================================================
// DRIVER
// =============================================================================

#[derive(Debug)]
enum Feedback {
    Written { intent: WriteIntent, result: Result<(), StoreError> },
    AutoResetDue { epoch: u64 },
    Tick { remaining: String, ended: bool },
}

struct WriteJob {
    intent: WriteIntent,
    batch: Vec<StoreWrite>,
}

enum Wake {
    Data(Option<DataSession>),
    Record(Option<Option<RecordSession>>),
    Mode(Option<Mode>),
    Active(Option<String>),
    Feedback(Feedback),
    Command(Command),
    TaskEnded,
    Shutdown,
}

struct Driver {
    controller: SessionController,
    store: Arc<dyn ModeStore>,
    aggregator: SharedAggregator,
    events: mpsc::UnboundedSender<ViewerEvent>,
    writes: mpsc::UnboundedSender<WriteJob>,
    feedback: mpsc::Sender<Feedback>,
    tasks: JoinSet<()>,
    countdown: Option<AbortHandle>,
    data_sub: Option<Subscription<DataSession>>,
    record_sub: Option<Subscription<Option<RecordSession>>>,
    config: RuntimeConfig,
}

/// Next change of an optional subscription. Pending while unsubscribed.
async fn next_change<T: Clone>(sub: &mut Option<Subscription<T>>) -> Option<T> {
    match sub {
        Some(sub) => sub.changed().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(
        &mut self,
        mut mode_sub: Subscription<Mode>,
        mut active_sub: Subscription<String>,
        mut commands: mpsc::Receiver<Command>,
        mut feedback: mpsc::Receiver<Feedback>,
    ) {
        loop {
            let wake = tokio::select! {
                biased;
                change = next_change(&mut self.data_sub) => Wake::Data(change),
                change = next_change(&mut self.record_sub) => Wake::Record(change),
                change = mode_sub.changed() => Wake::Mode(change),
                change = active_sub.changed() => Wake::Active(change),
                Some(item) = feedback.recv() => Wake::Feedback(item),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        if !err.is_cancelled() {
                            warn!(server = %self.controller.server(), error = %err, "runtime: task failed");
                        }
                    }
                    Wake::TaskEnded
                }
                command = commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Shutdown,
                },
            };

            let effects = match wake {
                Wake::Data(Some(session)) => self.controller.observe_data_session(&session),
                Wake::Data(None) => {
                    self.data_sub = None;
                    Vec::new()
                }
                Wake::Record(Some(session)) => self.controller.observe_record_session(session.as_ref()),
                Wake::Record(None) => {
                    self.record_sub = None;
                    Vec::new()
                }
                Wake::Mode(Some(mode)) => self.controller.observe_mode(mode),
                Wake::Active(Some(client)) => self.controller.observe_active_client(&client),
                Wake::Mode(None) | Wake::Active(None) => {
                    let effects = self.controller.observe_closed();
                    self.apply(effects).await;
                    info!(
                        server = %self.controller.server(),
                        client = %self.controller.client(),
                        "runtime: server removed, controller stopped"
                    );
                    return;
                }
                Wake::Feedback(item) => self.on_feedback(item).await,
                Wake::Command(command) => self.on_command(command).await,
                Wake::TaskEnded => Vec::new(),
                Wake::Shutdown => return,
            };
            self.apply(effects).await;
        }
    }

    async fn on_feedback(&mut self, item: Feedback) -> Vec<Effect> {
        match item {
            Feedback::Written { intent, result: Ok(()) } => self.controller.write_succeeded(intent),
            Feedback::Written { intent, result: Err(err) } => {
                warn!(
                    server = %self.controller.server(),
                    client = %self.controller.client(),
                    ?intent,
                    error = %err,
                    "runtime: write batch failed"
                );
                self.controller.write_failed(intent)
            }
            Feedback::AutoResetDue { epoch } => match self.store.snapshot(self.controller.server()).await {
                Ok(record) => self.controller.auto_reset_due(epoch, &record.data.folder_id),
                Err(err) => {
                    debug!(server = %self.controller.server(), epoch, error = %err, "runtime: auto-reset skipped");
                    Vec::new()
                }
            },
            Feedback::Tick { remaining, ended } => self.controller.countdown_tick(remaining, ended),
        }
    }

    async fn on_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::StartData(reply) => {
                let busy = self.aggregator.lock().await.is_busy();
                let folder = controller::folder_id(crate::frame::now_ms());
                let result = self.controller.start_data(folder, busy);
                respond(reply, result)
            }
            Command::StopData(reply) => respond(reply, Ok(self.controller.stop_data())),
            Command::HideData(reply) => respond(reply, Ok(self.controller.hide_data())),
            Command::StartRecord { time_range, date, reply } => {
                let busy = self.aggregator.lock().await.is_busy();
                let result = self.controller.start_record(time_range, date, busy);
                respond(reply, result)
            }
            Command::CloseRecord(reply) => respond(reply, Ok(self.controller.close_record())),
            Command::View(reply) => {
                if reply.send(self.controller.view()).is_err() {
                    debug!(server = %self.controller.server(), "runtime: view requester gone");
                }
                Vec::new()
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Write { intent, batch } => self.enqueue_write(intent, batch),
                Effect::ScheduleAutoReset { epoch } => self.schedule_auto_reset(epoch),
                Effect::Subscribe(stream) => queue.extend(self.subscribe(stream).await),
                Effect::Unsubscribe(Stream::Data) => self.data_sub = None,
                Effect::Unsubscribe(Stream::Record) => self.record_sub = None,
                Effect::Lock { kind, locked } => {
                    let changes = self.aggregator.lock().await.set_lock(self.controller.client(), kind, locked);
                    self.publish_server(changes);
                }
                Effect::Active { kind, active } => {
                    let changes = self.aggregator.lock().await.set_active(self.controller.client(), kind, active);
                    self.publish_server(changes);
                }
                Effect::Emit(event) => self.emit(ViewerEvent::Client {
                    server: self.controller.server().to_string(),
                    client: self.controller.client().to_string(),
                    event,
                }),
                Effect::StartCountdown { time_range } => self.start_countdown(time_range),
                Effect::StopCountdown => {
                    if let Some(ticker) = self.countdown.take() {
                        ticker.abort();
                    }
                }
            }
        }
    }

    async fn subscribe(&mut self, stream: Stream) -> Vec<Effect> {
        let server = self.controller.server().to_string();
        match stream {
            Stream::Data => match self.store.subscribe_data_session(&server).await {
                Ok(mut sub) => {
                    let current = sub.current();
                    self.data_sub = Some(sub);
                    self.controller.observe_data_session(&current)
                }
                Err(err) => {
                    warn!(%server, error = %err, "runtime: data subscription failed");
                    Vec::new()
                }
            },
            Stream::Record => {
                let client = self.controller.client().to_string();
                match self.store.subscribe_record_session(&server, &client).await {
                    Ok(mut sub) => {
                        let current = sub.current();
                        self.record_sub = Some(sub);
                        self.controller.observe_record_session(current.as_ref())
                    }
                    Err(err) => {
                        warn!(%server, %client, error = %err, "runtime: record subscription failed");
                        self.controller.observe_record_session(None)
                    }
                }
            }
        }
    }

    fn enqueue_write(&self, intent: WriteIntent, batch: Vec<StoreWrite>) {
        if batch.is_empty() {
            return;
        }
        if self.writes.send(WriteJob { intent, batch }).is_err() {
            error!(server = %self.controller.server(), ?intent, "runtime: writer stopped, write dropped");
        }
    }

    fn schedule_auto_reset(&mut self, epoch: u64) {
        let feedback = self.feedback.clone();
        let delay = self.config.reset_delay;
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            if feedback.send(Feedback::AutoResetDue { epoch }).await.is_err() {
                debug!(epoch, "runtime: auto-reset dropped, controller gone");
            }
        });
    }

    fn start_countdown(&mut self, time_range: String) {
        if let Some(ticker) = self.countdown.take() {
            ticker.abort();
        }
        let feedback = self.feedback.clone();
        let period = self.config.countdown_tick;
        let handle = self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let left = match countdown::remaining(&time_range, countdown::local_now()) {
                    Ok(left) => left,
                    Err(err) => {
                        warn!(%time_range, error = %err, "runtime: countdown disabled");
                        return;
                    }
                };
                let ended = left.is_ended();
                let tick = Feedback::Tick { remaining: left.to_string(), ended };
                if feedback.send(tick).await.is_err() || ended {
                    return;
                }
            }
        });
        self.countdown = Some(handle);
    }

    fn publish_server(&self, changes: Vec<AggregatorEvent>) {
        for event in changes {
            self.emit(ViewerEvent::Server { server: self.controller.server().to_string(), event });
        }
    }

    fn emit(&self, event: ViewerEvent) {
        if self.events.send(event).is_err() {
            debug!(server = %self.controller.server(), "runtime: viewer gone, event dropped");
        }
    }
}

fn respond(reply: Reply<Result<(), SessionError>>, result: Result<Vec<Effect>, SessionError>) -> Vec<Effect> {
    let (answer, effects) = match result {
        Ok(effects) => (Ok(()), effects),
        Err(err) => (Err(err), Vec::new()),
    };
    if reply.send(answer).is_err() {
        debug!("runtime: command requester gone");
    }
    effects
}

// =============================================================================
// WRITER
// =============================================================================

async fn run_writer(
    store: Arc<dyn ModeStore>,
    server: String,
    client: String,
    config: RuntimeConfig,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    feedback: mpsc::Sender<Feedback>,
) {
    while let Some(job) = jobs.recv().await {
        let result = write_batch(store.as_ref(), &server, &client, &job.batch, config).await;
        if feedback.send(Feedback::Written { intent: job.intent, result }).await.is_err() {
            break;
        }
    }
}

async fn write_batch(
    store: &dyn ModeStore,
    server: &str,
    client: &str,
    batch: &[StoreWrite],
    config: RuntimeConfig,
) -> Result<(), StoreError> {
    for write in batch {
        write_with_retry(store, server, client, write, config).await?;
    }
    Ok(())
}

async fn write_with_retry(
    store: &dyn ModeStore,
    server: &str,
    client: &str,
    write: &StoreWrite,
    config: RuntimeConfig,
) -> Result<(), StoreError> {
    let attempts = config.write_retries.max(1);
    let mut attempt = 1;
    loop {
        match write_once(store, server, client, write).await {
            Ok(()) => return Ok(()),
            Err(err) if err.retryable() && attempt < attempts => {
                warn!(%server, %client, error = %err, attempt, total = attempts, "runtime: store write failed; retrying");
                tokio::time::sleep(Duration::from_millis(attempt as u64 * config.retry_base_ms)).await;
                attempt += 1;
            }
            Err(err) => {
                error!(%server, %client, error = %err, attempt, "runtime: store write abandoned");
                return Err(err);
            }
        }
    }
}

async fn write_once(store: &dyn ModeStore, server: &str, client: &str, write: &StoreWrite) -> Result<(), StoreError> {
    match write {
        StoreWrite::Mode(mode) => store.write_mode(server, *mode).await,
        StoreWrite::ActiveClient(active) => store.write_active_client(server, active).await,
        StoreWrite::DataSession(session) => store.write_data_session(server, session).await,
        StoreWrite::RecordSession(session) => store.write_record_session(server, client, session).await,
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
