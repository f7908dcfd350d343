//! Session controller: one client's data/record state machine.
//!
//! DESIGN
//! ======
//! The controller is a synchronous reducer. Store observations, operator
//! commands, and runtime feedback go in; a list of `Effect`s comes out. It
//! performs no I/O: the runtime driver owns subscriptions, timers, the store
//! writer, and the aggregator, and applies effects in the order returned.
//!
//! RECONCILIATION
//! ==============
//! The store is the only authority on who holds a mode. Local phase is
//! recomputed from the latest observed `mode` and `client_id` on every
//! delivery, except where a terminal phase pins it:
//! - `Completed` keeps progress at 100 while the store is reset behind it,
//!   until a later claim names this client again.
//! - `Done` keeps the record badge while the store entry is cleared.
//!
//! A controller that observes itself named as holder without having claimed
//! (page reload, second viewer) mirrors the session. After it releases a
//! session it does not mirror again until the store stops naming it. A mirror
//! adopts only a session it sees in progress, so a finished session left in
//! the store cannot complete it.
//!
//! WRITES
//! ======
//! Writes are batched per intent and applied in order by the runtime. The
//! store has no compare-and-set, so concurrent claims are last-write-wins;
//! resets of the shared `mode`/`client_id` are skipped while another client
//! is named as holder.

use serde::Serialize;

use super::phase::{self, ClaimState, DataEvent, DataPhase, RecordEvent, RecordPhase};
use crate::store::{DataSession, Mode, RecordSession, RecordStatus};

// =============================================================================
// TYPES
// =============================================================================

/// Which of the two exclusive modes a lock or activity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Data,
    Record,
}

impl SessionKind {
    #[must_use]
    pub fn mode(self) -> Mode {
        match self {
            Self::Data => Mode::Data,
            Self::Record => Mode::Record,
        }
    }
}

/// On-demand store subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Data,
    Record,
}

/// One store write, applied to this controller's server/client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Mode(Mode),
    ActiveClient(String),
    DataSession(DataSession),
    RecordSession(RecordSession),
}

/// Why a write batch was issued. Reported back on success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    ClaimData { epoch: u64 },
    ClaimRecord { epoch: u64 },
    ReleaseData,
    ReleaseRecord,
    AutoReset { epoch: u64 },
}

/// Presentation events for the viewer. They carry no control back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UiEvent {
    ActiveStatus { active: bool, kind: SessionKind },
    DataProgress { percentage: u8, stages: [bool; DataSession::STAGES] },
    DataPhase { phase: DataPhase, claim: ClaimState, visible: bool, folder_id: String },
    RecordPhase { phase: RecordPhase, open: bool, time_range: String, date: String },
    RecordCountdown { remaining: String, ended: bool },
    SyncStatus { in_sync: bool },
}

impl UiEvent {
    /// Event name, used as the `event:*` syscall suffix.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveStatus { .. } => "active_status",
            Self::DataProgress { .. } => "data_progress",
            Self::DataPhase { .. } => "data_phase",
            Self::RecordPhase { .. } => "record_phase",
            Self::RecordCountdown { .. } => "record_countdown",
            Self::SyncStatus { .. } => "sync_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Write { intent: WriteIntent, batch: Vec<StoreWrite> },
    ScheduleAutoReset { epoch: u64 },
    Subscribe(Stream),
    Unsubscribe(Stream),
    Lock { kind: SessionKind, locked: bool },
    Active { kind: SessionKind, active: bool },
    Emit(UiEvent),
    StartCountdown { time_range: String },
    StopCountdown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{0} session already active")]
    AlreadyActive(&'static str),
    #[error("server busy: {0}")]
    ServerBusy(String),
    #[error("controller stopped")]
    Stopped,
}

impl crate::frame::ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyActive(_) => "E_ALREADY_ACTIVE",
            Self::ServerBusy(_) => "E_SERVER_BUSY",
            Self::Stopped => "E_CONTROLLER_STOPPED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ServerBusy(_))
    }
}

/// Pipeline folder id: `FLD_` and the last six digits of the ms clock.
#[must_use]
pub fn folder_id(now_ms: i64) -> String {
    format!("FLD_{:06}", now_ms.rem_euclid(1_000_000))
}

/// Point-in-time view of one controller, for `client:state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerView {
    pub server: String,
    pub client: String,
    pub active_in_data: bool,
    pub data_phase: DataPhase,
    pub data_claim: ClaimState,
    pub progress: u8,
    pub stages: [bool; DataSession::STAGES],
    pub folder_id: String,
    pub data_visible: bool,
    pub record_phase: RecordPhase,
    pub record_open: bool,
    pub record_claim: ClaimState,
    pub time_range: String,
    pub date: String,
    pub in_sync: bool,
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct DataTrack {
    phase: DataPhase,
    claim: ClaimState,
    progress: u8,
    session: DataSession,
    folder_id: String,
    visible: bool,
    epoch: u64,
    /// `Completed` only: the store has since stopped naming this client.
    store_moved_on: bool,
}

#[derive(Debug, Default)]
struct RecordTrack {
    phase: RecordPhase,
    claim: ClaimState,
    open: bool,
    time_range: String,
    date: String,
    epoch: u64,
}

#[derive(Debug)]
pub struct SessionController {
    server: String,
    client: String,
    mode: Mode,
    active_client: String,
    data: DataTrack,
    record: RecordTrack,
    /// Set after releasing while still named holder; blocks re-mirroring.
    released: bool,
    /// Folder of the last session this controller saw complete.
    retired_folder: String,
    in_sync: bool,
    epochs: u64,
}

impl SessionController {
    #[must_use]
    pub fn new(server: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            client: client.into(),
            mode: Mode::Idle,
            active_client: String::new(),
            data: DataTrack::default(),
            record: RecordTrack::default(),
            released: false,
            retired_folder: String::new(),
            in_sync: true,
            epochs: 0,
        }
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    #[must_use]
    pub fn client(&self) -> &str {
        &self.client
    }

    #[must_use]
    pub fn view(&self) -> ControllerView {
        ControllerView {
            server: self.server.clone(),
            client: self.client.clone(),
            active_in_data: self.holds(Mode::Data),
            data_phase: self.data.phase,
            data_claim: self.data.claim,
            progress: self.data.progress,
            stages: self.data.session.flags(),
            folder_id: self.data.folder_id.clone(),
            data_visible: self.data.visible,
            record_phase: self.record.phase,
            record_open: self.record.open,
            record_claim: self.record.claim,
            time_range: self.record.time_range.clone(),
            date: self.record.date.clone(),
            in_sync: self.in_sync,
        }
    }

    /// Store names this client as the holder of `mode`.
    fn holds(&self, mode: Mode) -> bool {
        self.mode == mode && self.active_client == self.client
    }

    fn named_holder(&self) -> bool {
        self.holds(Mode::Data) || self.holds(Mode::Record)
    }

    /// Store names another client as holder.
    fn foreign_holder(&self) -> bool {
        !self.active_client.is_empty() && self.active_client != self.client
    }

    /// Store shows a claim that is not ours for `kind`.
    fn foreign_claim(&self, kind: SessionKind) -> bool {
        let other_mode = self.mode != Mode::Idle && self.mode != kind.mode();
        other_mode || self.foreign_holder()
    }

    fn record_waiting(&self) -> bool {
        self.record.open && self.record.phase == RecordPhase::Waiting
    }

    fn next_epoch(&mut self) -> u64 {
        self.epochs += 1;
        self.epochs
    }
}

// =============================================================================
// STORE OBSERVATIONS
// =============================================================================

impl SessionController {
    pub fn observe_mode(&mut self, mode: Mode) -> Vec<Effect> {
        self.mode = mode;
        self.reconcile()
    }

    pub fn observe_active_client(&mut self, client: &str) -> Vec<Effect> {
        client.clone_into(&mut self.active_client);
        self.reconcile()
    }

    pub fn observe_data_session(&mut self, session: &DataSession) -> Vec<Effect> {
        let mut out = Vec::new();
        match self.data.phase {
            DataPhase::Claiming if session.folder_id != self.data.folder_id => return out,
            // A reset landing ahead of the mode change is not a new session.
            DataPhase::Live if session.folder_id.is_empty() && !self.data.folder_id.is_empty() => return out,
            // A fresh mirror only adopts a session it can see in progress.
            DataPhase::Live if self.data.folder_id.is_empty() && self.is_stale_session(session) => return out,
            DataPhase::Claiming | DataPhase::Live => {}
            DataPhase::Inactive | DataPhase::Completed => return out,
        }

        if !session.folder_id.is_empty() {
            session.folder_id.clone_into(&mut self.data.folder_id);
        }
        if self.data.session != *session {
            self.data.session = session.clone();
            let progress = self.data.progress.max(phase::progress(session));
            self.data.progress = progress;
            out.push(self.progress_event());
        }

        if session.transmission_completed {
            self.complete_data(&mut out);
        }
        out
    }

    fn is_stale_session(&self, session: &DataSession) -> bool {
        session.transmission_completed
            || (!self.retired_folder.is_empty() && session.folder_id == self.retired_folder)
    }

    /// `None` means the client entry was removed.
    pub fn observe_record_session(&mut self, session: Option<&RecordSession>) -> Vec<Effect> {
        let mut out = Vec::new();
        let Some(session) = session else {
            if self.record_waiting() {
                self.lose_record(&mut out);
            }
            return out;
        };
        if !self.record_waiting() {
            return out;
        }

        // Mirrors adopt the window from the store.
        if session.requested && self.record.claim == ClaimState::Confirmed {
            let changed = self.record.time_range != session.time_range || self.record.date != session.date;
            if changed && !session.time_range.is_empty() {
                session.time_range.clone_into(&mut self.record.time_range);
                session.date.clone_into(&mut self.record.date);
                out.push(self.record_event());
            }
        }

        if session.status == RecordStatus::Done {
            self.finish_record(&mut out);
        }
        out
    }

    /// Server removed from the store.
    pub fn observe_closed(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        self.mode = Mode::Idle;
        self.active_client.clear();

        if self.data.phase.is_running() {
            self.lose_data(&mut out);
        } else if let Some(next) = self.data.phase.next(DataEvent::Release) {
            self.data.phase = next;
            self.clear_data(&mut out);
        }
        if self.record_waiting() {
            self.lose_record(&mut out);
        } else if self.record.open {
            self.record.open = false;
            self.record.phase = RecordPhase::Waiting;
            out.push(Effect::StopCountdown);
            out.push(self.record_event());
        }
        out
    }

    fn reconcile(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        if self.released {
            if self.named_holder() {
                return out;
            }
            self.released = false;
        }
        self.reconcile_data(&mut out);
        self.reconcile_record(&mut out);
        out
    }

    fn reconcile_data(&mut self, out: &mut Vec<Effect>) {
        match self.data.phase {
            DataPhase::Inactive => {
                if self.holds(Mode::Data) && !self.record_waiting() {
                    self.mirror_data(out);
                }
            }
            DataPhase::Claiming => {
                if self.holds(Mode::Data) {
                    self.confirm_data(out);
                } else if self.foreign_claim(SessionKind::Data) {
                    self.lose_data(out);
                }
            }
            DataPhase::Live => {
                if !self.holds(Mode::Data) {
                    self.lose_data(out);
                }
            }
            DataPhase::Completed => {
                if !self.holds(Mode::Data) {
                    self.data.store_moved_on = true;
                } else if self.data.store_moved_on && !self.record_waiting() {
                    let Some(next) = self.data.phase.next(DataEvent::Release) else {
                        return;
                    };
                    self.data.phase = next;
                    self.clear_data(out);
                    self.mirror_data(out);
                }
            }
        }
    }

    fn reconcile_record(&mut self, out: &mut Vec<Effect>) {
        if !self.record_waiting() {
            if !self.record.open && self.holds(Mode::Record) && !self.data.phase.is_running() {
                self.mirror_record(out);
            }
            return;
        }
        match self.record.claim {
            ClaimState::Optimistic => {
                if self.holds(Mode::Record) {
                    self.record.claim = ClaimState::Confirmed;
                    out.push(self.record_event());
                } else if self.foreign_claim(SessionKind::Record) {
                    self.lose_record(out);
                }
            }
            ClaimState::Confirmed => {
                if !self.holds(Mode::Record) {
                    self.lose_record(out);
                }
            }
        }
    }
}

// =============================================================================
// DATA TRANSITIONS
// =============================================================================

impl SessionController {
    fn mirror_data(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.data.phase.next(DataEvent::Confirm) else {
            return;
        };
        let epoch = self.next_epoch();
        self.data = DataTrack { phase: next, claim: ClaimState::Confirmed, visible: true, epoch, ..DataTrack::default() };
        out.push(Effect::Lock { kind: SessionKind::Data, locked: true });
        out.push(Effect::Active { kind: SessionKind::Data, active: true });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: true, kind: SessionKind::Data }));
        out.push(self.phase_event());
        out.push(Effect::Subscribe(Stream::Data));
    }

    fn confirm_data(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.data.phase.next(DataEvent::Confirm) else {
            return;
        };
        self.data.phase = next;
        self.data.claim = ClaimState::Confirmed;
        out.push(self.phase_event());
    }

    fn lose_data(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.data.phase.next(DataEvent::Lose) else {
            return;
        };
        self.data.phase = next;
        self.clear_data(out);
        out.push(Effect::Unsubscribe(Stream::Data));
        out.push(Effect::Lock { kind: SessionKind::Data, locked: false });
        out.push(Effect::Active { kind: SessionKind::Data, active: false });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Data }));
    }

    fn complete_data(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.data.phase.next(DataEvent::Complete) else {
            return;
        };
        self.data.phase = next;
        self.retired_folder.clone_from(&self.data.folder_id);
        if self.data.progress != 100 {
            self.data.progress = 100;
            out.push(self.progress_event());
        }
        out.push(self.phase_event());
        out.push(Effect::Unsubscribe(Stream::Data));
        out.push(Effect::Lock { kind: SessionKind::Data, locked: false });
        out.push(Effect::Active { kind: SessionKind::Data, active: false });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Data }));
        out.push(Effect::ScheduleAutoReset { epoch: self.data.epoch });
    }

    /// Zero local flags and progress, then announce the new phase.
    fn clear_data(&mut self, out: &mut Vec<Effect>) {
        self.data.progress = 0;
        self.data.session = DataSession::zeroed();
        self.data.folder_id.clear();
        out.push(self.progress_event());
        out.push(self.phase_event());
    }

    fn progress_event(&self) -> Effect {
        Effect::Emit(UiEvent::DataProgress { percentage: self.data.progress, stages: self.data.session.flags() })
    }

    fn phase_event(&self) -> Effect {
        Effect::Emit(UiEvent::DataPhase {
            phase: self.data.phase,
            claim: self.data.claim,
            visible: self.data.visible,
            folder_id: self.data.folder_id.clone(),
        })
    }

    /// Writes that return the server to idle, unless another client holds it.
    fn data_reset_batch(&self) -> Vec<StoreWrite> {
        if self.foreign_holder() || self.mode == Mode::Record {
            return Vec::new();
        }
        vec![
            StoreWrite::DataSession(DataSession::zeroed()),
            StoreWrite::ActiveClient(String::new()),
            StoreWrite::Mode(Mode::Idle),
        ]
    }

    /// Block re-mirroring until the store stops naming this client. A claim
    /// still in flight will name it shortly, so it counts as named.
    fn mark_released(&mut self, claim_in_flight: bool) {
        self.released = claim_in_flight || self.named_holder();
    }
}

// =============================================================================
// RECORD TRANSITIONS
// =============================================================================

impl SessionController {
    fn mirror_record(&mut self, out: &mut Vec<Effect>) {
        let epoch = self.next_epoch();
        self.record = RecordTrack {
            phase: RecordPhase::Waiting,
            claim: ClaimState::Confirmed,
            open: true,
            epoch,
            ..RecordTrack::default()
        };
        out.push(Effect::Lock { kind: SessionKind::Record, locked: true });
        out.push(Effect::Active { kind: SessionKind::Record, active: true });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: true, kind: SessionKind::Record }));
        out.push(self.record_event());
        out.push(Effect::Subscribe(Stream::Record));
    }

    fn lose_record(&mut self, out: &mut Vec<Effect>) {
        self.record.open = false;
        self.record.phase = RecordPhase::Waiting;
        out.push(Effect::Unsubscribe(Stream::Record));
        out.push(Effect::Lock { kind: SessionKind::Record, locked: false });
        out.push(Effect::Active { kind: SessionKind::Record, active: false });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Record }));
        out.push(self.record_event());
    }

    fn finish_record(&mut self, out: &mut Vec<Effect>) {
        let Some(next) = self.record.phase.next(RecordEvent::Finish) else {
            return;
        };
        self.record.phase = next;
        out.push(Effect::Unsubscribe(Stream::Record));
        out.push(Effect::Active { kind: SessionKind::Record, active: false });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Record }));
        out.push(Effect::Lock { kind: SessionKind::Record, locked: false });
        out.push(self.record_event());
        out.push(Effect::StartCountdown { time_range: self.record.time_range.clone() });
        out.push(Effect::Write { intent: WriteIntent::ReleaseRecord, batch: self.record_reset_batch() });
        self.mark_released(false);
    }

    fn record_event(&self) -> Effect {
        Effect::Emit(UiEvent::RecordPhase {
            phase: self.record.phase,
            open: self.record.open,
            time_range: self.record.time_range.clone(),
            date: self.record.date.clone(),
        })
    }

    /// The client's own entry is always reset; shared fields only when not
    /// held by someone else.
    fn record_reset_batch(&self) -> Vec<StoreWrite> {
        let mut batch = vec![StoreWrite::RecordSession(RecordSession::idle())];
        if !self.foreign_holder() && self.mode != Mode::Data {
            batch.push(StoreWrite::ActiveClient(String::new()));
            batch.push(StoreWrite::Mode(Mode::Idle));
        }
        batch
    }
}

// =============================================================================
// OPERATOR COMMANDS
// =============================================================================

impl SessionController {
    /// Claim data mode. `server_busy` is the aggregator's gate at call time.
    pub fn start_data(&mut self, folder_id: String, server_busy: bool) -> Result<Vec<Effect>, SessionError> {
        if self.data.phase.is_running() {
            return Err(SessionError::AlreadyActive("data"));
        }
        if self.record_waiting() {
            return Err(SessionError::AlreadyActive("record"));
        }
        if server_busy {
            return Err(SessionError::ServerBusy(self.server.clone()));
        }

        let mut out = Vec::new();
        if let Some(next) = self.data.phase.next(DataEvent::Release) {
            self.data.phase = next;
        }
        let Some(claiming) = self.data.phase.next(DataEvent::Claim) else {
            return Err(SessionError::AlreadyActive("data"));
        };

        let session = DataSession::fresh(folder_id.clone());
        let epoch = self.next_epoch();
        self.released = false;
        self.data = DataTrack {
            phase: claiming,
            claim: ClaimState::Optimistic,
            progress: 0,
            session: session.clone(),
            folder_id,
            visible: true,
            epoch,
            store_moved_on: false,
        };

        out.push(self.phase_event());
        out.push(self.progress_event());
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: true, kind: SessionKind::Data }));
        out.push(Effect::Lock { kind: SessionKind::Data, locked: true });
        out.push(Effect::Active { kind: SessionKind::Data, active: true });
        out.push(Effect::Subscribe(Stream::Data));
        out.push(Effect::Write {
            intent: WriteIntent::ClaimData { epoch },
            batch: vec![
                StoreWrite::Mode(Mode::Data),
                StoreWrite::ActiveClient(self.client.clone()),
                StoreWrite::DataSession(session),
            ],
        });
        Ok(out)
    }

    /// Manual stop. Idempotent: a second call writes the same idle shape.
    pub fn stop_data(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        let was_running = self.data.phase.is_running();
        let in_flight = self.data.phase == DataPhase::Claiming && self.data.claim == ClaimState::Optimistic;

        if let Some(next) = self.data.phase.next(DataEvent::Release) {
            self.data.phase = next;
            self.clear_data(&mut out);
        }
        if was_running {
            out.push(Effect::Unsubscribe(Stream::Data));
            out.push(Effect::Lock { kind: SessionKind::Data, locked: false });
            out.push(Effect::Active { kind: SessionKind::Data, active: false });
            out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Data }));
        }

        let batch = self.data_reset_batch();
        if !batch.is_empty() {
            out.push(Effect::Write { intent: WriteIntent::ReleaseData, batch });
        }
        self.mark_released(in_flight);
        out
    }

    /// Hide the progress panel. Visibility only.
    pub fn hide_data(&mut self) -> Vec<Effect> {
        if !self.data.visible {
            return Vec::new();
        }
        self.data.visible = false;
        vec![self.phase_event()]
    }

    pub fn start_record(
        &mut self,
        time_range: String,
        date: String,
        server_busy: bool,
    ) -> Result<Vec<Effect>, SessionError> {
        if self.record_waiting() {
            return Err(SessionError::AlreadyActive("record"));
        }
        if self.data.phase.is_running() {
            return Err(SessionError::AlreadyActive("data"));
        }
        if server_busy {
            return Err(SessionError::ServerBusy(self.server.clone()));
        }

        let mut out = Vec::new();
        if self.record.phase == RecordPhase::Done {
            out.push(Effect::StopCountdown);
        }
        let epoch = self.next_epoch();
        self.released = false;
        self.record = RecordTrack {
            phase: RecordPhase::Waiting,
            claim: ClaimState::Optimistic,
            open: true,
            time_range: time_range.clone(),
            date: date.clone(),
            epoch,
        };

        out.push(Effect::Lock { kind: SessionKind::Record, locked: true });
        out.push(Effect::Active { kind: SessionKind::Record, active: true });
        out.push(Effect::Emit(UiEvent::ActiveStatus { active: true, kind: SessionKind::Record }));
        out.push(self.record_event());
        out.push(Effect::Subscribe(Stream::Record));
        out.push(Effect::Write {
            intent: WriteIntent::ClaimRecord { epoch },
            batch: vec![
                StoreWrite::Mode(Mode::Record),
                StoreWrite::ActiveClient(self.client.clone()),
                StoreWrite::RecordSession(RecordSession::requested(time_range, date)),
            ],
        });
        Ok(out)
    }

    /// Close the record panel from any phase. Idempotent.
    pub fn close_record(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        let was_waiting = self.record_waiting();
        let in_flight = was_waiting && self.record.claim == ClaimState::Optimistic;

        if let Some(next) = self.record.phase.next(RecordEvent::Reset) {
            self.record.phase = next;
            out.push(Effect::StopCountdown);
        }
        if was_waiting {
            out.push(Effect::Unsubscribe(Stream::Record));
            out.push(Effect::Lock { kind: SessionKind::Record, locked: false });
            out.push(Effect::Active { kind: SessionKind::Record, active: false });
            out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Record }));
        }
        self.record.open = false;
        out.push(self.record_event());

        // Shared fields are reset only if this client's claim could be the
        // one the store shows.
        let mut batch = self.record_reset_batch();
        if !in_flight && self.mode != Mode::Record {
            batch.truncate(1);
        }
        out.push(Effect::Write { intent: WriteIntent::ReleaseRecord, batch });
        self.mark_released(in_flight);
        out
    }
}

// =============================================================================
// RUNTIME FEEDBACK
// =============================================================================

impl SessionController {
    /// Delayed reset after completion. Stale epochs and foreign holders are
    /// ignored. So is a store whose data path (`store_folder`) already names
    /// another folder.
    pub fn auto_reset_due(&mut self, epoch: u64, store_folder: &str) -> Vec<Effect> {
        if epoch != self.data.epoch || self.data.phase != DataPhase::Completed {
            return Vec::new();
        }
        if !store_folder.is_empty() && store_folder != self.data.folder_id {
            return Vec::new();
        }
        let batch = self.data_reset_batch();
        if batch.is_empty() {
            return Vec::new();
        }
        self.mark_released(false);
        vec![Effect::Write { intent: WriteIntent::AutoReset { epoch }, batch }]
    }

    /// Countdown tick, forwarded as a display event only while `Done`.
    pub fn countdown_tick(&mut self, remaining: String, ended: bool) -> Vec<Effect> {
        if self.record.phase != RecordPhase::Done {
            return vec![Effect::StopCountdown];
        }
        let mut out = vec![Effect::Emit(UiEvent::RecordCountdown { remaining, ended })];
        if ended {
            out.push(Effect::StopCountdown);
        }
        out
    }

    /// A write batch was abandoned after retries. Remote truth wins.
    pub fn write_failed(&mut self, intent: WriteIntent) -> Vec<Effect> {
        let mut out = Vec::new();
        match intent {
            WriteIntent::ClaimData { epoch } => {
                if epoch == self.data.epoch && self.data.claim == ClaimState::Optimistic {
                    self.revert_data_claim(&mut out);
                }
            }
            WriteIntent::ClaimRecord { epoch } => {
                if epoch == self.record.epoch && self.record.claim == ClaimState::Optimistic && self.record_waiting() {
                    self.lose_record(&mut out);
                }
            }
            WriteIntent::ReleaseData | WriteIntent::ReleaseRecord | WriteIntent::AutoReset { .. } => {
                self.released = false;
                out.extend(self.reconcile());
            }
        }
        if self.in_sync {
            self.in_sync = false;
            out.push(Effect::Emit(UiEvent::SyncStatus { in_sync: false }));
        }
        out
    }

    pub fn write_succeeded(&mut self, _intent: WriteIntent) -> Vec<Effect> {
        if self.in_sync {
            return Vec::new();
        }
        self.in_sync = true;
        vec![Effect::Emit(UiEvent::SyncStatus { in_sync: true })]
    }

    fn revert_data_claim(&mut self, out: &mut Vec<Effect>) {
        let was_running = self.data.phase.is_running();
        let Some(next) = self.data.phase.next(DataEvent::Release) else {
            return;
        };
        self.data.phase = next;
        self.clear_data(out);
        if was_running {
            out.push(Effect::Unsubscribe(Stream::Data));
            out.push(Effect::Lock { kind: SessionKind::Data, locked: false });
            out.push(Effect::Active { kind: SessionKind::Data, active: false });
            out.push(Effect::Emit(UiEvent::ActiveStatus { active: false, kind: SessionKind::Data }));
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
