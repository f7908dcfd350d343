//! Session phases: explicit transition tables for data and record mode.
//!
//! DESIGN
//! ======
//! Phases change only through `next`, which returns `None` for transitions
//! the table does not allow. The controller treats `None` as "ignore this
//! event", so edge-triggered effects (completion, finish) run exactly once
//! per session without a separate latch.
//!
//! ```text
//!            Claim            Confirm            Complete
//! Inactive ───────▶ Claiming ────────▶ Live ───────────▶ Completed
//!    ▲  │ Confirm (mirror)               ▲                   │
//!    │  └────────────────────────────────┘                   │
//!    └──────────── Lose / Release ◀──────────── Release ─────┘
//! ```

use serde::Serialize;

use crate::store::DataSession;

// =============================================================================
// DATA MODE
// =============================================================================

/// Local phase of this client's participation in data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPhase {
    #[default]
    Inactive,
    /// Claim issued, store not yet showing this client as holder.
    Claiming,
    Live,
    /// Terminal for display: pinned until released.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEvent {
    /// Operator started a data session.
    Claim,
    /// Store names this client as data holder.
    Confirm,
    /// `transmission_completed` observed.
    Complete,
    /// Store names another mode or holder.
    Lose,
    /// Stop, auto-reset, or revert.
    Release,
}

impl DataPhase {
    #[must_use]
    pub fn next(self, event: DataEvent) -> Option<Self> {
        use DataEvent as E;
        use DataPhase as P;

        match (self, event) {
            (P::Inactive, E::Claim) => Some(P::Claiming),
            (P::Inactive | P::Claiming, E::Confirm) => Some(P::Live),
            (P::Claiming | P::Live, E::Complete) => Some(P::Completed),
            (P::Claiming | P::Live, E::Lose) => Some(P::Inactive),
            (P::Claiming | P::Live | P::Completed, E::Release) => Some(P::Inactive),
            _ => None,
        }
    }

    /// Claiming or live: the session still holds the server.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Claiming | Self::Live)
    }
}

/// Pipeline progress in percent: share of stage flags that are true.
#[must_use]
pub fn progress(session: &DataSession) -> u8 {
    let done = session.completed_stages();
    let stages = DataSession::STAGES;
    u8::try_from((100 * done + stages / 2) / stages).unwrap_or(100)
}

// =============================================================================
// RECORD MODE
// =============================================================================

/// Local phase of this client's record panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPhase {
    #[default]
    Waiting,
    /// Recorder reported done. Pinned until the operator closes.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    /// Store record status became `done`.
    Finish,
    /// Operator closed the panel.
    Reset,
}

impl RecordPhase {
    #[must_use]
    pub fn next(self, event: RecordEvent) -> Option<Self> {
        match (self, event) {
            (Self::Waiting, RecordEvent::Finish) => Some(Self::Done),
            (Self::Done, RecordEvent::Reset) => Some(Self::Waiting),
            _ => None,
        }
    }
}

// =============================================================================
// CLAIMS
// =============================================================================

/// Whether a claim has been observed in the store yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    #[default]
    Optimistic,
    Confirmed,
}

#[cfg(test)]
#[path = "phase_test.rs"]
mod tests;
