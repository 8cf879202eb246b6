//! Session state machine.
//!
//! A [`SessionContext`] is owned by the caller (typically one per open document)
//! and passed into every command of the [`SessionOrchestrator`]. It carries the
//! registry, the settings, the host notification queue and the current phase.
//!
//! Phases move `Idle → Configuring → Running → Baked → Idle`. A command either
//! completes (fully or soft-degraded) or reports itself cancelled with the phase
//! left at a known value.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::ErrorKind;
use crate::notify::EventQueue;
use crate::store::StateStore;

mod cloth;
/// Command-boundary instrumentation and failure policy.
pub mod dispatch;
/// Command implementations.
pub mod orchestrator;
mod rigid;

pub use orchestrator::SessionOrchestrator;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session.
    #[default]
    Idle,
    /// Start is setting up participants.
    Configuring,
    /// The solver is running the session.
    Running,
    /// The simulation was committed to a cache or keyframes.
    Baked,
}

impl SessionPhase {
    /// Returns true while a session exists (Running or Baked).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Baked)
    }
}

/// Simulation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Rigid bodies dropped onto the collider.
    #[default]
    Rigid,
    /// Cloth draped over the collider.
    Cloth,
}

impl Mode {
    /// The other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Rigid => Self::Cloth,
            Self::Cloth => Self::Rigid,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rigid => write!(f, "rigid"),
            Self::Cloth => write!(f, "cloth"),
        }
    }
}

/// Unique identifier of one started session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Finished or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The command completed, possibly soft-degraded.
    Finished,
    /// The command did nothing or rolled back.
    Cancelled,
}

/// What a command reports back to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Finished or cancelled.
    pub status: OutcomeStatus,
    /// Human-readable summary.
    pub message: String,
    /// Error class when cancelled.
    pub error: Option<ErrorKind>,
}

impl CommandOutcome {
    /// A finished outcome.
    #[must_use]
    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Finished,
            message: message.into(),
            error: None,
        }
    }

    /// A cancelled outcome.
    #[must_use]
    pub fn cancelled(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            message: message.into(),
            error: Some(kind),
        }
    }

    /// Returns true if the command finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == OutcomeStatus::Finished
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            OutcomeStatus::Finished => write!(f, "FINISHED: {}", self.message),
            OutcomeStatus::Cancelled => write!(f, "CANCELLED: {}", self.message),
        }
    }
}

/// Per-document session state.
#[derive(Debug)]
pub struct SessionContext {
    store: Arc<StateStore>,
    events: EventQueue,
    /// User-tunable parameters; read at each command.
    pub settings: SessionSettings,
    phase: SessionPhase,
    mode: Mode,
    session_id: Option<SessionId>,
    started_at: Option<DateTime<Utc>>,
    start_frame: i32,
    last_failure: Option<String>,
}

impl SessionContext {
    /// Creates an idle context.
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        let start_frame = settings.world.frame_start;
        Self {
            store: Arc::new(StateStore::new()),
            events: EventQueue::default(),
            settings,
            phase: SessionPhase::Idle,
            mode: Mode::default(),
            session_id: None,
            started_at: None,
            start_frame,
            last_failure: None,
        }
    }

    /// The registry; shareable with host callbacks.
    #[must_use]
    pub const fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Host notification queue.
    #[must_use]
    pub const fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Selected mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// ID of the running session.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// When the running session started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Frame the running session started at.
    #[must_use]
    pub const fn start_frame(&self) -> i32 {
        self.start_frame
    }

    /// Message of the most recent cancelled command.
    #[must_use]
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub(crate) fn begin(&mut self, mode: Mode) {
        self.phase = SessionPhase::Configuring;
        self.mode = mode;
    }

    pub(crate) fn mark_running(&mut self, start_frame: i32) {
        self.phase = SessionPhase::Running;
        self.session_id = Some(SessionId::new());
        self.started_at = Some(Utc::now());
        self.start_frame = start_frame;
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Returns to `Idle` and forgets the session identity.
    pub(crate) fn end(&mut self) {
        self.phase = SessionPhase::Idle;
        self.session_id = None;
        self.started_at = None;
    }

    pub(crate) fn record_failure(&mut self, message: Option<String>) {
        self.last_failure = message;
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_idle() {
        let ctx = SessionContext::default();
        assert_eq!(ctx.phase(), SessionPhase::Idle);
        assert_eq!(ctx.mode(), Mode::Rigid);
        assert!(ctx.session_id().is_none());
        assert!(ctx.store().is_empty().unwrap());
    }

    #[test]
    fn running_records_identity() {
        let mut ctx = SessionContext::default();
        ctx.begin(Mode::Cloth);
        assert_eq!(ctx.phase(), SessionPhase::Configuring);
        ctx.mark_running(12);
        assert!(ctx.phase().is_active());
        assert_eq!(ctx.start_frame(), 12);
        assert!(ctx.session_id().is_some());
        assert!(ctx.started_at().is_some());
        ctx.end();
        assert_eq!(ctx.phase(), SessionPhase::Idle);
        assert!(ctx.session_id().is_none());
    }

    #[test]
    fn outcome_display() {
        let ok = CommandOutcome::finished("done");
        assert!(ok.is_finished());
        assert_eq!(ok.to_string(), "FINISHED: done");
        let bad = CommandOutcome::cancelled(ErrorKind::Rejected, "no");
        assert!(!bad.is_finished());
        assert_eq!(bad.error, Some(ErrorKind::Rejected));
    }
}
