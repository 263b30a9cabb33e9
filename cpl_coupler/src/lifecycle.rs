//! Coupling lifecycle: Uninitialized → Ready ⇄ Exchanging → Uninitialized.
//!
//! A failed initialisation returns to Uninitialized so it can be retried.
//! A fatal exchange error parks the coupler in Failed, where only
//! `finalize` is accepted.

use std::fmt;

/// Lifecycle state of a coupler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CouplerState {
    /// No coupling context.
    #[default]
    Uninitialized,
    /// Building the context.
    Initializing,
    /// Context built; exchanges allowed.
    Ready,
    /// An exchange round is in progress.
    Exchanging,
    /// A round failed in a way later rounds cannot recover from.
    Failed,
}

impl fmt::Display for CouplerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Exchanging => "exchanging",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded; new state.
    Ok(CouplerState),
    /// Transition rejected; reason.
    Rejected(&'static str),
}

/// Event that can trigger a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `initialize` called.
    Initialize,
    /// Context built.
    InitComplete,
    /// Context could not be built.
    InitFailed,
    /// `exchange` called.
    ExchangeStart,
    /// Round finished.
    ExchangeComplete,
    /// Round failed, coupler still consistent.
    ExchangeAborted,
    /// Round failed with a layout disagreement.
    FatalError,
    /// `finalize` called.
    Finalize,
}

/// Holder of the current lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct LifecycleMachine {
    state: CouplerState,
}

impl LifecycleMachine {
    /// Machine in Uninitialized.
    pub const fn new() -> Self {
        Self {
            state: CouplerState::Uninitialized,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> CouplerState {
        self.state
    }

    /// Whether an exchange may start.
    #[inline]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, CouplerState::Ready)
    }

    /// Attempt a transition.
    pub fn handle_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        use CouplerState::*;
        use LifecycleEvent::*;

        let next = match (self.state, event) {
            (Uninitialized, Initialize) => Initializing,
            (Initializing, InitComplete) => Ready,
            (Initializing, InitFailed) => Uninitialized,

            (Ready, ExchangeStart) => Exchanging,
            (Exchanging, ExchangeComplete) => Ready,
            (Exchanging, ExchangeAborted) => Ready,
            (Exchanging, FatalError) => Failed,

            (Ready | Failed, Finalize) => Uninitialized,

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.state, event)),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

fn invalid_transition_reason(state: CouplerState, event: LifecycleEvent) -> &'static str {
    use CouplerState::*;
    use LifecycleEvent::*;
    match (state, event) {
        (Ready | Exchanging | Failed, Initialize) => "coupler already initialized",
        (Uninitialized, ExchangeStart | Finalize) => "coupler not initialized",
        (Failed, ExchangeStart) => "coupler failed; finalize required",
        (Exchanging, ExchangeStart | Finalize) => "exchange in progress",
        (Initializing, _) => "initialization in progress",
        _ => "invalid event for current state",
    }
}
