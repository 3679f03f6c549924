//! Alarm transition table.
//!
//! Every `(AlarmState, AlarmEvent)` pair has exactly one outcome. The
//! thread-safe owner of the current state lives in the runtime crate and
//! applies these outcomes inside a single writer critical section.

use crate::types::AlarmState;

/// Inputs that can move the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmEvent {
    /// Operator enable. `present` is the presence verdict at command time.
    Enable { present: bool },
    /// Operator disable.
    Disable,
    /// A trusted device is currently present.
    PresenceAppeared,
    /// No trusted device is present any more.
    PresenceLost,
    /// A capture passed active confirmation.
    MotionConfirmed,
    /// The notification attempt for a confirmed capture finished.
    NotifyComplete,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: AlarmState, to: AlarmState },
    /// The event is a no-op in this state.
    Unchanged(AlarmState),
    /// A stale motion confirmation arrived after the state left Armed.
    Rejected(AlarmState),
}

impl Transition {
    /// State after the event was applied.
    pub fn state(self) -> AlarmState {
        match self {
            Self::Moved { to, .. } => to,
            Self::Unchanged(s) | Self::Rejected(s) => s,
        }
    }

    pub fn changed(self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}

/// Apply `event` to `state`.
pub fn transition(state: AlarmState, event: AlarmEvent) -> Transition {
    use AlarmEvent as E;
    use AlarmState as S;

    let to = match (state, event) {
        (S::Disabled, E::Enable { present: true }) => S::Disarmed,
        (S::Disabled, E::Enable { present: false }) => S::Armed,

        (S::Armed | S::Disarmed | S::Triggered, E::Disable) => S::Disabled,

        (S::Armed, E::PresenceAppeared) => S::Disarmed,
        (S::Disarmed, E::PresenceLost) => S::Armed,

        (S::Armed, E::MotionConfirmed) => S::Triggered,
        (_, E::MotionConfirmed) => return Transition::Rejected(state),

        (S::Triggered, E::NotifyComplete) => S::Armed,

        // Disabled is sticky for presence, Enable is a no-op once enabled,
        // presence has no effect on Triggered until it clears.
        (_, E::Enable { .. } | E::Disable | E::PresenceAppeared | E::PresenceLost)
        | (_, E::NotifyComplete) => return Transition::Unchanged(state),
    };

    Transition::Moved { from: state, to }
}
