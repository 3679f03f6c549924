//! Thread-safe owner of the alarm state.
//!
//! All writers go through one `apply` helper, which evaluates the
//! transition table inside the watch channel's write lock, so every state
//! change is atomic and observers see each committed state in order.
//!
//! The watch channel only keeps the latest state. Entering Armed from
//! Disarmed or Disabled also bumps an armed generation, so work started in
//! one armed period can tell that the alarm left and came back meanwhile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use pisentry_core::{AlarmEvent, AlarmState, Transition, transition};

use crate::presence::PresenceMonitor;

/// Operator commands that change the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCommand {
    Enable,
    Disable,
}

pub struct AlarmStateMachine {
    state: watch::Sender<AlarmState>,
    armed_generation: AtomicU64,
    presence: Arc<PresenceMonitor>,
}

impl AlarmStateMachine {
    /// Starts `Disabled`.
    pub fn new(presence: Arc<PresenceMonitor>) -> Self {
        let (state, _) = watch::channel(AlarmState::Disabled);
        Self {
            state,
            armed_generation: AtomicU64::new(0),
            presence,
        }
    }

    pub fn current(&self) -> AlarmState {
        *self.state.borrow()
    }

    /// Observe committed states. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<AlarmState> {
        self.state.subscribe()
    }

    pub fn presence(&self) -> &Arc<PresenceMonitor> {
        &self.presence
    }

    /// Number of times Armed was entered from a non-active state.
    pub fn armed_generation(&self) -> u64 {
        self.armed_generation.load(Ordering::Acquire)
    }

    fn apply(&self, event: impl FnOnce() -> AlarmEvent) -> Transition {
        self.apply_if(|| true, event)
    }

    /// `guard` runs under the write lock. When it fails the event is rejected.
    fn apply_if(
        &self,
        guard: impl FnOnce() -> bool,
        event: impl FnOnce() -> AlarmEvent,
    ) -> Transition {
        let mut outcome = Transition::Unchanged(AlarmState::Disabled);
        self.state.send_if_modified(|state| {
            outcome = if guard() {
                transition(*state, event())
            } else {
                Transition::Rejected(*state)
            };
            match outcome {
                Transition::Moved { from, to } => {
                    if to == AlarmState::Armed && !from.is_active() {
                        self.armed_generation.fetch_add(1, Ordering::AcqRel);
                    }
                    *state = to;
                    true
                }
                Transition::Unchanged(_) | Transition::Rejected(_) => false,
            }
        });

        match outcome {
            Transition::Moved { from, to } => tracing::info!("alarm {from} -> {to}"),
            Transition::Rejected(state) => {
                tracing::debug!("stale trigger in state {state}, ignored");
            }
            Transition::Unchanged(_) => {}
        }
        outcome
    }

    pub fn apply_presence(&self, present: bool) -> Transition {
        self.apply(|| {
            if present {
                AlarmEvent::PresenceAppeared
            } else {
                AlarmEvent::PresenceLost
            }
        })
    }

    /// Enable samples presence inside the same critical section as the
    /// transition, so Armed vs Disarmed matches the moment of the command.
    pub fn apply_command(&self, command: AlarmCommand) -> Transition {
        match command {
            AlarmCommand::Enable => self.apply(|| AlarmEvent::Enable {
                present: self.presence.is_any_present(),
            }),
            AlarmCommand::Disable => self.apply(|| AlarmEvent::Disable),
        }
    }

    /// Armed -> Triggered, only while still in armed period `generation`.
    /// Returns `false` when the alarm left Armed since then, even if it has
    /// been re-armed.
    pub fn mark_triggered_if(&self, generation: u64) -> bool {
        self.apply_if(
            || self.armed_generation() == generation,
            || AlarmEvent::MotionConfirmed,
        )
        .changed()
    }

    /// Triggered -> Armed once the notification attempt finished.
    pub fn clear_triggered(&self) -> Transition {
        self.apply(|| AlarmEvent::NotifyComplete)
    }

    /// Re-derive Armed/Disarmed from current presence.
    pub fn reevaluate(&self) -> Transition {
        self.apply_presence(self.presence.is_any_present())
    }
}
