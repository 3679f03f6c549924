//! pisentry-core: alarm state, presence tracking and capture types.
//!
//! Pure, deterministic building blocks with no IO or async dependencies.
//! Time is always passed in (or read through [`clock::Clock`]) so every
//! rule here can be tested without sleeping.

pub mod alarm;
pub mod capture;
pub mod clock;
pub mod motion;
pub mod presence;
pub mod types;

pub use alarm::{AlarmEvent, Transition, transition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use motion::{MotionThresholds, MotionTrigger};
pub use presence::PresenceTracker;
pub use types::{
    AlarmState, CaptureArtifact, CaptureMode, CaptureRequest, CoreError, MacAddress,
    OperatorCommand,
};
