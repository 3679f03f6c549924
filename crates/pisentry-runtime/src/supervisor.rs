//! Motion supervisor: runs motion analysis while armed and turns motion into
//! queued captures.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};

use pisentry_core::{AlarmState, CaptureMode, MotionTrigger};

use crate::alarm::AlarmStateMachine;
use crate::camera::{Camera, CaptureLock, blocking, capture_request};
use crate::pipeline::CaptureQueue;

/// How often the supervisor re-reads the alarm state.
///
/// Polling keeps the supervisor independent of the state channel. The
/// tradeoff is latency: analysis may keep running for up to one interval
/// after the alarm leaves Armed.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What each motion capture produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub mode: CaptureMode,
    /// Photo count, or GIF length in seconds.
    pub count: u32,
    /// Motion within this long of starting analysis is ignored.
    pub settle: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Gif,
            count: 3,
            settle: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    /// `epoch` is the capture lock epoch taken when analysis started.
    Watching { since: Instant, epoch: u64 },
}

pub struct MotionSupervisor<C> {
    camera: Arc<C>,
    alarm: Arc<AlarmStateMachine>,
    lock: CaptureLock,
    queue: CaptureQueue,
    trigger: MotionTrigger,
    settings: CaptureSettings,
    mode: Mode,
}

impl<C: Camera + 'static> MotionSupervisor<C> {
    pub fn new(
        camera: Arc<C>,
        alarm: Arc<AlarmStateMachine>,
        lock: CaptureLock,
        queue: CaptureQueue,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            camera,
            alarm,
            lock,
            queue,
            trigger: MotionTrigger::new(),
            settings,
            mode: Mode::Idle,
        }
    }

    #[cfg(test)]
    fn is_watching(&self) -> bool {
        matches!(self.mode, Mode::Watching { .. })
    }

    pub async fn run(mut self) {
        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) {
        self.alarm.reevaluate();
        let armed = self.alarm.current() == AlarmState::Armed;

        match self.mode {
            Mode::Idle => {
                if armed {
                    self.start_watching().await;
                }
            }
            Mode::Watching { since, epoch } => {
                if !armed {
                    self.stop_watching().await;
                } else if self.lock.epoch() != epoch {
                    // An ad-hoc capture took the camera and stopped analysis.
                    tracing::debug!("camera taken by ad-hoc capture");
                    self.mode = Mode::Idle;
                } else if self.trigger.take() {
                    if since.elapsed() < self.settings.settle {
                        tracing::debug!("motion during settle window ignored");
                    } else {
                        self.capture_motion().await;
                    }
                }
            }
        }
    }

    async fn start_watching(&mut self) {
        let Some(guard) = self.lock.try_acquire() else {
            tracing::debug!("camera busy, motion analysis deferred");
            return;
        };
        self.trigger.clear();

        let camera = Arc::clone(&self.camera);
        let trigger = self.trigger.clone();
        match blocking(move || camera.start_motion_analysis(trigger)).await {
            Ok(()) => {
                tracing::info!("motion analysis started");
                self.mode = Mode::Watching {
                    since: Instant::now(),
                    epoch: guard.epoch(),
                };
            }
            Err(e) => tracing::warn!("failed to start motion analysis: {e}"),
        }
    }

    async fn stop_watching(&mut self) {
        let camera = Arc::clone(&self.camera);
        match blocking(move || camera.stop_motion_analysis()).await {
            Ok(()) => tracing::info!("motion analysis stopped"),
            Err(e) => tracing::warn!("failed to stop motion analysis: {e}"),
        }
        self.mode = Mode::Idle;
    }

    async fn capture_motion(&mut self) {
        let Some(guard) = self.lock.try_acquire() else {
            self.mode = Mode::Idle;
            return;
        };
        tracing::info!("motion detected, capturing {}", self.settings.mode);

        let camera = Arc::clone(&self.camera);
        let request = capture_request(
            self.alarm.presence().now(),
            self.settings.mode,
            self.settings.count,
        );
        let result = blocking(move || {
            camera.stop_motion_analysis()?;
            camera.capture(&request)
        })
        .await;

        match result {
            Ok(artifact) => {
                if !self.queue.enqueue(artifact) {
                    tracing::warn!("capture pipeline is gone, capture dropped");
                }
            }
            Err(e) => tracing::warn!("motion capture failed: {e}"),
        }

        self.trigger.clear();
        self.mode = Mode::Idle;
        drop(guard);

        if self.alarm.current() == AlarmState::Armed {
            self.start_watching().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tokio::sync::mpsc;

    use pisentry_core::{Clock, ManualClock};

    use crate::alarm::AlarmCommand;
    use crate::camera::tests::FakeCamera;
    use crate::pipeline::Queued;
    use crate::presence::tests::{mac, monitor, ts};

    struct Harness {
        clock: Arc<ManualClock>,
        alarm: Arc<AlarmStateMachine>,
        camera: Arc<FakeCamera>,
        lock: CaptureLock,
        captured: mpsc::UnboundedReceiver<Queued>,
        supervisor: MotionSupervisor<FakeCamera>,
    }

    fn harness(camera: FakeCamera) -> Harness {
        let clock = Arc::new(ManualClock::new(ts("2026-10-14T22:00:00Z")));
        let presence = monitor(&["aa:aa:aa:aa:aa:01"], Arc::clone(&clock));
        let alarm = Arc::new(AlarmStateMachine::new(presence));
        let camera = Arc::new(camera);
        let lock = CaptureLock::new();
        let (queue, captured) = CaptureQueue::channel(Arc::clone(&alarm));
        let supervisor = MotionSupervisor::new(
            Arc::clone(&camera),
            Arc::clone(&alarm),
            lock.clone(),
            queue,
            CaptureSettings::default(),
        );
        Harness {
            clock,
            alarm,
            camera,
            lock,
            captured,
            supervisor,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn armed_starts_analysis() {
        let mut h = harness(FakeCamera::default());
        h.supervisor.tick().await;
        assert!(!h.supervisor.is_watching(), "disabled stays idle");

        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;
        assert!(h.supervisor.is_watching());
        assert!(h.camera.is_analysing());
        assert_eq!(FakeCamera::count(&h.camera.starts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_window_suppresses_capture() {
        let mut h = harness(FakeCamera::default());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;

        tokio::time::advance(Duration::from_millis(500)).await;
        h.camera.fire_motion();
        h.supervisor.tick().await;
        assert_eq!(FakeCamera::count(&h.camera.captures), 0);
        assert!(h.supervisor.is_watching());

        tokio::time::advance(Duration::from_millis(600)).await;
        h.camera.fire_motion();
        h.supervisor.tick().await;

        assert_eq!(FakeCamera::count(&h.camera.captures), 1);
        let queued = h.captured.try_recv().expect("artifact queued");
        assert_eq!(queued.generation, h.alarm.armed_generation());
        let artifact = queued.artifact;
        assert_eq!(artifact.mode, CaptureMode::Gif);
        assert_eq!(artifact.captured_at, h.clock.now());
        assert_eq!(FakeCamera::count(&h.camera.starts), 2, "analysis restarted");
        assert!(h.supervisor.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_opens_new_settle_window() {
        let mut h = harness(FakeCamera::default());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        h.camera.fire_motion();
        h.supervisor.tick().await;
        assert_eq!(FakeCamera::count(&h.camera.captures), 1);

        h.camera.fire_motion();
        h.supervisor.tick().await;
        assert_eq!(FakeCamera::count(&h.camera.captures), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_armed_stops_analysis() {
        let mut h = harness(FakeCamera::default());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;

        h.alarm.apply_command(AlarmCommand::Disable);
        h.supervisor.tick().await;

        assert!(!h.supervisor.is_watching());
        assert!(!h.camera.is_analysing());
        assert_eq!(FakeCamera::count(&h.camera.stops), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_timeout_arms_and_starts_watching() {
        let mut h = harness(FakeCamera::default());
        h.alarm
            .presence()
            .observe(&mac("aa:aa:aa:aa:aa:01"), h.clock.now());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;
        assert_eq!(h.alarm.current(), AlarmState::Disarmed);
        assert!(!h.supervisor.is_watching());

        h.clock.advance(TimeDelta::seconds(701));
        h.supervisor.tick().await;

        assert_eq!(h.alarm.current(), AlarmState::Armed);
        assert!(h.supervisor.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_defers_start() {
        let mut h = harness(FakeCamera::default());
        h.alarm.apply_command(AlarmCommand::Enable);
        let guard = h.lock.try_acquire().expect("free");

        h.supervisor.tick().await;
        assert!(!h.supervisor.is_watching());

        drop(guard);
        h.supervisor.tick().await;
        assert!(h.supervisor.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn adhoc_capture_returns_supervisor_to_idle() {
        let mut h = harness(FakeCamera::default());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;

        let guard = h.lock.try_acquire().expect("free");
        h.camera.stop_motion_analysis().expect("stop");
        drop(guard);

        h.supervisor.tick().await;
        assert!(!h.supervisor.is_watching());
        h.supervisor.tick().await;
        assert!(h.supervisor.is_watching());
        assert_eq!(FakeCamera::count(&h.camera.starts), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_keeps_supervising() {
        let mut h = harness(FakeCamera::failing());
        h.alarm.apply_command(AlarmCommand::Enable);
        h.supervisor.tick().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        h.camera.fire_motion();

        h.supervisor.tick().await;

        assert_eq!(FakeCamera::count(&h.camera.captures), 1);
        assert!(h.captured.try_recv().is_err());
        assert!(h.supervisor.is_watching());
    }
}
