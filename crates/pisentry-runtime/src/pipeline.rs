//! Capture queue and the confirm-then-forward drain loop.

use std::sync::Arc;

use tokio::sync::mpsc;

use pisentry_core::{AlarmState, CaptureArtifact};
use pisentry_net::ActiveProbe;

use crate::alarm::AlarmStateMachine;
use crate::notifier::{Notifier, forward_artifact};
use crate::presence::{ConfirmPolicy, active_confirm};

/// A queued artifact and the armed generation it was captured in.
#[derive(Debug, Clone)]
pub struct Queued {
    pub artifact: CaptureArtifact,
    pub generation: u64,
}

/// Producer side of the capture FIFO.
#[derive(Clone)]
pub struct CaptureQueue {
    tx: mpsc::UnboundedSender<Queued>,
    alarm: Arc<AlarmStateMachine>,
}

impl CaptureQueue {
    pub(crate) fn channel(
        alarm: Arc<AlarmStateMachine>,
    ) -> (Self, mpsc::UnboundedReceiver<Queued>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, alarm }, rx)
    }

    /// Push without blocking, stamped with the current armed generation.
    /// Returns `false` when the pipeline is gone.
    pub fn enqueue(&self, artifact: CaptureArtifact) -> bool {
        let generation = self.alarm.armed_generation();
        self.tx.send(Queued { artifact, generation }).is_ok()
    }
}

/// What happened to one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Confirmed and delivered.
    Forwarded,
    /// Confirmed but delivery failed. Not retried.
    ForwardFailed,
    /// A trusted device answered the probe.
    Suppressed,
    /// The alarm left Armed after the artifact was captured.
    Stale,
    /// Arrived while the alarm was not active.
    Discarded,
}

/// Log the outcome of one artifact.
pub fn log_outcome(artifact: &CaptureArtifact, disposition: Disposition) {
    let files = artifact.paths.len();
    let at = artifact.captured_at;
    match disposition {
        Disposition::Forwarded => {
            tracing::info!("capture from {at} forwarded ({files} file(s))");
        }
        Disposition::ForwardFailed => {
            tracing::warn!("capture from {at} confirmed but not delivered");
        }
        Disposition::Suppressed => {
            tracing::info!("capture from {at} suppressed: trusted device nearby");
        }
        Disposition::Stale => tracing::debug!("capture from {at} dropped: alarm left armed"),
        Disposition::Discarded => tracing::debug!("capture from {at} discarded: alarm not active"),
    }
}

pub struct CapturePipeline<P, N> {
    rx: mpsc::UnboundedReceiver<Queued>,
    alarm: Arc<AlarmStateMachine>,
    probe: Arc<P>,
    notifier: Arc<N>,
    network: String,
    policy: ConfirmPolicy,
}

impl<P: ActiveProbe + 'static, N: Notifier> CapturePipeline<P, N> {
    /// Build the pipeline and the queue feeding it.
    pub fn new(
        alarm: Arc<AlarmStateMachine>,
        probe: Arc<P>,
        notifier: Arc<N>,
        network: impl Into<String>,
        policy: ConfirmPolicy,
    ) -> (Self, CaptureQueue) {
        let (queue, rx) = CaptureQueue::channel(Arc::clone(&alarm));
        let pipeline = Self {
            rx,
            alarm,
            probe,
            notifier,
            network: network.into(),
            policy,
        };
        (pipeline, queue)
    }

    /// Drain loop. Returns once every [`CaptureQueue`] is dropped.
    pub async fn run(mut self) {
        let mut states = self.alarm.subscribe();
        loop {
            tokio::select! {
                biased;
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    if !state.is_active() {
                        self.drain(state);
                    }
                }
                next = self.rx.recv() => {
                    let Some(queued) = next else { break };
                    let disposition = self.process(&queued).await;
                    log_outcome(&queued.artifact, disposition);
                }
            }
        }
        tracing::debug!("capture pipeline stopped");
    }

    /// Discard everything queued.
    fn drain(&mut self, state: AlarmState) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::info!("discarded {dropped} queued capture(s): alarm is {state}");
        }
        dropped
    }

    async fn process(&mut self, queued: &Queued) -> Disposition {
        let state = self.alarm.current();
        if !state.is_active() {
            self.drain(state);
            return Disposition::Discarded;
        }
        if queued.generation != self.alarm.armed_generation() {
            // Left Armed and came back since this was captured.
            self.drain(state);
            return Disposition::Stale;
        }

        let presence = Arc::clone(self.alarm.presence());
        let trusted = presence.trusted();
        if let Some(hit) = active_confirm(&self.probe, &trusted, &self.network, self.policy).await {
            let from = hit.address.map_or_else(|| "unknown address".to_string(), |a| a.to_string());
            tracing::info!("{} answered the probe from {from}, not alerting", hit.mac);
            presence.observe(&hit.mac, presence.now());
            let state = self.alarm.reevaluate().state();
            self.drain(state);
            return Disposition::Suppressed;
        }

        let mut artifact = queued.artifact.clone();
        artifact.confirmed = true;
        if !self.alarm.mark_triggered_if(queued.generation) {
            let state = self.alarm.current();
            self.drain(state);
            return Disposition::Stale;
        }

        let result = forward_artifact(&*self.notifier, &artifact).await;
        self.alarm.clear_triggered();
        match result {
            Ok(()) => Disposition::Forwarded,
            Err(e) => {
                tracing::error!("failed to notify operator: {e}");
                Disposition::ForwardFailed
            }
        }
    }
}
