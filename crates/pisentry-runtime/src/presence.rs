//! Shared presence state, the passive listener and active confirmation.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use pisentry_core::{Clock, MacAddress, PresenceTracker};
use pisentry_net::ActiveProbe;

use crate::alarm::AlarmStateMachine;

/// Thread-safe presence view: tracker + clock + timeout.
pub struct PresenceMonitor {
    tracker: Mutex<PresenceTracker>,
    clock: Arc<dyn Clock>,
    timeout: TimeDelta,
}

impl PresenceMonitor {
    pub fn new(trusted: Vec<MacAddress>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            tracker: Mutex::new(PresenceTracker::new(trusted)),
            clock,
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, PresenceTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record a sighting. Returns `false` for untrusted addresses.
    pub fn observe(&self, mac: &MacAddress, at: DateTime<Utc>) -> bool {
        self.tracker().observe(mac, at)
    }

    pub fn is_any_present(&self) -> bool {
        let now = self.clock.now();
        self.tracker().is_any_present(now, self.timeout)
    }

    pub fn trusted(&self) -> Vec<MacAddress> {
        self.tracker().trusted().copied().collect()
    }

    /// `(mac, last_seen)` for every trusted device, in address order.
    pub fn snapshot(&self) -> Vec<(MacAddress, Option<DateTime<Utc>>)> {
        let tracker = self.tracker();
        tracker
            .trusted()
            .map(|mac| (*mac, tracker.last_seen(mac)))
            .collect()
    }
}

// ─── Passive Listener ────────────────────────────────────────────

/// Feeds sightings from the packet capture into presence and the alarm.
#[derive(Clone)]
pub struct PresenceListener {
    presence: Arc<PresenceMonitor>,
    alarm: Arc<AlarmStateMachine>,
}

impl PresenceListener {
    pub fn new(presence: Arc<PresenceMonitor>, alarm: Arc<AlarmStateMachine>) -> Self {
        Self { presence, alarm }
    }

    pub fn on_observed(&self, mac: MacAddress, at: DateTime<Utc>) {
        if !self.presence.observe(&mac, at) {
            tracing::trace!("ignoring untrusted address {mac}");
            return;
        }
        tracing::debug!("packet detected from {mac}");
        self.alarm.reevaluate();
    }
}

// ─── Active Confirmation ─────────────────────────────────────────

/// Retry schedule for [`active_confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub attempts: u32,
    pub probe_timeout: Duration,
    pub spacing: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            probe_timeout: Duration::from_secs(1),
            spacing: Duration::from_secs(2),
        }
    }
}

/// A trusted device that answered a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHit {
    pub mac: MacAddress,
    pub address: Option<Ipv4Addr>,
}

/// Probe every trusted MAC, up to `policy.attempts` rounds.
///
/// Returns the first responder, or `None` when nobody answered (the area
/// really is empty). Blocks for up to
/// `attempts * (len(trusted) * probe_timeout) + (attempts - 1) * spacing`.
pub async fn active_confirm<P: ActiveProbe + 'static>(
    probe: &Arc<P>,
    trusted: &[MacAddress],
    network: &str,
    policy: ConfirmPolicy,
) -> Option<ProbeHit> {
    for attempt in 1..=policy.attempts {
        for &mac in trusted {
            let prober = Arc::clone(probe);
            let network_owned = network.to_string();
            let timeout = policy.probe_timeout;
            let result = tokio::task::spawn_blocking(move || {
                prober.probe(&mac, &network_owned, timeout)
            })
            .await;

            match result {
                Ok(Ok(reply)) if reply.responded => {
                    tracing::debug!(
                        "MAC {mac} responded to ARP ping with address {}",
                        reply
                            .address
                            .map_or_else(|| "unknown".to_string(), |a| a.to_string())
                    );
                    return Some(ProbeHit {
                        mac,
                        address: reply.address,
                    });
                }
                Ok(Ok(_)) => tracing::debug!("MAC {mac} did not respond to ARP ping"),
                Ok(Err(e)) => tracing::debug!("ARP ping for {mac} failed: {e}"),
                Err(e) => tracing::debug!("ARP ping task for {mac} failed: {e}"),
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.spacing).await;
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pisentry_core::{AlarmState, ManualClock};
    use pisentry_net::{NetError, ProbeReply};

    use crate::alarm::AlarmCommand;

    pub(crate) fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid")
            .with_timezone(&Utc)
    }

    pub(crate) fn mac(s: &str) -> MacAddress {
        s.parse().expect("valid mac")
    }

    /// Probe that answers for chosen MACs starting at a chosen call number.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        answers: HashMap<MacAddress, Ipv4Addr>,
        answer_from_call: usize,
        fail: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub(crate) fn silent() -> Self {
            Self::default()
        }

        pub(crate) fn answering(mac: MacAddress, ip: Ipv4Addr) -> Self {
            let mut probe = Self::default();
            probe.answers.insert(mac, ip);
            probe
        }

        fn from_call(mut self, n: usize) -> Self {
            self.answer_from_call = n;
            self
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ActiveProbe for ScriptedProbe {
        fn probe(
            &self,
            mac: &MacAddress,
            _network: &str,
            _timeout: Duration,
        ) -> Result<ProbeReply, NetError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NetError::CommandFailed("arp-scan missing".to_string()));
            }
            match self.answers.get(mac) {
                Some(ip) if call >= self.answer_from_call => Ok(ProbeReply::answered(*ip)),
                _ => Ok(ProbeReply::silent()),
            }
        }
    }

    fn policy() -> ConfirmPolicy {
        ConfirmPolicy {
            attempts: 4,
            probe_timeout: Duration::from_millis(10),
            spacing: Duration::from_secs(2),
        }
    }

    pub(crate) fn monitor(trusted: &[&str], clock: Arc<ManualClock>) -> Arc<PresenceMonitor> {
        Arc::new(PresenceMonitor::new(
            trusted.iter().map(|s| mac(s)).collect(),
            clock,
            Duration::from_secs(700),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_returns_first_responder() {
        let phone = mac("aa:aa:aa:aa:aa:02");
        let probe = Arc::new(ScriptedProbe::answering(phone, Ipv4Addr::new(192, 168, 1, 7)));
        let trusted = [mac("aa:aa:aa:aa:aa:01"), phone];

        let hit = active_confirm(&probe, &trusted, "192.168.1.0/24", policy()).await;

        assert_eq!(
            hit,
            Some(ProbeHit {
                mac: phone,
                address: Some(Ipv4Addr::new(192, 168, 1, 7))
            })
        );
        assert_eq!(probe.call_count(), 2, "stops at the first responder");
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_retries_every_round_when_silent() {
        let probe = Arc::new(ScriptedProbe::silent());
        let trusted = [mac("aa:aa:aa:aa:aa:01"), mac("aa:aa:aa:aa:aa:02")];
        let started = tokio::time::Instant::now();

        let hit = active_confirm(&probe, &trusted, "192.168.1.0/24", policy()).await;

        assert_eq!(hit, None);
        assert_eq!(probe.call_count(), 8, "4 rounds x 2 devices");
        assert!(
            started.elapsed() >= Duration::from_secs(6),
            "3 spacing sleeps between 4 rounds"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_finds_late_responder() {
        let phone = mac("aa:aa:aa:aa:aa:01");
        let probe = Arc::new(
            ScriptedProbe::answering(phone, Ipv4Addr::new(10, 0, 0, 9)).from_call(2),
        );

        let hit = active_confirm(&probe, &[phone], "10.0.0.0/24", policy()).await;

        assert_eq!(hit.map(|h| h.mac), Some(phone));
        assert_eq!(probe.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_count_as_silence() {
        let probe = Arc::new(ScriptedProbe::failing());
        let hit = active_confirm(&probe, &[mac("aa:aa:aa:aa:aa:01")], "10.0.0.0/24", policy()).await;
        assert_eq!(hit, None);
        assert_eq!(probe.call_count(), 4);
    }

    #[test]
    fn monitor_presence_follows_clock() {
        let clock = Arc::new(ManualClock::new(ts("2026-10-14T12:00:00Z")));
        let presence = monitor(&["aa:aa:aa:aa:aa:01"], Arc::clone(&clock));

        assert!(!presence.is_any_present());
        assert!(presence.observe(&mac("aa:aa:aa:aa:aa:01"), clock.now()));
        assert!(presence.is_any_present());

        clock.advance(TimeDelta::seconds(701));
        assert!(!presence.is_any_present());
    }

    #[test]
    fn listener_disarms_on_trusted_sighting() {
        let clock = Arc::new(ManualClock::new(ts("2026-10-14T12:00:00Z")));
        let presence = monitor(&["aa:aa:aa:aa:aa:01"], Arc::clone(&clock));
        let alarm = Arc::new(AlarmStateMachine::new(Arc::clone(&presence)));
        alarm.apply_command(AlarmCommand::Enable);
        assert_eq!(alarm.current(), AlarmState::Armed);

        let listener = PresenceListener::new(Arc::clone(&presence), Arc::clone(&alarm));
        listener.on_observed(mac("bb:bb:bb:bb:bb:bb"), clock.now());
        assert_eq!(alarm.current(), AlarmState::Armed, "untrusted is ignored");

        listener.on_observed(mac("aa:aa:aa:aa:aa:01"), clock.now());
        assert_eq!(alarm.current(), AlarmState::Disarmed);
    }

    #[test]
    fn snapshot_lists_every_trusted_device() {
        let clock = Arc::new(ManualClock::new(ts("2026-10-14T12:00:00Z")));
        let presence = monitor(&["aa:aa:aa:aa:aa:02", "aa:aa:aa:aa:aa:01"], Arc::clone(&clock));
        presence.observe(&mac("aa:aa:aa:aa:aa:02"), clock.now());

        assert_eq!(
            presence.snapshot(),
            vec![
                (mac("aa:aa:aa:aa:aa:01"), None),
                (mac("aa:aa:aa:aa:aa:02"), Some(clock.now())),
            ]
        );
    }
}
