//! Last-seen bookkeeping for trusted devices.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::MacAddress;

/// Records when each trusted MAC was last observed.
///
/// The trusted set is fixed at construction; observations of any other
/// address are ignored.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    last_seen: BTreeMap<MacAddress, Option<DateTime<Utc>>>,
}

impl PresenceTracker {
    pub fn new(trusted: impl IntoIterator<Item = MacAddress>) -> Self {
        Self {
            last_seen: trusted.into_iter().map(|mac| (mac, None)).collect(),
        }
    }

    /// Record an observation. Returns `false` for untrusted addresses.
    ///
    /// `last_seen` only moves forward: an older timestamp than the one
    /// already stored is kept as a no-op.
    pub fn observe(&mut self, mac: &MacAddress, at: DateTime<Utc>) -> bool {
        match self.last_seen.get_mut(mac) {
            Some(slot) => {
                *slot = Some(slot.map_or(at, |prev| prev.max(at)));
                true
            }
            None => false,
        }
    }

    /// True iff some trusted device was seen within `timeout` of `now`.
    pub fn is_any_present(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        self.last_seen
            .values()
            .flatten()
            .any(|&seen| now.signed_duration_since(seen) <= timeout)
    }

    pub fn last_seen(&self, mac: &MacAddress) -> Option<DateTime<Utc>> {
        self.last_seen.get(mac).copied().flatten()
    }

    pub fn trusted(&self) -> impl Iterator<Item = &MacAddress> {
        self.last_seen.keys()
    }
}
