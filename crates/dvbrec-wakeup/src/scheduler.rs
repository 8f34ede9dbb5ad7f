use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{db, error::Result, timer::WakeTimer};

pub type WakeId = u64;

/// One requested wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeEntry {
    pub id: WakeId,
    pub at: DateTime<Utc>,
}

/// Set of future wake-up times with the timer armed for the earliest.
///
/// Invariant: after every public call the timer is armed iff the set is
/// non-empty, and for the minimum `at`.
pub struct WakeScheduler {
    entries: BTreeMap<WakeId, DateTime<Utc>>,
    next_id: WakeId,
    timer: Box<dyn WakeTimer>,
    armed: Option<WakeEntry>,
}

impl WakeScheduler {
    pub fn new(timer: Box<dyn WakeTimer>) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            timer,
            armed: None,
        }
    }

    /// Add a wake-up and re-arm for the nearest one. A time already in the
    /// past is accepted but purged immediately.
    pub fn add(&mut self, at: DateTime<Utc>) -> WakeId {
        let id = self.insert(at);
        info!(wake_id = id, at = %at, "wake-up added");
        self.reprogram();
        id
    }

    /// Remove a wake-up. Returns `false` if `id` is unknown.
    ///
    /// Expired entries are purged either way; the timer is only touched when
    /// the set actually changed.
    pub fn cancel(&mut self, id: WakeId) -> bool {
        if self.entries.remove(&id).is_none() {
            debug!(wake_id = id, "cancel of unknown wake-up ignored");
            if self.purge_expired() > 0 {
                self.rearm();
            }
            return false;
        }
        info!(wake_id = id, "wake-up removed");
        self.reprogram();
        true
    }

    /// Pending wake-ups, earliest first.
    pub fn list(&self) -> Vec<WakeEntry> {
        let mut entries: Vec<WakeEntry> = self
            .entries
            .iter()
            .map(|(&id, &at)| WakeEntry { id, at })
            .collect();
        entries.sort_by_key(|e| (e.at, e.id));
        entries
    }

    /// The entry the timer is currently armed for.
    pub fn armed(&self) -> Option<WakeEntry> {
        self.armed
    }

    /// Persist the wake-ups that are still in the future.
    pub fn save(&self, path: &Path) -> Result<usize> {
        let now = Utc::now();
        let pending: Vec<(WakeId, DateTime<Utc>)> = self
            .list()
            .into_iter()
            .filter(|e| e.at > now)
            .map(|e| (e.id, e.at))
            .collect();
        db::save_to(path, &pending)?;
        info!(count = pending.len(), path = %path.display(), "wake-ups saved");
        Ok(pending.len())
    }

    /// Restore saved wake-ups and arm the timer once for the nearest.
    ///
    /// Restored entries keep their saved ids unless one is already taken.
    /// The timer is recomputed even when nothing was restored, which clears
    /// a stale alarm left by a previous run. Returns the number of entries
    /// still pending afterwards.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let saved = db::load_from(path)?;
        for (id, at) in saved {
            if self.entries.contains_key(&id) {
                self.insert(at);
            } else {
                self.entries.insert(id, at);
                self.next_id = self.next_id.max(id + 1);
            }
        }
        self.reprogram();
        let count = self.entries.len();
        info!(count, path = %path.display(), "wake-ups restored");
        Ok(count)
    }

    fn insert(&mut self, at: DateTime<Utc>) -> WakeId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, at);
        id
    }

    /// Purge expired entries, then point the timer at the nearest one.
    fn reprogram(&mut self) {
        self.purge_expired();
        self.rearm();
    }

    /// Drop entries whose time has passed. Returns how many went.
    fn purge_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, at| *at > now);
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "expired wake-ups purged");
        }
        purged
    }

    fn rearm(&mut self) {
        let was_armed = self.armed.take().is_some();

        let Some(next) = self.list().into_iter().next() else {
            // Also clears an alarm a previous process may have left behind.
            if let Err(e) = self.timer.disarm() {
                warn!("wake timer disarm failed: {e}");
            }
            info!("wake timer disarmed");
            return;
        };

        if was_armed {
            if let Err(e) = self.timer.disarm() {
                warn!("wake timer disarm failed: {e}");
            }
        }
        match self.timer.arm(next.at) {
            Ok(()) => {
                info!(wake_id = next.id, at = %next.at, "wake timer armed");
                self.armed = Some(next);
            }
            Err(e) => warn!(wake_id = next.id, "wake timer arm failed: {e}"),
        }
    }
}
