// ── Appliance registry ──
//
// Reactive roster of monitored appliances, keyed by serial. `DashMap`
// for concurrent lookups, a `watch` channel carrying the full snapshot
// for push-based change notification.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::model::Appliance;

/// Snapshot type vended to subscribers, sorted by serial.
pub type ApplianceSnapshot = Arc<Vec<Arc<Appliance>>>;

/// Shared store of `Appliance` records.
///
/// Every mutation rebuilds the snapshot that subscribers receive.
/// Mutations on unknown serials are ignored and return `false`.
pub struct ApplianceRegistry {
    by_serial: DashMap<String, Arc<Appliance>>,
    snapshot: watch::Sender<ApplianceSnapshot>,
}

impl ApplianceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_serial: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace an appliance. Returns `true` if the serial was new.
    pub fn upsert(&self, appliance: Appliance) -> bool {
        let is_new = self
            .by_serial
            .insert(appliance.serial.clone(), Arc::new(appliance))
            .is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Remove an appliance. Returns the removed record if it existed.
    pub fn remove(&self, serial: &str) -> Option<Arc<Appliance>> {
        let removed = self.by_serial.remove(serial).map(|(_, v)| v);
        if removed.is_some() {
            info!(serial, "appliance removed");
            self.rebuild_snapshot();
        }
        removed
    }

    /// Remove several appliances with a single notification.
    pub fn bulk_remove(&self, serials: &[String]) -> usize {
        let removed = serials
            .iter()
            .filter(|s| self.by_serial.remove(s.as_str()).is_some())
            .count();
        if removed > 0 {
            info!(count = removed, "appliances removed");
            self.rebuild_snapshot();
        }
        removed
    }

    pub fn get(&self, serial: &str) -> Option<Arc<Appliance>> {
        self.by_serial.get(serial).map(|r| Arc::clone(r.value()))
    }

    /// Find the appliance monitored at `url`.
    pub fn find_by_url(&self, url: &Url) -> Option<Arc<Appliance>> {
        let wanted = crate::transport::endpoint_key(url);
        self.by_serial
            .iter()
            .find(|r| crate::transport::endpoint_key(&r.value().url) == wanted)
            .map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> ApplianceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ApplianceSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.by_serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_serial.is_empty()
    }

    // ── Field mutations ──────────────────────────────────────────────

    /// Record (`Some`) or clear (`None`) the error for one polling task.
    pub fn set_error(&self, serial: &str, source: &str, error: Option<String>) -> bool {
        self.modify(serial, |a| match error {
            Some(message) => {
                let changed = a.errors.get(source) != Some(&message);
                a.errors.insert(source.to_owned(), message);
                changed
            }
            None => a.errors.remove(source).is_some(),
        })
    }

    pub fn inc_polling(&self, serial: &str) -> bool {
        self.modify(serial, |a| {
            a.polling = a.polling.saturating_add(1);
            true
        })
    }

    pub fn dec_polling(&self, serial: &str) -> bool {
        self.modify(serial, |a| {
            a.polling = a.polling.saturating_sub(1);
            true
        })
    }

    pub fn disable(&self, serial: &str) -> bool {
        let changed = self.modify(serial, |a| !std::mem::replace(&mut a.disabled, true));
        if changed {
            info!(serial, "appliance monitoring disabled");
        }
        changed
    }

    pub fn enable(&self, serial: &str) -> bool {
        let changed = self.modify(serial, |a| std::mem::replace(&mut a.disabled, false));
        if changed {
            info!(serial, "appliance monitoring enabled");
        }
        changed
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Copy-on-write edit. `f` returns whether anything changed; only
    /// real changes are published.
    fn modify(&self, serial: &str, f: impl FnOnce(&mut Appliance) -> bool) -> bool {
        let changed = {
            let Some(mut entry) = self.by_serial.get_mut(serial) else {
                debug!(serial, "ignoring update for unknown appliance");
                return false;
            };
            let appliance = Arc::make_mut(entry.value_mut());
            f(appliance)
        };
        if changed {
            self.rebuild_snapshot();
        }
        changed
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<Appliance>> =
            self.by_serial.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.serial.cmp(&b.serial));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for ApplianceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
