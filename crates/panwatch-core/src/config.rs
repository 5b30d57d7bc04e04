// ── Runtime polling configuration ──
//
// Core components never read configuration files. They receive a
// `watch::Receiver<PollingConfig>` and read a fresh snapshot wherever a
// knob is consulted (scheduling pass, dispatch, reschedule, threshold
// check). `ConfigHandle::update` is the change notification.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Tunables for the scheduler and polling tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Per-call transport timeout (seconds). 0 = no per-call deadline.
    pub request_timeout_secs: u64,
    /// Maximum in-flight requests per endpoint.
    pub max_running_requests: usize,
    /// Reschedule delay for most polling tasks (seconds).
    pub tracking_interval_secs: u64,
    /// Reschedule delay for the interface counter task (seconds).
    pub ifs_tracking_interval_secs: u64,
    /// Disable polling when CPU idle drops below `100 - this`. 0 = off.
    pub high_cpu_threshold_pct: u8,
    /// Disable polling when memory use exceeds this percentage. 0 = off.
    pub high_memory_threshold_pct: u8,
    /// Samples older than this are garbage collected (hours).
    pub max_history_hours: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 5,
            max_running_requests: 2,
            tracking_interval_secs: 30,
            ifs_tracking_interval_secs: 5,
            high_cpu_threshold_pct: 70,
            high_memory_threshold_pct: 75,
            max_history_hours: 2,
        }
    }
}

/// Which tracking interval a polling task follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKey {
    Generic,
    Interfaces,
}

impl PollingConfig {
    /// Per-call deadline, `None` when `request_timeout_secs` is 0.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Concurrency limit per endpoint. A limit of zero would stall every
    /// queue forever, so it is clamped to one.
    pub fn max_running(&self) -> usize {
        self.max_running_requests.max(1)
    }

    pub fn tracking_interval(&self, key: IntervalKey) -> Duration {
        let secs = match key {
            IntervalKey::Generic => self.tracking_interval_secs,
            IntervalKey::Interfaces => self.ifs_tracking_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn max_history(&self) -> chrono::Duration {
        let hours = i64::try_from(self.max_history_hours).unwrap_or(i64::MAX);
        chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX)
    }
}

// ── ConfigHandle ─────────────────────────────────────────────────

/// Owner side of the configuration channel.
///
/// Cheaply cloneable. Components subscribe once at construction and
/// observe every later `update`.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<PollingConfig>>,
}

impl ConfigHandle {
    pub fn new(config: PollingConfig) -> Self {
        let (tx, _) = watch::channel(config);
        Self { tx: Arc::new(tx) }
    }

    /// Current snapshot.
    pub fn current(&self) -> PollingConfig {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollingConfig> {
        self.tx.subscribe()
    }

    /// Replace the configuration and notify subscribers.
    pub fn update(&self, config: PollingConfig) {
        self.tx.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        });
    }

    /// Edit one or more knobs in place.
    pub fn modify(&self, f: impl FnOnce(&mut PollingConfig)) {
        let mut next = self.current();
        f(&mut next);
        self.update(next);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(PollingConfig::default())
    }
}
