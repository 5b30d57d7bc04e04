// ── Poll supervisor ──
//
// Keeps one bundle of polling tasks per monitored appliance in step with
// the registry and the per-appliance optional poller preferences.
// `reconcile` diffs against the previous input and is a no-op when nothing
// relevant changed, so it can run on every roster notification.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::model::{
    Appliance, DevicePreference, OptionalPoller, OptionalPollerKind, SessionAllMetric,
    optional_pollers_for,
};
use crate::monitors::{GpGatewayMonitor, MonitorKind, SessionAllMonitor, mandatory_monitor};
use crate::poller::{PollingTask, TaskContext};

/// One appliance that should be polled, with its enabled optional pollers.
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub appliance: Arc<Appliance>,
    pub optional: Vec<OptionalPoller>,
}

/// What a reconcile pass changed, by serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub disabled: Vec<String>,
    pub enabled: Vec<String>,
    pub optional_changed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.removed.is_empty()
            && self.disabled.is_empty()
            && self.enabled.is_empty()
            && self.optional_changed.is_empty()
    }
}

/// Build reconcile targets from a registry snapshot and the preferences.
pub fn targets_from(
    appliances: &[Arc<Appliance>],
    preferences: &[DevicePreference],
    catalog: &[OptionalPoller],
) -> Vec<PollTarget> {
    appliances
        .iter()
        .map(|appliance| PollTarget {
            optional: optional_pollers_for(&appliance.serial, preferences, catalog),
            appliance: Arc::clone(appliance),
        })
        .collect()
}

/// The inputs a reconcile pass depends on, per appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    serial: String,
    url: String,
    disabled: bool,
    optional: Vec<Uuid>,
}

impl Fingerprint {
    fn of(target: &PollTarget) -> Self {
        let mut optional: Vec<Uuid> = target.optional.iter().map(|op| op.id).collect();
        optional.sort_unstable();
        Self {
            serial: target.appliance.serial.clone(),
            url: target.appliance.url.to_string(),
            disabled: target.appliance.disabled,
            optional,
        }
    }
}

// ── Task bundle ──────────────────────────────────────────────────

struct SessionAllTask {
    metrics: Vec<SessionAllMetric>,
    task: PollingTask,
}

/// Every task of one appliance.
struct Bundle {
    url: Url,
    disabled: bool,
    mandatory: Vec<PollingTask>,
    gp_gateway: Option<PollingTask>,
    session_all: Option<SessionAllTask>,
}

impl Bundle {
    fn tasks(&self) -> impl Iterator<Item = &PollingTask> {
        self.mandatory
            .iter()
            .chain(self.gp_gateway.as_ref())
            .chain(self.session_all.as_ref().map(|s| &s.task))
    }

    fn cancel(&self) {
        for task in self.tasks() {
            task.cancel();
        }
    }
}

/// Desired optional tasks for a target.
struct OptionalPlan {
    gp_gateway: bool,
    session_all: Vec<SessionAllMetric>,
}

impl OptionalPlan {
    fn of(optional: &[OptionalPoller]) -> Self {
        let mut plan = Self {
            gp_gateway: false,
            session_all: Vec::new(),
        };
        for poller in optional {
            match &poller.kind {
                OptionalPollerKind::GpGateway => plan.gp_gateway = true,
                OptionalPollerKind::SessionAll(metric) => plan.session_all.push(metric.clone()),
            }
        }
        plan
    }
}

// ── PollSupervisor ───────────────────────────────────────────────

/// Owns the polling tasks of every monitored appliance.
#[derive(Clone)]
pub struct PollSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    ctx: TaskContext,
    state: Mutex<SupervisorState>,
}

#[derive(Default)]
struct SupervisorState {
    bundles: BTreeMap<String, Bundle>,
    last_input: Option<Vec<Fingerprint>>,
}

impl PollSupervisor {
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                ctx,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    /// Bring running tasks in line with `targets`.
    pub async fn reconcile(&self, targets: Vec<PollTarget>) -> ReconcileReport {
        let mut fingerprint: Vec<Fingerprint> = targets.iter().map(Fingerprint::of).collect();
        fingerprint.sort_by(|a, b| a.serial.cmp(&b.serial));

        let mut state = self.inner.state.lock().await;
        if state.last_input.as_ref() == Some(&fingerprint) {
            return ReconcileReport::default();
        }

        let mut report = ReconcileReport::default();
        let wanted: BTreeMap<&str, &PollTarget> = targets
            .iter()
            .map(|t| (t.appliance.serial.as_str(), t))
            .collect();

        // Removed appliances: stop tasks, then drop what they queued.
        let gone: Vec<String> = state
            .bundles
            .keys()
            .filter(|serial| !wanted.contains_key(serial.as_str()))
            .cloned()
            .collect();
        for serial in gone {
            if let Some(bundle) = state.bundles.remove(&serial) {
                bundle.cancel();
                let dropped = self
                    .inner
                    .ctx
                    .scheduler
                    .cancel_queued_for_appliance(&bundle.url, &serial)
                    .await;
                debug!(serial = %serial, dropped, "appliance tasks stopped");
                report.removed.push(serial);
            }
        }

        for (serial, target) in wanted {
            let appliance = &target.appliance;
            let optional = OptionalPlan::of(&target.optional);

            let Some(bundle) = state.bundles.get_mut(serial) else {
                let bundle = self.start_bundle(appliance, optional);
                state.bundles.insert(serial.to_owned(), bundle);
                report.created.push(serial.to_owned());
                continue;
            };

            bundle.url = appliance.url.clone();
            if self.apply_optional(bundle, serial, optional) {
                report.optional_changed.push(serial.to_owned());
            }

            if appliance.disabled != bundle.disabled {
                bundle.disabled = appliance.disabled;
                for task in bundle.tasks() {
                    if appliance.disabled {
                        task.disable();
                    } else {
                        task.enable();
                    }
                }
                if appliance.disabled {
                    report.disabled.push(serial.to_owned());
                } else {
                    report.enabled.push(serial.to_owned());
                }
            }
        }

        state.last_input = Some(fingerprint);
        if !report.is_noop() {
            info!(
                created = report.created.len(),
                removed = report.removed.len(),
                disabled = report.disabled.len(),
                enabled = report.enabled.len(),
                optional_changed = report.optional_changed.len(),
                "polling tasks reconciled"
            );
        }
        report
    }

    /// Force an immediate tick on every task of `serial`, even if the
    /// appliance is disabled. Returns `false` for unknown serials.
    pub async fn poll_now(&self, serial: &str) -> bool {
        let state = self.inner.state.lock().await;
        let Some(bundle) = state.bundles.get(serial) else {
            return false;
        };
        for task in bundle.tasks() {
            task.poll(true);
        }
        true
    }

    /// Number of running tasks across all appliances.
    pub async fn task_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.bundles.values().map(|b| b.tasks().count()).sum()
    }

    /// Kinds of the tasks running for `serial`, in start order.
    pub async fn task_kinds(&self, serial: &str) -> Vec<MonitorKind> {
        let state = self.inner.state.lock().await;
        state
            .bundles
            .get(serial)
            .map(|b| b.tasks().map(PollingTask::kind).collect())
            .unwrap_or_default()
    }

    /// Reconcile on every registry or preference change until `cancel`
    /// fires, then stop all tasks.
    pub async fn run(
        self,
        mut preferences: watch::Receiver<Vec<DevicePreference>>,
        catalog: Vec<OptionalPoller>,
        cancel: CancellationToken,
    ) {
        let mut roster = self.inner.ctx.registry.subscribe();
        let mut preferences_open = true;

        loop {
            let targets = {
                let appliances = roster.borrow_and_update().clone();
                let prefs = preferences.borrow_and_update();
                targets_from(&appliances, &prefs, &catalog)
            };
            self.reconcile(targets).await;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = roster.changed() => {
                    if changed.is_err() {
                        warn!("appliance registry closed");
                        break;
                    }
                }
                changed = preferences.changed(), if preferences_open => {
                    if changed.is_err() {
                        preferences_open = false;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Cancel every task and forget all appliances.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        for bundle in state.bundles.values() {
            bundle.cancel();
        }
        state.bundles.clear();
        state.last_input = None;
        debug!("poll supervisor stopped");
    }

    // ── Private helpers ──────────────────────────────────────────

    fn start_bundle(&self, appliance: &Appliance, optional: OptionalPlan) -> Bundle {
        let serial = appliance.serial.as_str();
        let disabled = appliance.disabled;
        let mandatory = MonitorKind::mandatory()
            .filter_map(mandatory_monitor)
            .map(|monitor| PollingTask::start(monitor, serial, self.inner.ctx.clone(), disabled))
            .collect();

        let mut bundle = Bundle {
            url: appliance.url.clone(),
            disabled,
            mandatory,
            gp_gateway: None,
            session_all: None,
        };
        self.apply_optional(&mut bundle, serial, optional);
        bundle
    }

    /// Start or stop optional tasks to match `optional`. A change in the
    /// session-all metric list restarts that task. Returns whether
    /// anything changed.
    fn apply_optional(&self, bundle: &mut Bundle, serial: &str, optional: OptionalPlan) -> bool {
        let mut changed = false;

        match (optional.gp_gateway, bundle.gp_gateway.take()) {
            (true, None) => {
                bundle.gp_gateway = Some(PollingTask::start(
                    Box::new(GpGatewayMonitor),
                    serial,
                    self.inner.ctx.clone(),
                    bundle.disabled,
                ));
                changed = true;
            }
            (false, Some(task)) => {
                task.cancel();
                changed = true;
            }
            (_, existing) => bundle.gp_gateway = existing,
        }

        let current = bundle.session_all.as_ref().map(|s| s.metrics.as_slice());
        if current.unwrap_or_default() != optional.session_all.as_slice() {
            if let Some(old) = bundle.session_all.take() {
                old.task.cancel();
            }
            if !optional.session_all.is_empty() {
                let monitor = SessionAllMonitor::new(optional.session_all.clone());
                bundle.session_all = Some(SessionAllTask {
                    metrics: optional.session_all,
                    task: PollingTask::start(
                        Box::new(monitor),
                        serial,
                        self.inner.ctx.clone(),
                        bundle.disabled,
                    ),
                });
            }
            changed = true;
        }

        changed
    }
}
