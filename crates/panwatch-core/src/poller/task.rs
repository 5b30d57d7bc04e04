use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{TaskEvent, TaskState, TaskStatus, TickOutcome};
use crate::config::PollingConfig;
use crate::error::CoreError;
use crate::model::StoredSample;
use crate::monitors::{DecodeContext, Monitor, MonitorKind};
use crate::registry::ApplianceRegistry;
use crate::scheduler::RequestScheduler;
use crate::sink::SampleSink;

/// Collaborators shared by every polling task.
#[derive(Clone)]
pub struct TaskContext {
    pub scheduler: RequestScheduler,
    pub registry: Arc<ApplianceRegistry>,
    pub sink: Arc<dyn SampleSink>,
    pub config: watch::Receiver<PollingConfig>,
}

enum Control {
    Poll { force: bool },
}

// ── PollingTask ──────────────────────────────────────────────────

/// Handle to a running polling task.
///
/// Dropping the handle cancels the task. A tick already running when the
/// task is canceled completes (its request is not aborted), but no further
/// tick is scheduled.
pub struct PollingTask {
    serial: String,
    kind: MonitorKind,
    control: mpsc::UnboundedSender<Control>,
    status: Arc<watch::Sender<TaskStatus>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollingTask {
    /// Spawn the task. The first tick runs as soon as the runtime
    /// schedules it, not inline with construction.
    pub fn start(
        monitor: Box<dyn Monitor>,
        serial: impl Into<String>,
        ctx: TaskContext,
        disabled: bool,
    ) -> Self {
        let serial = serial.into();
        let kind = monitor.kind();
        let (control, control_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(TaskStatus {
            disabled,
            ..TaskStatus::default()
        });
        let status = Arc::new(status);
        let cancel = CancellationToken::new();

        let runner = TaskRunner {
            serial: serial.clone(),
            monitor,
            ctx,
            status: Arc::clone(&status),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(runner.run(control_rx));
        debug!(serial = %serial, task = %kind, disabled, "polling task started");

        Self {
            serial,
            kind,
            control,
            status,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Tick now, replacing the pending timer. A forced tick runs even
    /// while the task is disabled. The recurring schedule resumes from
    /// the end of this tick.
    pub fn poll(&self, force: bool) {
        // A closed channel means the task already stopped.
        let _ = self.control.send(Control::Poll { force });
    }

    pub fn enable(&self) -> bool {
        self.status
            .send_if_modified(|s| std::mem::replace(&mut s.disabled, false))
    }

    pub fn disable(&self) -> bool {
        self.status
            .send_if_modified(|s| !std::mem::replace(&mut s.disabled, true))
    }

    pub fn is_disabled(&self) -> bool {
        self.status.borrow().disabled
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        transition(&self.status, TaskEvent::Cancel);
    }

    /// A tick is executing right now.
    pub fn is_polling(&self) -> bool {
        self.status.borrow().state == TaskState::Polling
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Wait for the task loop to exit. Only returns after [`cancel`](Self::cancel).
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn transition(status: &watch::Sender<TaskStatus>, event: TaskEvent) {
    status.send_if_modified(|s| match s.state.on(event) {
        Some(next) => {
            let changed = next != s.state;
            s.state = next;
            changed
        }
        None => {
            warn!(state = %s.state, ?event, "invalid polling task transition");
            false
        }
    });
}

// ── Task loop ────────────────────────────────────────────────────

struct TaskRunner {
    serial: String,
    monitor: Box<dyn Monitor>,
    ctx: TaskContext,
    status: Arc<watch::Sender<TaskStatus>>,
    cancel: CancellationToken,
}

impl TaskRunner {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        let mut next_tick = Some(Instant::now());

        loop {
            let timer = async move {
                match next_tick {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                msg = control.recv() => match msg {
                    Some(Control::Poll { force }) => {
                        next_tick = self.tick(force).await;
                    }
                    None => break,
                },
                () = timer => {
                    next_tick = self.tick(false).await;
                }
            }
        }

        transition(&self.status, TaskEvent::Cancel);
        trace!(serial = %self.serial, task = %self.monitor.kind(), "polling task stopped");
    }

    /// Run one tick. Returns when the next scheduled tick is due, or
    /// `None` once the task is canceled.
    async fn tick(&mut self, force: bool) -> Option<Instant> {
        if self.cancel.is_cancelled() {
            return None;
        }
        if self.status.borrow().disabled && !force {
            trace!(serial = %self.serial, task = %self.monitor.kind(), "disabled, tick skipped");
            return Some(self.next_deadline());
        }

        let kind = self.monitor.kind();
        transition(&self.status, TaskEvent::TickStarted);
        self.ctx.registry.inc_polling(&self.serial);

        let outcome = match self.sample().await {
            Ok(outcome) => outcome,
            Err(e) => TickOutcome::Failed(e.to_string()),
        };
        match &outcome {
            TickOutcome::Sampled { persisted } => {
                trace!(serial = %self.serial, task = %kind, persisted, "tick complete");
            }
            TickOutcome::ThresholdBreached(breach) => {
                warn!(serial = %self.serial, task = %kind, %breach, "threshold breached");
            }
            TickOutcome::Failed(error) => {
                debug!(serial = %self.serial, task = %kind, error = %error, "tick failed");
            }
        }

        self.ctx
            .registry
            .set_error(&self.serial, kind.error_key(), outcome.error_message());
        self.ctx.registry.dec_polling(&self.serial);
        transition(&self.status, TaskEvent::TickFinished);
        self.status.send_modify(|s| {
            s.ticks += 1;
            s.last_outcome = Some(outcome);
        });

        if self.cancel.is_cancelled() {
            None
        } else {
            Some(self.next_deadline())
        }
    }

    /// Request, decode, store, then check thresholds.
    async fn sample(&mut self) -> Result<TickOutcome, CoreError> {
        let Some(appliance) = self.ctx.registry.get(&self.serial) else {
            return Err(CoreError::ApplianceNotFound {
                serial: self.serial.clone(),
            });
        };

        let plan = self.monitor.plan(&appliance);
        let result = plan.execute(&self.ctx.scheduler, &appliance).await?;

        let taken_at = Utc::now();
        let ctx = DecodeContext {
            appliance: &appliance,
            taken_at,
        };
        let Some(sample) = self.monitor.decode(result, &ctx)? else {
            return Ok(TickOutcome::Sampled { persisted: false });
        };

        let breach = {
            let config = self.ctx.config.borrow();
            self.monitor.check_thresholds(&sample, &config)
        };

        let kind = self.monitor.kind();
        self.ctx
            .sink
            .append(StoredSample {
                serial: self.serial.clone(),
                category: kind.category(),
                timestamp: taken_at,
                sample,
            })
            .await?;

        if let Some(breach) = breach {
            self.ctx.registry.disable(&self.serial);
            return Ok(TickOutcome::ThresholdBreached(breach));
        }
        Ok(TickOutcome::Sampled { persisted: true })
    }

    fn next_deadline(&self) -> Instant {
        let interval = self
            .ctx
            .config
            .borrow()
            .tracking_interval(self.monitor.kind().interval_key());
        Instant::now() + interval
    }
}
