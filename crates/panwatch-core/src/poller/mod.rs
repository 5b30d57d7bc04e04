// ── Polling tasks ──
//
// One `PollingTask` per (appliance, monitor). Each runs as its own Tokio
// task; ticks execute inline in that task, so two ticks of the same task
// never overlap.

mod plan;
mod task;

use crate::model::ThresholdBreach;

pub use plan::{PlanResult, ROOT_CONTEXT, RequestPlan};
pub use task::{PollingTask, TaskContext};

/// Lifecycle of a polling task. `Canceled` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    #[default]
    Idle,
    Polling,
    Canceled,
}

/// Inputs of the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    TickStarted,
    TickFinished,
    Cancel,
}

impl TaskState {
    /// Next state, or `None` if `event` is not valid in this state.
    pub fn on(self, event: TaskEvent) -> Option<TaskState> {
        match (self, event) {
            (_, TaskEvent::Cancel) | (Self::Canceled, _) => Some(Self::Canceled),
            (Self::Idle, TaskEvent::TickStarted) => Some(Self::Polling),
            (Self::Polling, TaskEvent::TickFinished) => Some(Self::Idle),
            (Self::Idle, TaskEvent::TickFinished) | (Self::Polling, TaskEvent::TickStarted) => {
                None
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Canceled
    }
}

/// Result of one executed tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Responses decoded. `persisted` is false when the monitor had
    /// nothing to store yet (first interface reading).
    Sampled { persisted: bool },
    /// The sample was stored, then a safety threshold disabled the
    /// appliance.
    ThresholdBreached(ThresholdBreach),
    /// Transport, decode or sink failure. Retried on the next tick.
    Failed(String),
}

impl TickOutcome {
    /// Message recorded in the appliance error map, if any.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Sampled { .. } => None,
            Self::ThresholdBreached(breach) => Some(breach.to_string()),
            Self::Failed(message) => Some(message.clone()),
        }
    }
}

/// Observable state of a polling task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub disabled: bool,
    /// Executed ticks. Skipped ticks (disabled, canceled) are not counted.
    pub ticks: u64,
    pub last_outcome: Option<TickOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use TaskEvent::{Cancel, TickFinished, TickStarted};

        assert_eq!(TaskState::Idle.on(TickStarted), Some(TaskState::Polling));
        assert_eq!(TaskState::Polling.on(TickFinished), Some(TaskState::Idle));
        assert_eq!(TaskState::Polling.on(TickStarted), None);
        assert_eq!(TaskState::Idle.on(TickFinished), None);
        assert_eq!(TaskState::Polling.on(Cancel), Some(TaskState::Canceled));
        // An in-flight tick finishing after cancel stays canceled.
        assert_eq!(TaskState::Canceled.on(TickFinished), Some(TaskState::Canceled));
        assert_eq!(TaskState::Canceled.on(TickStarted), Some(TaskState::Canceled));
        assert!(TaskState::Canceled.is_terminal());
    }

    #[test]
    fn outcome_error_messages() {
        let breach = TickOutcome::ThresholdBreached(ThresholdBreach::HighCpu {
            idle_pct: 10.0,
            threshold_pct: 70,
        });
        assert_eq!(
            breach.error_message().as_deref(),
            Some("High CPU - Monitoring disabled")
        );
        assert_eq!(TickOutcome::Sampled { persisted: true }.error_message(), None);
        assert_eq!(
            TickOutcome::Failed("Request failed (x)".into()).error_message().as_deref(),
            Some("Request failed (x)")
        );
    }
}
