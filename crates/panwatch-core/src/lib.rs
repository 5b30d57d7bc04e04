//! Polling engine for firewall appliances managed over the XML API.
//!
//! - **[`RequestScheduler`]**: per-endpoint request queues with a
//!   hot-reconfigurable concurrency limit. One background task owns all
//!   queue state; callers submit through an `mpsc` channel and await a
//!   `oneshot` reply.
//!
//! - **[`PollingTask`]**: one recurring task per (appliance, monitor).
//!   Runs its [`Monitor`]'s request plan through the scheduler, decodes the
//!   responses into a [`Sample`] and appends it to a [`SampleSink`].
//!
//! - **[`PollSupervisor`]**: keeps a bundle of polling tasks per appliance
//!   in step with the [`ApplianceRegistry`] and the optional poller
//!   preferences.
//!
//! - **[`CounterDeltaEngine`]**: turns cumulative interface counters into
//!   per-second rates with zero and trend flags.
//!
//! - **Onboarding** ([`add_appliance`]): key exchange and discovery of a
//!   new appliance.

pub mod config;
pub mod counters;
pub mod error;
pub mod model;
pub mod monitors;
pub mod onboarding;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod supervisor;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConfigHandle, IntervalKey, PollingConfig};
pub use counters::CounterDeltaEngine;
pub use error::CoreError;
pub use monitors::{Monitor, MonitorKind};
pub use onboarding::{ApplianceCredentials, add_appliance};
pub use poller::{PollingTask, TaskContext, TaskState, TaskStatus, TickOutcome};
pub use registry::{ApplianceRegistry, ApplianceSnapshot};
pub use scheduler::{EndpointStats, PendingRequest, RequestKind, RequestScheduler};
pub use sink::{MemorySampleStore, SampleSink};
pub use supervisor::{PollSupervisor, PollTarget, ReconcileReport, targets_from};
pub use transport::{Transport, XmlApiTransport};

pub use model::{
    Appliance, DevicePreference, OptionalPoller, OptionalPollerKind, Sample, SampleCategory,
    StoredSample, ThresholdBreach,
};
