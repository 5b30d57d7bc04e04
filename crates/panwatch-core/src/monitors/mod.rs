// ── Monitors ──
//
// A monitor is what varies between polling tasks: which calls to make,
// how to decode the responses and whether the decoded sample should stop
// polling. The task loop in `poller` is shared.

mod global_counters;
mod gp_gateway;
mod interfaces;
mod resources;
mod session_all;
mod session_info;
mod system;

use chrono::{DateTime, Utc};
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::config::{IntervalKey, PollingConfig};
use crate::error::CoreError;
use crate::model::{Appliance, Sample, SampleCategory, ThresholdBreach};
use crate::poller::{PlanResult, RequestPlan};

pub use global_counters::GlobalCounterMonitor;
pub use gp_gateway::GpGatewayMonitor;
pub use interfaces::{InterfaceMonitor, parse_interface_counters};
pub use resources::ResourceMonitor;
pub use session_all::SessionAllMonitor;
pub use session_info::SessionInfoMonitor;
pub use system::SystemResourceMonitor;

/// Identifies a polling task family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum MonitorKind {
    Resources,
    Interfaces,
    SessionInfo,
    SystemResources,
    GlobalCounters,
    GpGateway,
    SessionAll,
}

impl MonitorKind {
    /// Storage bucket for this family's samples.
    pub fn category(self) -> SampleCategory {
        match self {
            Self::Resources => SampleCategory::Dp,
            Self::Interfaces => SampleCategory::Ifs,
            Self::SessionInfo | Self::SessionAll => SampleCategory::Sessions,
            Self::SystemResources => SampleCategory::Mp,
            Self::GlobalCounters => SampleCategory::Counters,
            Self::GpGateway => SampleCategory::Gp,
        }
    }

    /// Key under which failures land in the appliance error map.
    pub fn error_key(self) -> &'static str {
        self.into()
    }

    pub fn interval_key(self) -> IntervalKey {
        match self {
            Self::Interfaces => IntervalKey::Interfaces,
            _ => IntervalKey::Generic,
        }
    }

    /// Part of every appliance's bundle, as opposed to opt-in.
    pub fn is_mandatory(self) -> bool {
        !matches!(self, Self::GpGateway | Self::SessionAll)
    }

    /// The mandatory families, in start order.
    pub fn mandatory() -> impl Iterator<Item = MonitorKind> {
        Self::iter().filter(|k| k.is_mandatory())
    }
}

/// Inputs available to a decoder besides the responses.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub appliance: &'a Appliance,
    /// Wall-clock time the responses were received.
    pub taken_at: DateTime<Utc>,
}

/// Request building and decoding for one polling task family.
pub trait Monitor: Send + 'static {
    fn kind(&self) -> MonitorKind;

    /// Calls to issue this tick.
    fn plan(&self, appliance: &Appliance) -> RequestPlan;

    /// Turn responses into a sample. `Ok(None)` means nothing to store
    /// this tick (e.g. the first interface reading).
    fn decode(
        &mut self,
        result: PlanResult,
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError>;

    /// Inspect a decoded sample against safety thresholds. Runs before
    /// the write; a breach takes effect only once the sample is stored.
    fn check_thresholds(
        &self,
        _sample: &Sample,
        _config: &PollingConfig,
    ) -> Option<ThresholdBreach> {
        None
    }
}

/// Build the monitor for a mandatory family.
pub fn mandatory_monitor(kind: MonitorKind) -> Option<Box<dyn Monitor>> {
    let monitor: Box<dyn Monitor> = match kind {
        MonitorKind::Resources => Box::new(ResourceMonitor),
        MonitorKind::Interfaces => Box::new(InterfaceMonitor::new()),
        MonitorKind::SessionInfo => Box::new(SessionInfoMonitor),
        MonitorKind::SystemResources => Box::new(SystemResourceMonitor),
        MonitorKind::GlobalCounters => Box::new(GlobalCounterMonitor),
        MonitorKind::GpGateway | MonitorKind::SessionAll => return None,
    };
    Some(monitor)
}

// ── Decoding helpers ─────────────────────────────────────────────

/// `"num-active"` -> `"numActive"`, `"packet buffer"` -> `"packetBuffer"`.
pub(crate) fn camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, word) in input
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let lower = word.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Parse a non-negative counter, naming the field on failure.
pub(crate) fn parse_counter(text: &str, field: &str) -> Result<u64, CoreError> {
    text.trim()
        .parse()
        .map_err(|_| CoreError::decode(format!("{field}: not a counter: {text:?}")))
}
