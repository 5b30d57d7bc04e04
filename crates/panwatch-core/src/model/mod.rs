// ── Domain model ──

pub mod appliance;
pub mod optional;
pub mod sample;

pub use appliance::{Appliance, HardwareInterface, LogicalInterface};
pub use optional::{
    DevicePreference, GP_GATEWAY_POLLER_ID, OptionalPoller, OptionalPollerKind, SessionAllMetric,
    SessionFilter, optional_pollers_for,
};
pub use sample::{
    AttributeRate, COUNTER_ATTRIBUTES, CpuBreakdown, InterfaceCounters, InterfaceRates,
    InterfaceSample, PeriodStats, ResourceSample, Sample, SampleCategory, StoredSample,
    SystemResources, ThresholdBreach,
};
