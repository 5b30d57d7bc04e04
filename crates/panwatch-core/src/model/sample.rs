// ── Time-series sample types ──
//
// What polling tasks hand to the `SampleSink`. One `Sample` variant per
// decoder family; the `SampleCategory` is the storage bucket.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Storage bucket for a sample.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SampleCategory {
    /// Interface throughput (rates).
    Ifs,
    /// Data-plane processor load.
    Dp,
    /// Management-plane CPU and memory.
    Mp,
    /// Session table metrics.
    Sessions,
    /// Global counters.
    Counters,
    /// GlobalProtect gateway statistics.
    Gp,
}

/// One stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSample {
    pub serial: String,
    pub category: SampleCategory,
    pub timestamp: DateTime<Utc>,
    pub sample: Sample,
}

/// Decoded output of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    Resources(ResourceSample),
    Interfaces(InterfaceRates),
    System(SystemResources),
    /// Flat `name -> value` metrics (session info, global counters,
    /// GlobalProtect, filtered session counts).
    Metrics(BTreeMap<String, u64>),
}

// ── Data-plane resource monitor ──────────────────────────────────

/// `data processor -> period -> stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSample {
    pub processors: BTreeMap<String, BTreeMap<String, PeriodStats>>,
}

/// Resource monitor readings for one period (`second`, `minute`, ...).
/// Each entry is the comma-separated value list reported for that key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodStats {
    pub cpu_load_average: BTreeMap<String, Vec<i64>>,
    pub cpu_load_maximum: BTreeMap<String, Vec<i64>>,
    pub resource_utilization: BTreeMap<String, Vec<i64>>,
    pub task: BTreeMap<String, Vec<i64>>,
}

// ── Management-plane resources ───────────────────────────────────

/// Parsed top(1) snapshot from `<show><system><resources>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemResources {
    pub cpu: Option<CpuBreakdown>,
    /// Memory in KiB, buffers and cache counted as free.
    pub memory_used: Option<u64>,
    pub memory_free: Option<u64>,
    pub swap_used: Option<u64>,
    pub swap_free: Option<u64>,
    pub load_avg_1m: Option<f64>,
    pub load_avg_5m: Option<f64>,
    pub load_avg_15m: Option<f64>,
}

/// CPU time split, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuBreakdown {
    pub user: f64,
    pub system: f64,
    pub nice: f64,
    pub idle: f64,
    pub iowait: f64,
    pub hardware_irq: f64,
    pub software_irq: f64,
    pub steal: f64,
}

impl SystemResources {
    /// Used memory as a percentage of used + free. Unlike the plain
    /// used/free ratio this stays within 0..=100.
    pub fn memory_used_pct(&self) -> Option<f64> {
        let used = self.memory_used?;
        let total = used.checked_add(self.memory_free?)?;
        if total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        Some(used as f64 * 100.0 / total as f64)
    }
}

// ── Interface counters ───────────────────────────────────────────

/// Raw cumulative counters for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub ibytes: u64,
    pub obytes: u64,
    pub ipackets: u64,
    pub opackets: u64,
    pub ierrors: u64,
    pub idrops: u64,
}

/// Counter attribute names, in storage order.
pub const COUNTER_ATTRIBUTES: [&str; 6] =
    ["ibytes", "obytes", "ipackets", "opackets", "ierrors", "idrops"];

impl InterfaceCounters {
    /// Value for one of [`COUNTER_ATTRIBUTES`].
    pub fn get(&self, attribute: &str) -> Option<u64> {
        Some(match attribute {
            "ibytes" => self.ibytes,
            "obytes" => self.obytes,
            "ipackets" => self.ipackets,
            "opackets" => self.opackets,
            "ierrors" => self.ierrors,
            "idrops" => self.idrops,
            _ => return None,
        })
    }

    /// Set one of [`COUNTER_ATTRIBUTES`]; unknown names are ignored.
    pub fn set(&mut self, attribute: &str, value: u64) {
        match attribute {
            "ibytes" => self.ibytes = value,
            "obytes" => self.obytes = value,
            "ipackets" => self.ipackets = value,
            "opackets" => self.opackets = value,
            "ierrors" => self.ierrors = value,
            "idrops" => self.idrops = value,
            _ => {}
        }
    }
}

/// One raw reading of every interface on an appliance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSample {
    /// Wall-clock time of the reading, milliseconds since the epoch.
    pub taken_at_ms: i64,
    pub hw: BTreeMap<String, InterfaceCounters>,
    pub logical: BTreeMap<String, InterfaceCounters>,
}

/// Normalized reading for one counter attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttributeRate {
    /// Per-second rate: `delta * 1000 / elapsed_ms`.
    pub rate: i128,
    /// The raw delta was exactly zero.
    pub zero: bool,
    /// The rate is higher than the previous tick's rate.
    pub up: bool,
}

/// Per-interface, per-attribute rates for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceRates {
    pub hw: BTreeMap<String, BTreeMap<&'static str, AttributeRate>>,
    pub logical: BTreeMap<String, BTreeMap<&'static str, AttributeRate>>,
}

// ── Threshold escalation ─────────────────────────────────────────

/// A derived metric crossed a configured safety threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdBreach {
    HighCpu { idle_pct: f64, threshold_pct: u8 },
    HighMemory { used_pct: f64, threshold_pct: u8 },
}

impl fmt::Display for ThresholdBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighCpu { .. } => f.write_str("High CPU - Monitoring disabled"),
            Self::HighMemory { .. } => f.write_str("High Memory - Monitoring disabled"),
        }
    }
}
