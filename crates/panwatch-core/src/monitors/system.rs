// Management-plane resources (`show system resources`).
//
// The result is a top(1) text dump. Firmware 9.0 changed the layout of
// the CPU, memory and swap lines, so the patterns are picked by major
// version. Memory is reported with buffers and cache counted as free.

use std::sync::{Arc, LazyLock};

use panwatch_api::commands::OP_SHOW_SYSTEM_RESOURCES;
use regex::{Captures, Regex};

use super::{DecodeContext, Monitor, MonitorKind};
use crate::config::PollingConfig;
use crate::error::CoreError;
use crate::model::{Appliance, CpuBreakdown, Sample, SystemResources, ThresholdBreach};
use crate::poller::{PlanResult, RequestPlan};

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static CPU: Pattern = LazyLock::new(|| {
    Regex::new(
        r"Cpu\(s\):\W+([0-9]+\.[0-9]+)%us,\W+([0-9]+\.[0-9]+)%sy,\W+([0-9]+\.[0-9]+)%ni,\W+([0-9]+\.[0-9]+)%id,\W+([0-9]+.[0-9]+)%wa,\W+([0-9]+\.[0-9]+)%hi,\W+([0-9]+\.[0-9]+)%si,\W+([0-9]+\.[0-9]+)%st",
    )
});
static CPU_9: Pattern = LazyLock::new(|| {
    Regex::new(
        r"%Cpu\(s\):\W+([0-9]+\.[0-9]+)\Wus,\W+([0-9]+\.[0-9]+)\Wsy,\W+([0-9]+\.[0-9]+)\Wni,\W+([0-9]+\.[0-9]+)\Wid,\W+([0-9]+.[0-9]+)\Wwa,\W+([0-9]+\.[0-9]+)\Whi,\W+([0-9]+\.[0-9]+)\Wsi,\W+([0-9]+\.[0-9]+)\Wst",
    )
});
static MEM: Pattern = LazyLock::new(|| {
    Regex::new(
        r"Mem:\W+[0-9]+k\W+total,\W+([0-9]+)k\W+used,\W+([0-9]+)k\W+free\W+([0-9]+)k\W+buffers[\s\S]*\W+([0-9]+)k\W+cached",
    )
});
static MEM_9: Pattern = LazyLock::new(|| {
    Regex::new(
        r"KiB\W+Mem\W+:\W+[0-9]+\W+total,\W+([0-9]+)\W+free,\W+([0-9]+)\W+used\W+([0-9]+)\W+buff/cache",
    )
});
static SWAP: Pattern = LazyLock::new(|| {
    Regex::new(r"Swap:\W+[0-9]+k\W+total,\W+([0-9]+)k\W+used,\W+([0-9]+)k\W+free")
});
static SWAP_9: Pattern = LazyLock::new(|| {
    Regex::new(r"KiB\W+Swap:\W+[0-9]+\W+total,\W+([0-9]+)\W+free,\W+([0-9]+)\W+used")
});
static LOAD_AVG: Pattern =
    LazyLock::new(|| Regex::new(r"load average: (\d+\.\d+),\W*(\d+\.\d+),\W*(\d+\.\d+)"));

/// First firmware major version with the newer top(1) layout.
const NEW_LAYOUT_MAJOR: u32 = 9;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResourceMonitor;

impl Monitor for SystemResourceMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::SystemResources
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Single(Arc::from(OP_SHOW_SYSTEM_RESOURCES))
    }

    fn decode(
        &mut self,
        result: PlanResult,
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let text = result.into_single()?.text_content();
        if text.trim().is_empty() {
            return Ok(None);
        }
        let new_layout = ctx
            .appliance
            .major_version()
            .is_some_and(|major| major >= NEW_LAYOUT_MAJOR);
        Ok(Some(Sample::System(parse_top(&text, new_layout)?)))
    }

    fn check_thresholds(
        &self,
        sample: &Sample,
        config: &PollingConfig,
    ) -> Option<ThresholdBreach> {
        let Sample::System(mp) = sample else {
            return None;
        };

        let cpu_threshold = config.high_cpu_threshold_pct;
        if cpu_threshold != 0 {
            if let Some(cpu) = mp.cpu {
                if cpu.idle < 100.0 - f64::from(cpu_threshold) {
                    return Some(ThresholdBreach::HighCpu {
                        idle_pct: cpu.idle,
                        threshold_pct: cpu_threshold,
                    });
                }
            }
        }

        let memory_threshold = config.high_memory_threshold_pct;
        if memory_threshold != 0 {
            if let Some(used_pct) = mp.memory_used_pct() {
                if used_pct > f64::from(memory_threshold) {
                    return Some(ThresholdBreach::HighMemory {
                        used_pct,
                        threshold_pct: memory_threshold,
                    });
                }
            }
        }

        None
    }
}

/// Parse a top(1) dump. Sections that do not match are left `None`.
pub(crate) fn parse_top(text: &str, new_layout: bool) -> Result<SystemResources, CoreError> {
    let mut mp = SystemResources::default();

    let cpu_re = if new_layout { &CPU_9 } else { &CPU };
    if let Some(caps) = captures(cpu_re, text)? {
        mp.cpu = Some(CpuBreakdown {
            user: float(&caps, 1)?,
            system: float(&caps, 2)?,
            nice: float(&caps, 3)?,
            idle: float(&caps, 4)?,
            iowait: float(&caps, 5)?,
            hardware_irq: float(&caps, 6)?,
            software_irq: float(&caps, 7)?,
            steal: float(&caps, 8)?,
        });
    }

    if new_layout {
        if let Some(caps) = captures(&MEM_9, text)? {
            let (free, used, buff_cache) = (int(&caps, 1)?, int(&caps, 2)?, int(&caps, 3)?);
            mp.memory_used = Some(used);
            mp.memory_free = Some(free.saturating_add(buff_cache));
        }
        if let Some(caps) = captures(&SWAP_9, text)? {
            mp.swap_free = Some(int(&caps, 1)?);
            mp.swap_used = Some(int(&caps, 2)?);
        }
    } else {
        if let Some(caps) = captures(&MEM, text)? {
            let (used, free) = (int(&caps, 1)?, int(&caps, 2)?);
            let buff_cache = int(&caps, 3)?.saturating_add(int(&caps, 4)?);
            mp.memory_used = Some(used.saturating_sub(buff_cache));
            mp.memory_free = Some(free.saturating_add(buff_cache));
        }
        if let Some(caps) = captures(&SWAP, text)? {
            mp.swap_used = Some(int(&caps, 1)?);
            mp.swap_free = Some(int(&caps, 2)?);
        }
    }

    if let Some(caps) = captures(&LOAD_AVG, text)? {
        mp.load_avg_1m = Some(float(&caps, 1)?);
        mp.load_avg_5m = Some(float(&caps, 2)?);
        mp.load_avg_15m = Some(float(&caps, 3)?);
    }

    Ok(mp)
}

fn captures<'t>(pattern: &Pattern, text: &'t str) -> Result<Option<Captures<'t>>, CoreError> {
    let re = pattern
        .as_ref()
        .map_err(|e| CoreError::decode(format!("bad top(1) pattern: {e}")))?;
    Ok(re.captures(text))
}

fn group<'t>(caps: &Captures<'t>, index: usize) -> Result<&'t str, CoreError> {
    caps.get(index)
        .map(|m| m.as_str())
        .ok_or_else(|| CoreError::decode(format!("top(1) group {index} missing")))
}

fn float(caps: &Captures<'_>, index: usize) -> Result<f64, CoreError> {
    let text = group(caps, index)?;
    text.parse()
        .map_err(|_| CoreError::decode(format!("not a number: {text:?}")))
}

fn int(caps: &Captures<'_>, index: usize) -> Result<u64, CoreError> {
    super::parse_counter(group(caps, index)?, "top(1)")
}
