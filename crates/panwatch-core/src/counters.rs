// ── Counter delta engine ──
//
// Turns cumulative interface counters into per-second rates. Keeps the
// previous raw sample and the previous tick's deltas so each new sample
// yields a rate, a zero-activity flag and a trend flag per attribute.
//
// Interfaces missing from the previous sample are diffed against zero,
// so a newly seen interface reports its full counter as a one-tick spike.

use std::collections::BTreeMap;

use crate::model::{
    AttributeRate, COUNTER_ATTRIBUTES, InterfaceCounters, InterfaceRates, InterfaceSample,
};

/// Raw deltas of one tick, with the elapsed time they cover.
#[derive(Debug, Clone)]
struct DeltaPoint {
    elapsed_ms: i128,
    hw: BTreeMap<String, [i128; 6]>,
    logical: BTreeMap<String, [i128; 6]>,
}

impl DeltaPoint {
    fn rate(&self, logical: bool, interface: &str, index: usize) -> i128 {
        let table = if logical { &self.logical } else { &self.hw };
        table
            .get(interface)
            .and_then(|d| d.get(index))
            .map_or(0, |delta| delta * 1000 / self.elapsed_ms)
    }
}

/// Per-appliance delta state.
#[derive(Debug, Default)]
pub struct CounterDeltaEngine {
    previous: Option<InterfaceSample>,
    previous_delta: Option<DeltaPoint>,
}

impl CounterDeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new sample. Returns rates when a previous sample exists.
    ///
    /// A sample not strictly newer than the previous one (clock step)
    /// replaces the baseline without producing output.
    pub fn ingest(&mut self, sample: InterfaceSample) -> Option<InterfaceRates> {
        let previous = self.previous.replace(sample)?;
        let current = self.previous.as_ref()?;

        let elapsed_ms = i128::from(current.taken_at_ms) - i128::from(previous.taken_at_ms);
        if elapsed_ms <= 0 {
            self.previous_delta = None;
            return None;
        }

        let delta = DeltaPoint {
            elapsed_ms,
            hw: raw_deltas(&previous.hw, &current.hw),
            logical: raw_deltas(&previous.logical, &current.logical),
        };

        let rates = InterfaceRates {
            hw: self.rates(&delta, false),
            logical: self.rates(&delta, true),
        };
        self.previous_delta = Some(delta);
        Some(rates)
    }

    /// Forget all history; the next sample only primes the engine.
    pub fn reset(&mut self) {
        self.previous = None;
        self.previous_delta = None;
    }

    fn rates(
        &self,
        delta: &DeltaPoint,
        logical: bool,
    ) -> BTreeMap<String, BTreeMap<&'static str, AttributeRate>> {
        let table = if logical { &delta.logical } else { &delta.hw };
        table
            .iter()
            .map(|(name, raw)| {
                let attributes = COUNTER_ATTRIBUTES
                    .iter()
                    .zip(raw)
                    .enumerate()
                    .map(|(index, (attribute, raw))| {
                        let rate = raw * 1000 / delta.elapsed_ms;
                        let up = self
                            .previous_delta
                            .as_ref()
                            .is_some_and(|prev| rate > prev.rate(logical, name, index));
                        let value = AttributeRate {
                            rate,
                            zero: *raw == 0,
                            up,
                        };
                        (*attribute, value)
                    })
                    .collect();
                (name.clone(), attributes)
            })
            .collect()
    }
}

/// Per-interface raw deltas of every attribute in `new`.
fn raw_deltas(
    old: &BTreeMap<String, InterfaceCounters>,
    new: &BTreeMap<String, InterfaceCounters>,
) -> BTreeMap<String, [i128; 6]> {
    new.iter()
        .map(|(name, counters)| {
            let baseline = old.get(name).copied().unwrap_or_default();
            let mut out = [0i128; 6];
            for (slot, attribute) in out.iter_mut().zip(COUNTER_ATTRIBUTES) {
                let new_value = counters.get(attribute).unwrap_or(0);
                let old_value = baseline.get(attribute).unwrap_or(0);
                *slot = counter_delta(old_value, new_value);
            }
            (name.clone(), out)
        })
        .collect()
}

/// `new - old`, treating a decrease as a counter restart from zero.
fn counter_delta(old: u64, new: u64) -> i128 {
    if new >= old {
        i128::from(new) - i128::from(old)
    } else {
        i128::from(new)
    }
}
