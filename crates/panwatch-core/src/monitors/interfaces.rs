// Interface counter monitor (`show counter interface all`).
//
// Stateful: the counter delta engine needs the previous reading, so the
// first tick after start stores nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::ApiElement;
use panwatch_api::commands::OP_SHOW_COUNTER_INTERFACE;

use super::{DecodeContext, Monitor, MonitorKind, parse_counter};
use crate::counters::CounterDeltaEngine;
use crate::error::CoreError;
use crate::model::{Appliance, COUNTER_ATTRIBUTES, InterfaceCounters, InterfaceSample, Sample};
use crate::poller::{PlanResult, RequestPlan};

#[derive(Debug, Default)]
pub struct InterfaceMonitor {
    engine: CounterDeltaEngine,
}

impl InterfaceMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Monitor for InterfaceMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Interfaces
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Single(Arc::from(OP_SHOW_COUNTER_INTERFACE))
    }

    fn decode(
        &mut self,
        result: PlanResult,
        ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let result = result.into_single()?;
        let sample = parse_interface_counters(&result, ctx.taken_at.timestamp_millis())?;
        Ok(self.engine.ingest(sample).map(Sample::Interfaces))
    }
}

/// Raw counters from a `show counter interface all` result.
///
/// Logical interfaces come from `ifnet` (named by `<name>`), physical
/// ports from `hw` (named by `<interface>`). Entries without a name are
/// skipped; attributes absent from an entry read as zero.
pub fn parse_interface_counters(
    result: &ApiElement,
    taken_at_ms: i64,
) -> Result<InterfaceSample, CoreError> {
    let logical = match result.find("ifnet") {
        Some(ifnet) => section(ifnet, "name")?,
        None => BTreeMap::new(),
    };
    let hw = match result.find("hw") {
        Some(hw) => section(hw, "interface")?,
        None => BTreeMap::new(),
    };
    Ok(InterfaceSample {
        taken_at_ms,
        hw,
        logical,
    })
}

fn section(
    parent: &ApiElement,
    name_tag: &str,
) -> Result<BTreeMap<String, InterfaceCounters>, CoreError> {
    let mut out = BTreeMap::new();
    for entry in parent.find_all("entry") {
        let Some(name) = entry.child(name_tag).map(ApiElement::text_content) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let mut counters = InterfaceCounters::default();
        for attribute in entry.children() {
            if COUNTER_ATTRIBUTES.contains(&attribute.name()) {
                let value = parse_counter(&attribute.text_content(), attribute.name())?;
                counters.set(attribute.name(), value);
            }
        }
        out.insert(name.to_owned(), counters);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use url::Url;

    fn counters_xml(ibytes: u64) -> String {
        format!(
            "<result><ifnet><ifnet><entry><name>ethernet1/1</name><ibytes>{ibytes}</ibytes>\
             <obytes>10</obytes></entry><entry><name>tunnel.1</name><idrops>3</idrops></entry>\
             </ifnet></ifnet><hw><entry><interface>ethernet1/1</interface><ibytes>{ibytes}</ibytes>\
             <ierrors>2</ierrors></entry></hw></result>"
        )
    }

    #[test]
    fn parses_logical_and_hardware_sections() {
        let result = ApiElement::parse(&counters_xml(1000)).unwrap();
        let sample = parse_interface_counters(&result, 42).unwrap();

        assert_eq!(sample.taken_at_ms, 42);
        assert_eq!(sample.logical["ethernet1/1"].ibytes, 1000);
        assert_eq!(sample.logical["ethernet1/1"].obytes, 10);
        assert_eq!(sample.logical["tunnel.1"].idrops, 3);
        assert_eq!(sample.hw["ethernet1/1"].ierrors, 2);
        assert_eq!(sample.hw["ethernet1/1"].opackets, 0);
    }

    #[test]
    fn non_numeric_counter_is_a_decode_error() {
        let result = ApiElement::parse(
            "<result><hw><entry><interface>e1</interface><ibytes>lots</ibytes></entry></hw></result>",
        )
        .unwrap();
        let err = parse_interface_counters(&result, 0).unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
    }

    #[test]
    fn first_tick_primes_second_tick_stores_rates() {
        let appliance = Appliance::new(
            Url::parse("https://fw1").unwrap(),
            SecretString::from("k"),
            "0001",
        );
        let mut monitor = InterfaceMonitor::new();

        let at = |secs| DecodeContext {
            appliance: &appliance,
            taken_at: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        let response = |ibytes| PlanResult::Single(ApiElement::parse(&counters_xml(ibytes)).unwrap());

        assert!(monitor.decode(response(1000), &at(0)).unwrap().is_none());

        let Some(Sample::Interfaces(rates)) = monitor.decode(response(1500), &at(5)).unwrap()
        else {
            panic!("expected interface rates");
        };
        assert_eq!(rates.logical["ethernet1/1"]["ibytes"].rate, 100);
        assert!(rates.logical["ethernet1/1"]["obytes"].zero);
    }
}
