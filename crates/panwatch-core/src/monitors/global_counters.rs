// Global counters (`show counter global`).

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::ApiElement;
use panwatch_api::commands::OP_SHOW_COUNTER_GLOBAL;

use super::{DecodeContext, Monitor, MonitorKind, parse_counter};
use crate::error::CoreError;
use crate::model::{Appliance, Sample};
use crate::poller::{PlanResult, RequestPlan};

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalCounterMonitor;

impl Monitor for GlobalCounterMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::GlobalCounters
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Single(Arc::from(OP_SHOW_COUNTER_GLOBAL))
    }

    fn decode(
        &mut self,
        result: PlanResult,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let result = result.into_single()?;
        let mut metrics = BTreeMap::new();
        for entry in result.find_all("entry") {
            decode_entry(entry, &mut metrics)?;
        }
        Ok(Some(Sample::Metrics(metrics)))
    }
}

/// One counter becomes `category:aspect:severity:name:value` plus a
/// matching `:rate` key when the entry reports one.
fn decode_entry(entry: &ApiElement, metrics: &mut BTreeMap<String, u64>) -> Result<(), CoreError> {
    let field = |tag: &str| entry.child(tag).map(|e| e.text_content().trim().to_owned());

    let Some(name) = field("name").filter(|n| !n.is_empty()) else {
        return Ok(());
    };
    let Some(value) = field("value") else {
        return Ok(());
    };

    let prefix = format!(
        "{}:{}:{}:{name}",
        field("category").unwrap_or_default(),
        field("aspect").unwrap_or_default(),
        field("severity").unwrap_or_default(),
    );
    metrics.insert(format!("{prefix}:value"), parse_counter(&value, &name)?);

    if let Some(rate) = field("rate") {
        metrics.insert(format!("{prefix}:rate"), parse_counter(&rate, &name)?);
    }
    Ok(())
}
