// Data-plane resource monitor (`show running resource-monitor`).

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::ApiElement;
use panwatch_api::commands::OP_SHOW_RESOURCE_MONITOR;
use tracing::debug;

use super::{DecodeContext, Monitor, MonitorKind, camel_case};
use crate::error::CoreError;
use crate::model::{Appliance, PeriodStats, ResourceSample, Sample};
use crate::poller::{PlanResult, RequestPlan};

/// Per data processor, per period CPU and resource readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceMonitor;

impl Monitor for ResourceMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Resources
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Single(Arc::from(OP_SHOW_RESOURCE_MONITOR))
    }

    fn decode(
        &mut self,
        result: PlanResult,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let result = result.into_single()?;
        Ok(Some(Sample::Resources(parse_resource_monitor(&result))))
    }
}

/// Old firmware answers without `data-processors`; that yields an empty
/// sample rather than an error.
fn parse_resource_monitor(result: &ApiElement) -> ResourceSample {
    let Some(processors) = result.find("data-processors") else {
        debug!("resource monitor response has no data-processors");
        return ResourceSample::default();
    };

    let processors = processors
        .children()
        .iter()
        .map(|dp| {
            let periods = dp
                .children()
                .iter()
                .map(|period| (period.name().to_owned(), parse_period(period)))
                .collect();
            (dp.name().to_owned(), periods)
        })
        .collect();

    ResourceSample { processors }
}

fn parse_period(period: &ApiElement) -> PeriodStats {
    let mut stats = PeriodStats::default();
    for kpi in period.children() {
        match kpi.name() {
            "cpu-load-average" => stats.cpu_load_average = keyed_values(kpi, "coreid"),
            "cpu-load-maximum" => stats.cpu_load_maximum = keyed_values(kpi, "coreid"),
            "resource-utilization" => stats.resource_utilization = keyed_values(kpi, "name"),
            "task" => stats.task = task_values(kpi),
            other => debug!(tag = other, "unknown resource monitor tag"),
        }
    }
    stats
}

/// `<entry><coreid>0</coreid><value>1,2,3</value></entry>` -> `"0" => [1,2,3]`.
fn keyed_values(kpi: &ApiElement, key_tag: &str) -> BTreeMap<String, Vec<i64>> {
    kpi.children()
        .iter()
        .filter_map(|entry| {
            let key = entry.find_text(key_tag)?;
            let value = entry.find_text("value")?;
            Some((camel_case(&key), value_list(&value)))
        })
        .collect()
}

/// `<task><flow_lookup>5%</flow_lookup></task>`: one value per child tag.
fn task_values(kpi: &ApiElement) -> BTreeMap<String, Vec<i64>> {
    kpi.children()
        .iter()
        .map(|entry| {
            let values = leading_int(entry.text_content().trim())
                .into_iter()
                .collect();
            (camel_case(entry.name()), values)
        })
        .collect()
}

/// Comma-separated readings; anything unparsable is skipped.
fn value_list(text: &str) -> Vec<i64> {
    text.split(',').filter_map(|v| leading_int(v.trim())).collect()
}

/// Integer prefix of `text`, ignoring trailing units like `%`.
fn leading_int(text: &str) -> Option<i64> {
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(text.len(), |(i, _)| i);
    text.get(..end)?.parse().ok()
}
