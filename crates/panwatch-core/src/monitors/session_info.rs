// Session table summary (`show session info`).

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::commands::OP_SHOW_SESSION_INFO;

use super::{DecodeContext, Monitor, MonitorKind, camel_case, parse_counter};
use crate::error::CoreError;
use crate::model::{Appliance, Sample};
use crate::poller::{PlanResult, RequestPlan};

/// Result tags stored as `sessioninfo:<camelCase tag>`.
const TRACKED_TAGS: [&str; 12] = [
    "pps",
    "num-max",
    "num-active",
    "num-mcast",
    "num-udp",
    "num-icmp",
    "num-predict",
    "num-bcast",
    "num-installed",
    "num-tcp",
    "cps",
    "kbps",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInfoMonitor;

impl Monitor for SessionInfoMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::SessionInfo
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Single(Arc::from(OP_SHOW_SESSION_INFO))
    }

    fn decode(
        &mut self,
        result: PlanResult,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let result = result.into_single()?;
        let mut metrics = BTreeMap::new();
        for tag in result.children() {
            if !TRACKED_TAGS.contains(&tag.name()) {
                continue;
            }
            let text = tag.text_content();
            if text.trim().is_empty() {
                continue;
            }
            let value = parse_counter(&text, tag.name())?;
            metrics.insert(format!("sessioninfo:{}", camel_case(tag.name())), value);
        }
        Ok(Some(Sample::Metrics(metrics)))
    }
}
