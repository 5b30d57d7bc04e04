// GlobalProtect gateway statistics, queried once unscoped and once per vsys.

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::commands::OP_SHOW_GPGW_STATS;

use super::{DecodeContext, Monitor, MonitorKind, parse_counter};
use crate::error::CoreError;
use crate::model::{Appliance, Sample};
use crate::poller::{PlanResult, RequestPlan};

/// `(response tag, metric suffix)`.
const USER_COUNTS: [(&str, &str); 2] = [
    ("TotalCurrentUsers", "totalCurrentUsers"),
    ("TotalPreviousUsers", "totalPreviousUsers"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct GpGatewayMonitor;

impl Monitor for GpGatewayMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::GpGateway
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::PerVsys(Arc::from(OP_SHOW_GPGW_STATS))
    }

    /// Metrics are keyed `<vsys>:gpgw:<metric>`, the unscoped call
    /// landing under `root`.
    fn decode(
        &mut self,
        result: PlanResult,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let mut metrics = BTreeMap::new();
        for (vsys, response) in result.into_labeled()? {
            for (tag, metric) in USER_COUNTS {
                if let Some(text) = response.find_text(tag) {
                    metrics.insert(format!("{vsys}:gpgw:{metric}"), parse_counter(&text, tag)?);
                }
            }
        }
        Ok(Some(Sample::Metrics(metrics)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::poller::ROOT_CONTEXT;
    use chrono::Utc;
    use panwatch_api::ApiElement;
    use secrecy::SecretString;
    use url::Url;

    #[test]
    fn per_vsys_plan_and_keys() {
        let mut appliance = Appliance::new(
            Url::parse("https://fw1").unwrap(),
            SecretString::from("k"),
            "0001",
        );
        appliance.vsys = vec!["vsys1".into(), "vsys2".into()];
        assert_eq!(GpGatewayMonitor.plan(&appliance).call_count(&appliance), 3);

        let stats = |current: &str| {
            ApiElement::new("result").with_child(
                ApiElement::new("Gateway")
                    .with_leaf("TotalCurrentUsers", current)
                    .with_leaf("TotalPreviousUsers", "4"),
            )
        };
        let result = PlanResult::PerVsys(vec![
            (ROOT_CONTEXT.into(), stats("10")),
            ("vsys1".into(), stats("7")),
            ("vsys2".into(), ApiElement::new("result")),
        ]);
        let ctx = DecodeContext {
            appliance: &appliance,
            taken_at: Utc::now(),
        };

        let Some(Sample::Metrics(metrics)) = GpGatewayMonitor.decode(result, &ctx).unwrap() else {
            panic!("expected metrics");
        };
        assert_eq!(metrics.len(), 4);
        assert_eq!(metrics["root:gpgw:totalCurrentUsers"], 10);
        assert_eq!(metrics["vsys1:gpgw:totalCurrentUsers"], 7);
        assert_eq!(metrics["vsys1:gpgw:totalPreviousUsers"], 4);
    }
}
