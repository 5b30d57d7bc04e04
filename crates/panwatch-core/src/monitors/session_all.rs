// Filtered session counts, one `show session all` call per enabled metric.

use std::collections::BTreeMap;
use std::sync::Arc;

use panwatch_api::commands::session_all_count;

use super::{DecodeContext, Monitor, MonitorKind, parse_counter};
use crate::error::CoreError;
use crate::model::{Appliance, Sample, SessionAllMetric};
use crate::poller::{PlanResult, RequestPlan};

#[derive(Debug, Clone)]
pub struct SessionAllMonitor {
    metrics: Vec<SessionAllMetric>,
    commands: Vec<(String, Arc<str>)>,
}

impl SessionAllMonitor {
    pub fn new(metrics: Vec<SessionAllMetric>) -> Self {
        let commands = metrics
            .iter()
            .map(|m| {
                let filter: Vec<(String, String)> = m
                    .filter
                    .iter()
                    .map(|f| (f.attr.clone(), f.value.clone()))
                    .collect();
                (m.metric.clone(), Arc::from(session_all_count(&filter)))
            })
            .collect();
        Self { metrics, commands }
    }

    pub fn metrics(&self) -> &[SessionAllMetric] {
        &self.metrics
    }
}

impl Monitor for SessionAllMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::SessionAll
    }

    fn plan(&self, _appliance: &Appliance) -> RequestPlan {
        RequestPlan::Multi(self.commands.clone())
    }

    fn decode(
        &mut self,
        result: PlanResult,
        _ctx: &DecodeContext<'_>,
    ) -> Result<Option<Sample>, CoreError> {
        let mut metrics = BTreeMap::new();
        for (metric, response) in result.into_labeled()? {
            if let Some(count) = response.find_text("member") {
                metrics.insert(format!("sessionall:{metric}"), parse_counter(&count, &metric)?);
            }
        }
        Ok(Some(Sample::Metrics(metrics)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::SessionFilter;
    use chrono::Utc;
    use panwatch_api::ApiElement;
    use secrecy::SecretString;
    use url::Url;

    fn metric(name: &str, attr: &str, value: &str) -> SessionAllMetric {
        SessionAllMetric {
            metric: name.into(),
            filter: vec![SessionFilter {
                attr: attr.into(),
                value: value.into(),
            }],
        }
    }

    #[test]
    fn one_labeled_call_per_metric() {
        let appliance = Appliance::new(
            Url::parse("https://fw1").unwrap(),
            SecretString::from("k"),
            "0001",
        );
        let mut monitor = SessionAllMonitor::new(vec![
            metric("ssl-decrypt", "ssl-decrypt", "yes"),
            metric("long-lived", "min-age", "7200"),
        ]);

        let RequestPlan::Multi(commands) = monitor.plan(&appliance) else {
            panic!("expected a multi-call plan");
        };
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].0, "ssl-decrypt");
        assert!(commands[1].1.contains("<min-age>7200</min-age><count>yes</count>"));

        let count = |n: &str| ApiElement::new("result").with_leaf("member", n);
        let result = PlanResult::Multi(vec![
            ("ssl-decrypt".into(), count("15")),
            ("long-lived".into(), ApiElement::new("result")),
        ]);
        let ctx = DecodeContext {
            appliance: &appliance,
            taken_at: Utc::now(),
        };
        let Some(Sample::Metrics(metrics)) = monitor.decode(result, &ctx).unwrap() else {
            panic!("expected metrics");
        };
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["sessionall:ssl-decrypt"], 15);
    }
}
