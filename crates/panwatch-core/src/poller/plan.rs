// ── Request plans ──
//
// How a polling task turns one tick into API calls. Multi-call plans are
// serialized: each call is submitted only after the previous one
// resolved, so results come back in plan order.

use std::sync::Arc;

use panwatch_api::ApiElement;

use crate::error::CoreError;
use crate::model::Appliance;
use crate::scheduler::RequestScheduler;

/// Context label of the unscoped call in a per-vsys plan.
pub const ROOT_CONTEXT: &str = "root";

/// The calls a polling task issues on one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPlan {
    /// One command, one response.
    Single(Arc<str>),
    /// The same command unscoped, then once per vsys of the appliance.
    PerVsys(Arc<str>),
    /// A fixed, ordered list of `(label, command)` pairs.
    Multi(Vec<(String, Arc<str>)>),
}

/// Responses, shaped like the plan that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult {
    Single(ApiElement),
    /// `(vsys, result)`, starting with [`ROOT_CONTEXT`].
    PerVsys(Vec<(String, ApiElement)>),
    /// `(label, result)` in plan order.
    Multi(Vec<(String, ApiElement)>),
}

impl RequestPlan {
    /// Number of API calls this plan issues against `appliance`.
    pub fn call_count(&self, appliance: &Appliance) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::PerVsys(_) => 1 + appliance.vsys.len(),
            Self::Multi(commands) => commands.len(),
        }
    }

    /// Submit the plan's calls through the scheduler.
    ///
    /// Stops at the first failing call.
    pub async fn execute(
        &self,
        scheduler: &RequestScheduler,
        appliance: &Appliance,
    ) -> Result<PlanResult, CoreError> {
        match self {
            Self::Single(command) => {
                let result = op(scheduler, appliance, command, None).await?;
                Ok(PlanResult::Single(result))
            }
            Self::PerVsys(command) => {
                let mut results = Vec::with_capacity(1 + appliance.vsys.len());
                let root = op(scheduler, appliance, command, None).await?;
                results.push((ROOT_CONTEXT.to_owned(), root));
                for vsys in &appliance.vsys {
                    let scoped = op(scheduler, appliance, command, Some(vsys)).await?;
                    results.push((vsys.clone(), scoped));
                }
                Ok(PlanResult::PerVsys(results))
            }
            Self::Multi(commands) => {
                let mut results = Vec::with_capacity(commands.len());
                for (label, command) in commands {
                    let result = op(scheduler, appliance, command, None).await?;
                    results.push((label.clone(), result));
                }
                Ok(PlanResult::Multi(results))
            }
        }
    }
}

async fn op(
    scheduler: &RequestScheduler,
    appliance: &Appliance,
    command: &str,
    vsys: Option<&str>,
) -> Result<ApiElement, CoreError> {
    scheduler
        .op(
            &appliance.url,
            &appliance.api_key,
            &appliance.serial,
            command,
            vsys,
        )
        .await
}

impl PlanResult {
    /// The response of a single-call plan.
    pub fn into_single(self) -> Result<ApiElement, CoreError> {
        match self {
            Self::Single(element) => Ok(element),
            Self::PerVsys(_) | Self::Multi(_) => {
                Err(CoreError::decode("expected a single response"))
            }
        }
    }

    /// Labeled responses of a per-vsys or multi-call plan.
    pub fn into_labeled(self) -> Result<Vec<(String, ApiElement)>, CoreError> {
        match self {
            Self::PerVsys(results) | Self::Multi(results) => Ok(results),
            Self::Single(_) => Err(CoreError::decode("expected labeled responses")),
        }
    }
}
