// ── Optional pollers ──
//
// Per-appliance opt-in polling tasks. The catalog is static; a
// `DevicePreference` lists which catalog entries an appliance enables.

use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

/// Catalog id of the GlobalProtect gateway statistics poller.
pub const GP_GATEWAY_POLLER_ID: Uuid = uuid!("ef875b26-4ffa-44ab-8448-4d2bec43fc56");

/// One `<attr>value</attr>` term of a session filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionFilter {
    pub attr: String,
    pub value: String,
}

/// A counted `show session all` query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionAllMetric {
    /// Metric suffix, stored as `sessionall:<metric>`.
    pub metric: String,
    pub filter: Vec<SessionFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionalPollerKind {
    #[serde(rename = "gpgw")]
    GpGateway,
    #[serde(rename = "sessionall")]
    SessionAll(SessionAllMetric),
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionalPoller {
    pub id: Uuid,
    pub description: String,
    #[serde(flatten)]
    pub kind: OptionalPollerKind,
}

/// Which optional pollers an appliance has enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePreference {
    pub serial: String,
    #[serde(default)]
    pub enabled_optional_pollers: Vec<Uuid>,
}

impl OptionalPoller {
    fn session_all(id: Uuid, description: &str, metric: &str, attr: &str, value: &str) -> Self {
        Self {
            id,
            description: description.into(),
            kind: OptionalPollerKind::SessionAll(SessionAllMetric {
                metric: metric.into(),
                filter: vec![SessionFilter {
                    attr: attr.into(),
                    value: value.into(),
                }],
            }),
        }
    }

    /// The built-in catalog.
    pub fn default_catalog() -> Vec<OptionalPoller> {
        vec![
            OptionalPoller {
                id: GP_GATEWAY_POLLER_ID,
                description: "GlobalProtect Gateway Statistics".into(),
                kind: OptionalPollerKind::GpGateway,
            },
            Self::session_all(
                uuid!("9bb00305-1448-478a-8af8-a634ab2c49a0"),
                "SSL Decrypt Sessions",
                "ssl-decrypt",
                "ssl-decrypt",
                "yes",
            ),
            Self::session_all(
                uuid!("84d3f9dc-e5b4-40c7-9b65-401ed2ba2132"),
                "Sessions in Discard",
                "discard",
                "state",
                "discard",
            ),
            Self::session_all(
                uuid!("95ca752f-2d5f-4e17-b143-c702a3262ddc"),
                "Long running sessions (>2h)",
                "long-running",
                "min-age",
                "7200",
            ),
            Self::session_all(
                uuid!("5d3cdb10-d317-4519-b7cd-733852c8324d"),
                "High volume sessions (>1GB)",
                "high-volume",
                "min-kb",
                "1048576",
            ),
        ]
    }
}

/// Resolve the optional pollers enabled for `serial`, in preference order.
/// Unknown ids are skipped.
pub fn optional_pollers_for(
    serial: &str,
    preferences: &[DevicePreference],
    catalog: &[OptionalPoller],
) -> Vec<OptionalPoller> {
    let Some(preference) = preferences.iter().find(|p| p.serial == serial) else {
        return Vec::new();
    };
    preference
        .enabled_optional_pollers
        .iter()
        .filter_map(|id| catalog.iter().find(|op| op.id == *id).cloned())
        .collect()
}
