// ── Appliance onboarding ──
//
// Adding an appliance: obtain an API key, read system info, interfaces and
// (on multi-vsys appliances) the vsys list, then insert the record into the
// registry. Every call goes through the request scheduler like polling
// traffic does.

use panwatch_api::ApiElement;
use panwatch_api::commands::{CONFIG_VSYS_LIST, OP_SHOW_INTERFACE_ALL, OP_SHOW_SYSTEM_INFO};
use secrecy::SecretString;
use tracing::{debug, info};
use url::Url;

use crate::error::CoreError;
use crate::model::{Appliance, HardwareInterface, LogicalInterface};
use crate::registry::ApplianceRegistry;
use crate::scheduler::RequestScheduler;

/// Queue key for calls made before the serial is known. Requests queued
/// under it are invisible to `cancel_queued_for_appliance` for the real
/// serial; onboarding is not tracked by the supervisor, so nothing needs to.
const UNKNOWN_SERIAL: &str = "not-yet";

/// How to authenticate against a new appliance.
#[derive(Debug, Clone)]
pub enum ApplianceCredentials {
    ApiKey(SecretString),
    Password {
        username: String,
        password: SecretString,
    },
}

/// Discover an appliance at `url` and add it to the registry.
pub async fn add_appliance(
    scheduler: &RequestScheduler,
    registry: &ApplianceRegistry,
    url: Url,
    credentials: ApplianceCredentials,
) -> Result<Appliance, CoreError> {
    if let Some(existing) = registry.find_by_url(&url) {
        return Err(CoreError::Onboarding {
            message: format!("{url} is already monitored as {}", existing.serial),
        });
    }

    let api_key = match credentials {
        ApplianceCredentials::ApiKey(key) => key,
        ApplianceCredentials::Password { username, password } => {
            debug!(%url, user = %username, "requesting API key");
            scheduler.key_gen(&url, &username, &password).await?
        }
    };

    let info = scheduler
        .op(&url, &api_key, UNKNOWN_SERIAL, OP_SHOW_SYSTEM_INFO, None)
        .await?;
    let mut appliance = appliance_from_system_info(url, api_key, &info)?;

    if registry.get(&appliance.serial).is_some() {
        return Err(CoreError::Onboarding {
            message: format!("serial {} is already monitored", appliance.serial),
        });
    }

    let interfaces = scheduler
        .op(
            &appliance.url,
            &appliance.api_key,
            &appliance.serial,
            OP_SHOW_INTERFACE_ALL,
            None,
        )
        .await?;
    let (hw, logical) = parse_interfaces(&interfaces);
    appliance.hw_interfaces = hw;
    appliance.logical_interfaces = logical;

    if appliance.multi_vsys {
        let config = scheduler
            .config_get(
                &appliance.url,
                &appliance.api_key,
                &appliance.serial,
                CONFIG_VSYS_LIST,
            )
            .await?;
        appliance.vsys = parse_vsys_list(&config);
    }

    info!(
        serial = %appliance.serial,
        model = %appliance.model,
        version = %appliance.sw_version,
        vsys = appliance.vsys.len(),
        "appliance added"
    );
    registry.upsert(appliance.clone());
    Ok(appliance)
}

/// Build the appliance record from `<show><system><info>`.
fn appliance_from_system_info(
    url: Url,
    api_key: SecretString,
    info: &ApiElement,
) -> Result<Appliance, CoreError> {
    let field = |name: &str| {
        info.find_text(name)
            .ok_or_else(|| CoreError::decode(format!("system info has no {name}")))
    };

    let mut appliance = Appliance::new(url, api_key, field("serial")?);
    appliance.model = field("model")?;
    appliance.sw_version = field("sw-version")?;
    appliance.device_name = info.find_text("devicename").unwrap_or_default();
    appliance.multi_vsys = info
        .find_text("multi-vsys")
        .is_some_and(|v| v != "off");
    Ok(appliance)
}

/// Hardware ports from the `hw` section, logical interfaces from `ifnet`.
/// Entries without a name are skipped.
fn parse_interfaces(result: &ApiElement) -> (Vec<HardwareInterface>, Vec<LogicalInterface>) {
    let hw = result
        .find("hw")
        .map(|hw| {
            hw.find_all("entry")
                .into_iter()
                .filter_map(|entry| {
                    Some(HardwareInterface {
                        name: entry.find_text("name")?,
                        state: entry.find_text("state"),
                        status: entry.find_text("st"),
                        speed: entry.find_text("speed"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let logical = result
        .find("ifnet")
        .map(|ifnet| {
            ifnet
                .find_all("entry")
                .into_iter()
                .filter_map(|entry| {
                    Some(LogicalInterface {
                        name: entry.find_text("name")?,
                        zone: entry.find_text("zone"),
                        vsys: entry.find_text("vsys"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    (hw, logical)
}

/// Names of the `<vsys><entry name="...">` elements.
fn parse_vsys_list(result: &ApiElement) -> Vec<String> {
    let vsys = result.find("vsys").unwrap_or(result);
    vsys.children()
        .iter()
        .filter(|e| e.name() == "entry")
        .filter_map(|e| e.attr("name"))
        .map(str::to_owned)
        .collect()
}
