// ── Appliance domain types ──

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Serialize;
use url::Url;

/// A monitored appliance.
///
/// Created by onboarding, mutated by polling tasks (error map, polling
/// counter) and by user actions (disable, enable, remove).
#[derive(Debug, Clone, Serialize)]
pub struct Appliance {
    /// Management base URL, e.g. `https://fw1.example.com`.
    pub url: Url,
    #[serde(skip)]
    pub api_key: SecretString,
    pub serial: String,
    pub model: String,
    pub device_name: String,
    pub sw_version: String,
    pub multi_vsys: bool,
    /// Virtual systems. Empty on single-vsys appliances.
    pub vsys: Vec<String>,
    pub hw_interfaces: Vec<HardwareInterface>,
    pub logical_interfaces: Vec<LogicalInterface>,
    pub disabled: bool,
    /// Last failure per polling task, keyed by task error key.
    pub errors: BTreeMap<String, String>,
    /// Number of ticks currently running against this appliance.
    pub polling: u32,
}

impl Appliance {
    /// A freshly discovered appliance with no interfaces or errors.
    pub fn new(url: Url, api_key: SecretString, serial: impl Into<String>) -> Self {
        Self {
            url,
            api_key,
            serial: serial.into(),
            model: String::new(),
            device_name: String::new(),
            sw_version: String::new(),
            multi_vsys: false,
            vsys: Vec::new(),
            hw_interfaces: Vec::new(),
            logical_interfaces: Vec::new(),
            disabled: false,
            errors: BTreeMap::new(),
            polling: 0,
        }
    }

    /// Major firmware version (`"10.1.3"` -> `10`), if parseable.
    pub fn major_version(&self) -> Option<u32> {
        self.sw_version.split('.').next()?.trim().parse().ok()
    }

    pub fn is_polling(&self) -> bool {
        self.polling > 0
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A physical port from `<show><interface>all` (`hw` section).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HardwareInterface {
    pub name: String,
    pub state: Option<String>,
    pub status: Option<String>,
    pub speed: Option<String>,
}

/// A logical interface from `<show><interface>all` (`ifnet` section).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogicalInterface {
    pub name: String,
    pub zone: Option<String>,
    pub vsys: Option<String>,
}
