// ── Transport seam ──
//
// The scheduler dispatches every request through a `Transport`. The
// production implementation talks to the appliance XML API; tests swap in
// `testing::MockTransport`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use panwatch_api::{ApiElement, TlsMode, TransportConfig, XmlApiClient};
use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::error::CoreError;

/// Performs the actual network call for one request.
///
/// Errors carry the remote `<msg>` text when the appliance provided one.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Exchange a username/password for an API key.
    async fn key_exchange(
        &self,
        url: &Url,
        user: &str,
        password: &SecretString,
        timeout: Option<Duration>,
    ) -> Result<SecretString, CoreError>;

    /// Run an operational command, optionally scoped to a vsys.
    async fn call(
        &self,
        url: &Url,
        api_key: &SecretString,
        command: &str,
        vsys: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError>;

    /// Fetch a configuration subtree by xpath.
    async fn config_fetch(
        &self,
        url: &Url,
        api_key: &SecretString,
        xpath: &str,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError>;
}

// ── XmlApiTransport ──────────────────────────────────────────────

/// `Transport` backed by [`XmlApiClient`], one cached client per base URL.
pub struct XmlApiTransport {
    defaults: TransportConfig,
    tls_overrides: DashMap<String, TlsMode>,
    clients: DashMap<String, XmlApiClient>,
}

impl XmlApiTransport {
    pub fn new(defaults: TransportConfig) -> Self {
        Self {
            defaults,
            tls_overrides: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    /// Use a specific TLS mode for one appliance. Drops any cached client.
    pub fn set_tls(&self, url: &Url, tls: TlsMode) {
        let key = endpoint_key(url);
        self.clients.remove(&key);
        self.tls_overrides.insert(key, tls);
    }

    fn client(&self, url: &Url) -> Result<XmlApiClient, CoreError> {
        let key = endpoint_key(url);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut config = self.defaults.clone();
        if let Some(tls) = self.tls_overrides.get(&key) {
            config.tls = tls.clone();
        }
        debug!(endpoint = %url, tls = ?config.tls, "building XML API client");
        let client = XmlApiClient::new(url.clone(), &config)?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for XmlApiTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Transport for XmlApiTransport {
    async fn key_exchange(
        &self,
        url: &Url,
        user: &str,
        password: &SecretString,
        timeout: Option<Duration>,
    ) -> Result<SecretString, CoreError> {
        let client = self.client(url)?;
        Ok(client.key_gen(user, password, timeout).await?)
    }

    async fn call(
        &self,
        url: &Url,
        api_key: &SecretString,
        command: &str,
        vsys: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError> {
        let client = self.client(url)?;
        Ok(client.op(api_key, command, vsys, timeout).await?)
    }

    async fn config_fetch(
        &self,
        url: &Url,
        api_key: &SecretString,
        xpath: &str,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError> {
        let client = self.client(url)?;
        Ok(client.config_get(api_key, xpath, timeout).await?)
    }
}

/// Queue/cache key for an appliance URL.
pub(crate) fn endpoint_key(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_owned()
}
