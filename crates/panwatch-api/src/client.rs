// XML API HTTP client
//
// Wraps `reqwest::Client` with `/api/` URL construction, query parameter
// encoding and `<response status="...">` envelope unwrapping. Every method
// takes its own timeout so callers can hot-reconfigure it between calls;
// `None` leaves only the client-wide ceiling from `TransportConfig`.
//
// Request URLs carry the API key (or the keygen password) in the query, so
// reqwest errors are stripped of their URL before they leave this module.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::element::ApiElement;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Raw HTTP client for one appliance's XML management API.
///
/// All methods return the unwrapped `<result>` element -- the envelope is
/// validated and stripped before the caller sees it.
#[derive(Clone)]
pub struct XmlApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl XmlApiClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `base_url` is the management root (e.g. `https://fw.example.com`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The appliance base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn api_url(&self) -> Result<Url, Error> {
        Ok(self.base_url.join("/api/")?)
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Exchange a username/password for an API key.
    pub async fn key_gen(
        &self,
        user: &str,
        password: &SecretString,
        timeout: Option<Duration>,
    ) -> Result<SecretString, Error> {
        let params = [
            ("type", "keygen"),
            ("user", user),
            ("password", password.expose_secret()),
        ];
        let result = self.get(&params, timeout).await?;
        let key = result
            .find_text("key")
            .ok_or_else(|| Error::MalformedResponse {
                message: "missing <key> in keygen result".into(),
            })?;
        Ok(SecretString::from(key))
    }

    /// Run an operational command, optionally scoped to a vsys.
    pub async fn op(
        &self,
        api_key: &SecretString,
        cmd: &str,
        vsys: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, Error> {
        let mut params = vec![
            ("key", api_key.expose_secret()),
            ("type", "op"),
            ("cmd", cmd),
        ];
        if let Some(vsys) = vsys {
            params.push(("vsys", vsys));
        }
        self.get(&params, timeout).await
    }

    /// Fetch a configuration subtree by xpath.
    pub async fn config_get(
        &self,
        api_key: &SecretString,
        xpath: &str,
        timeout: Option<Duration>,
    ) -> Result<ApiElement, Error> {
        let params = [
            ("key", api_key.expose_secret()),
            ("type", "config"),
            ("action", "get"),
            ("xpath", xpath),
        ];
        self.get(&params, timeout).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get(
        &self,
        params: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<ApiElement, Error> {
        let url = self.api_url()?;
        let kind = params
            .iter()
            .find(|(k, _)| *k == "type")
            .map_or("?", |(_, v)| *v);
        debug!(url = %url, kind, "GET");

        let mut request = self.http.get(url).query(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status_error = resp.error_for_status_ref().err();
        let body = resp
            .text()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        if let Some(err) = status_error {
            // A rejected key still comes back as an envelope with a <msg>.
            if let Ok(doc) = ApiElement::parse(&body) {
                if let Err(remote @ Error::Remote { .. }) = unwrap_envelope(doc) {
                    return Err(remote);
                }
            }
            return Err(Error::Transport(err.without_url()));
        }

        unwrap_envelope(ApiElement::parse(&body)?)
    }
}

fn map_send_error(err: reqwest::Error, timeout: Option<Duration>) -> Error {
    match timeout {
        Some(timeout) if err.is_timeout() => Error::Timeout {
            timeout_secs: timeout.as_secs(),
        },
        _ => Error::Transport(err.without_url()),
    }
}

/// Validate the `<response status="...">` envelope and return `<result>`.
pub fn unwrap_envelope(doc: ApiElement) -> Result<ApiElement, Error> {
    let response = if doc.name() == "response" {
        doc
    } else {
        doc.find("response")
            .cloned()
            .ok_or_else(|| Error::MalformedResponse {
                message: "missing <response>".into(),
            })?
    };

    let status = response
        .attr("status")
        .ok_or_else(|| Error::MalformedResponse {
            message: "missing status".into(),
        })?;

    if status != "success" {
        let message = response
            .find_text("msg")
            .unwrap_or_else(|| format!("status={status}"));
        return Err(Error::Remote { message });
    }

    // Some commands answer with a bare `<response status="success"/>`.
    Ok(response
        .into_child("result")
        .unwrap_or_else(|| ApiElement::new("result")))
}
