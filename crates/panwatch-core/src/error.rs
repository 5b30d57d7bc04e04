// ── Core error types ──
//
// Errors surfaced by the scheduler, polling tasks and onboarding. Callers
// never see reqwest or XML parser errors directly: the
// `From<panwatch_api::Error>` impl translates them into domain variants.
// The `Display` form of every variant is what lands in an appliance's
// error map.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Request errors ───────────────────────────────────────────────
    /// Transport, envelope or remote failure of a single API call.
    /// `message` is the remote `<msg>` text when the appliance sent one.
    #[error("{message}")]
    Api { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The request was dropped from its endpoint queue before dispatch.
    #[error("Request canceled before dispatch")]
    Canceled,

    #[error("Request scheduler stopped")]
    SchedulerStopped,

    // ── Sampling errors ──────────────────────────────────────────────
    #[error("Unexpected response: {message}")]
    Decode { message: String },

    #[error("Sample store error: {message}")]
    Sink { message: String },

    // ── Roster errors ────────────────────────────────────────────────
    #[error("Appliance not found: {serial}")]
    ApplianceNotFound { serial: String },

    #[error("Cannot add appliance: {message}")]
    Onboarding { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<panwatch_api::Error> for CoreError {
    fn from(err: panwatch_api::Error) -> Self {
        match err {
            panwatch_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            panwatch_api::Error::Transport(ref e) if e.is_timeout() => {
                CoreError::Timeout { timeout_secs: 0 }
            }
            panwatch_api::Error::Remote { message } => CoreError::Api {
                message: format!("Request failed ({message})"),
            },
            panwatch_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            panwatch_api::Error::Xml { message, body: _ } => CoreError::Api {
                message: format!("Invalid response from device: {message}"),
            },
            other @ (panwatch_api::Error::Transport(_)
            | panwatch_api::Error::Tls(_)
            | panwatch_api::Error::MalformedResponse { .. }) => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}
