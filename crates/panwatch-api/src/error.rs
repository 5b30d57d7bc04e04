use thiserror::Error;

/// Top-level error type for the `panwatch-api` crate.
///
/// Covers every failure mode of a single XML API exchange: transport,
/// timeout, envelope validation, remote-reported failures and XML parsing.
/// `panwatch-core` maps these into the error strings recorded per appliance.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, HTTP status, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Envelope ────────────────────────────────────────────────────
    /// The body parsed but is not a valid `<response status="...">` envelope.
    #[error("Invalid response from device: {message}")]
    MalformedResponse { message: String },

    /// The appliance answered with a non-success status.
    /// Carries the `<msg>` text extracted from the response when present.
    #[error("Request failed ({message})")]
    Remote { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// XML parsing failed, with the raw body for debugging.
    #[error("XML parse error: {message}")]
    Xml { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the request exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// The remote message, if the appliance rejected the request.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote { message } => Some(message),
            _ => None,
        }
    }
}
