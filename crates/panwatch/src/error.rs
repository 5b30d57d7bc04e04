//! Daemon error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use panwatch_config::ConfigError;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("{source}")]
    #[diagnostic(
        code(panwatch::config),
        help(
            "Check the config file and PANWATCH_* environment variables.\n\
             Default location: {path}"
        )
    )]
    Config { source: ConfigError, path: String },

    #[error("No credentials for appliance {url}")]
    #[diagnostic(
        code(panwatch::no_credentials),
        help(
            "Set api_key_env or password_env in the appliance entry, or store the secret \
             in the system keyring under service 'panwatch', entry '{url}/api-key'."
        )
    )]
    NoCredentials { url: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("None of the {configured} configured appliances could be onboarded")]
    #[diagnostic(
        code(panwatch::onboarding),
        help("Run with -v to see the failure for each appliance.")
    )]
    NothingOnboarded { configured: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for DaemonError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { appliance } => Self::NoCredentials { url: appliance },
            source => Self::Config {
                source,
                path: panwatch_config::config_path().display().to_string(),
            },
        }
    }
}

impl DaemonError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::USAGE,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NothingOnboarded { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}
