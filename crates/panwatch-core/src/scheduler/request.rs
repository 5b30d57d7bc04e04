// ── Pending requests ──
//
// A request waiting in an endpoint queue. Each variant carries its own
// single-use reply channel, so the caller's future resolves exactly once:
// with the transport outcome, with `Canceled` when the request is dropped
// from the queue, or with `SchedulerStopped` when the scheduler goes away.

use std::sync::Arc;
use std::time::Duration;

use panwatch_api::ApiElement;
use secrecy::SecretString;
use strum::{AsRefStr, Display};
use tokio::sync::oneshot;
use url::Url;

use crate::error::CoreError;
use crate::transport::Transport;

type Reply<T> = oneshot::Sender<Result<T, CoreError>>;

/// Receiving half handed back to the submitter.
pub type ReplyReceiver<T> = oneshot::Receiver<Result<T, CoreError>>;

/// Request kind, for predicates and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RequestKind {
    KeyGen,
    Op,
    Config,
}

/// A queued API call.
pub enum PendingRequest {
    /// Credential exchange. Not tied to a serial: the appliance is unknown
    /// until this succeeds.
    KeyGen {
        url: Url,
        user: String,
        password: SecretString,
        reply: Reply<SecretString>,
    },
    Op {
        url: Url,
        api_key: SecretString,
        serial: String,
        command: Arc<str>,
        vsys: Option<String>,
        reply: Reply<ApiElement>,
    },
    Config {
        url: Url,
        api_key: SecretString,
        serial: String,
        xpath: String,
        reply: Reply<ApiElement>,
    },
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kind", &self.kind())
            .field("url", &self.url().as_str())
            .field("serial", &self.serial())
            .finish_non_exhaustive()
    }
}

impl PendingRequest {
    pub fn key_gen(
        url: Url,
        user: impl Into<String>,
        password: SecretString,
    ) -> (Self, ReplyReceiver<SecretString>) {
        let (reply, rx) = oneshot::channel();
        let request = Self::KeyGen {
            url,
            user: user.into(),
            password,
            reply,
        };
        (request, rx)
    }

    pub fn op(
        url: Url,
        api_key: SecretString,
        serial: impl Into<String>,
        command: impl Into<Arc<str>>,
        vsys: Option<String>,
    ) -> (Self, ReplyReceiver<ApiElement>) {
        let (reply, rx) = oneshot::channel();
        let request = Self::Op {
            url,
            api_key,
            serial: serial.into(),
            command: command.into(),
            vsys,
            reply,
        };
        (request, rx)
    }

    pub fn config(
        url: Url,
        api_key: SecretString,
        serial: impl Into<String>,
        xpath: impl Into<String>,
    ) -> (Self, ReplyReceiver<ApiElement>) {
        let (reply, rx) = oneshot::channel();
        let request = Self::Config {
            url,
            api_key,
            serial: serial.into(),
            xpath: xpath.into(),
            reply,
        };
        (request, rx)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::KeyGen { .. } => RequestKind::KeyGen,
            Self::Op { .. } => RequestKind::Op,
            Self::Config { .. } => RequestKind::Config,
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::KeyGen { url, .. } | Self::Op { url, .. } | Self::Config { url, .. } => url,
        }
    }

    /// Owning appliance serial. `None` for key exchange.
    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::KeyGen { .. } => None,
            Self::Op { serial, .. } | Self::Config { serial, .. } => Some(serial),
        }
    }

    /// The submitter stopped waiting for the outcome.
    pub(crate) fn is_abandoned(&self) -> bool {
        match self {
            Self::KeyGen { reply, .. } => reply.is_closed(),
            Self::Op { reply, .. } | Self::Config { reply, .. } => reply.is_closed(),
        }
    }

    /// Resolve the caller's future with an error without dispatching.
    pub(crate) fn reject(self, err: CoreError) {
        match self {
            Self::KeyGen { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Op { reply, .. } | Self::Config { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Run the call against `transport` and deliver the outcome.
    ///
    /// The timeout is enforced here as well as being handed to the
    /// transport, so a transport that ignores it still fails on time.
    /// `None` dispatches without a deadline.
    pub(crate) async fn dispatch(self, transport: &dyn Transport, timeout: Option<Duration>) {
        match self {
            Self::KeyGen {
                url,
                user,
                password,
                reply,
            } => {
                let call = transport.key_exchange(&url, &user, &password, timeout);
                let _ = reply.send(with_deadline(call, timeout).await);
            }
            Self::Op {
                url,
                api_key,
                command,
                vsys,
                reply,
                ..
            } => {
                let call = transport.call(&url, &api_key, &command, vsys.as_deref(), timeout);
                let _ = reply.send(with_deadline(call, timeout).await);
            }
            Self::Config {
                url,
                api_key,
                xpath,
                reply,
                ..
            } => {
                let call = transport.config_fetch(&url, &api_key, &xpath, timeout);
                let _ = reply.send(with_deadline(call, timeout).await);
            }
        }
    }
}

async fn with_deadline<T>(
    call: impl Future<Output = Result<T, CoreError>>,
    timeout: Option<Duration>,
) -> Result<T, CoreError> {
    let Some(timeout) = timeout else {
        return call.await;
    };
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CoreError::Timeout {
            timeout_secs: timeout.as_secs(),
        }))
}

/// Await a reply, mapping a dropped sender to `SchedulerStopped`.
pub(crate) async fn await_reply<T>(rx: ReplyReceiver<T>) -> Result<T, CoreError> {
    rx.await.unwrap_or(Err(CoreError::SchedulerStopped))
}
