// ── Request scheduler ──
//
// Per-endpoint, concurrency-limited dispatch of API calls. A single
// background task owns every endpoint queue and in-flight set; callers
// talk to it over an mpsc channel. Because only that task mutates queue
// state, "pop and mark in-flight" is one uninterrupted step.
//
// Queues are stacks: the most recently submitted request is dispatched
// first. Under sustained load on one endpoint older requests can wait
// behind newer ones. Polling tasks resubmit every tick, so a starved poll
// is superseded rather than lost.

pub mod request;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use panwatch_api::ApiElement;
use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::config::PollingConfig;
use crate::error::CoreError;
use crate::transport::{Transport, endpoint_key};

pub use request::{PendingRequest, ReplyReceiver, RequestKind};

/// Predicate used to drop queued requests.
pub type RequestPredicate = Box<dyn Fn(&PendingRequest) -> bool + Send>;

/// Queue depth for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub queued: usize,
    pub in_flight: usize,
}

enum SchedulerMsg {
    Submit(PendingRequest),
    Cancel {
        endpoint: String,
        predicate: RequestPredicate,
        reply: oneshot::Sender<usize>,
    },
    Completed {
        endpoint: String,
        id: u64,
    },
    Stats {
        reply: oneshot::Sender<BTreeMap<String, EndpointStats>>,
    },
}

// ── RequestScheduler ─────────────────────────────────────────────

/// Handle to the scheduler task.
///
/// Cheaply cloneable. The task stops when every handle is dropped or
/// [`shutdown`](Self::shutdown) is called; requests still queued at that
/// point resolve with [`CoreError::SchedulerStopped`].
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tx: mpsc::UnboundedSender<SchedulerMsg>,
    cancel: CancellationToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl RequestScheduler {
    /// Spawn the scheduler task. Must be called from within a Tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>, config: watch::Receiver<PollingConfig>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = SchedulerTask {
            endpoints: HashMap::new(),
            next_id: 0,
            transport,
            config,
            completions: tx.downgrade(),
        };
        let handle = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            inner: Arc::new(SchedulerInner {
                tx,
                cancel,
                handle: std::sync::Mutex::new(Some(handle)),
            }),
        }
    }

    // ── Submission ───────────────────────────────────────────────

    /// Queue a request on its endpoint. The outcome arrives on the
    /// receiver returned by the `PendingRequest` constructor.
    pub fn submit(&self, request: PendingRequest) {
        if let Err(mpsc::error::SendError(SchedulerMsg::Submit(request))) =
            self.inner.tx.send(SchedulerMsg::Submit(request))
        {
            request.reject(CoreError::SchedulerStopped);
        }
    }

    /// Exchange credentials for an API key.
    pub async fn key_gen(
        &self,
        url: &Url,
        user: &str,
        password: &SecretString,
    ) -> Result<SecretString, CoreError> {
        let (request, rx) = PendingRequest::key_gen(url.clone(), user, password.clone());
        self.submit(request);
        request::await_reply(rx).await
    }

    /// Run an operational command against an appliance.
    pub async fn op(
        &self,
        url: &Url,
        api_key: &SecretString,
        serial: &str,
        command: &str,
        vsys: Option<&str>,
    ) -> Result<ApiElement, CoreError> {
        let (request, rx) = PendingRequest::op(
            url.clone(),
            api_key.clone(),
            serial,
            command,
            vsys.map(str::to_owned),
        );
        self.submit(request);
        request::await_reply(rx).await
    }

    /// Fetch configuration from an appliance.
    pub async fn config_get(
        &self,
        url: &Url,
        api_key: &SecretString,
        serial: &str,
        xpath: &str,
    ) -> Result<ApiElement, CoreError> {
        let (request, rx) = PendingRequest::config(url.clone(), api_key.clone(), serial, xpath);
        self.submit(request);
        request::await_reply(rx).await
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Drop queued requests on `endpoint` matching `predicate`. In-flight
    /// requests are not interrupted. Returns how many were dropped; their
    /// submitters observe [`CoreError::Canceled`].
    pub async fn cancel_matching<F>(&self, endpoint: &Url, predicate: F) -> usize
    where
        F: Fn(&PendingRequest) -> bool + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let msg = SchedulerMsg::Cancel {
            endpoint: endpoint_key(endpoint),
            predicate: Box::new(predicate),
            reply,
        };
        if self.inner.tx.send(msg).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Drop every queued request belonging to `serial`.
    pub async fn cancel_queued_for_appliance(&self, url: &Url, serial: &str) -> usize {
        let serial = serial.to_owned();
        self.cancel_matching(url, move |r| r.serial() == Some(serial.as_str()))
            .await
    }

    // ── Observation ──────────────────────────────────────────────

    /// Queue depth per endpoint with pending or running work.
    pub async fn stats(&self) -> BTreeMap<String, EndpointStats> {
        let (reply, rx) = oneshot::channel();
        if self.inner.tx.send(SchedulerMsg::Stats { reply }).is_err() {
            return BTreeMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the scheduler task. Queued requests resolve with
    /// `SchedulerStopped`; in-flight calls run to completion.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self
            .inner
            .handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// ── Scheduler task ───────────────────────────────────────────────

#[derive(Default)]
struct Endpoint {
    /// Stack: push and pop at the back.
    pending: Vec<PendingRequest>,
    in_flight: BTreeSet<u64>,
}

struct SchedulerTask {
    endpoints: HashMap<String, Endpoint>,
    next_id: u64,
    transport: Arc<dyn Transport>,
    config: watch::Receiver<PollingConfig>,
    completions: mpsc::WeakUnboundedSender<SchedulerMsg>,
}

impl SchedulerTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerMsg>, cancel: CancellationToken) {
        let mut config_open = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                }
                changed = self.config.changed(), if config_open => {
                    // A closed config channel keeps the last snapshot.
                    config_open = changed.is_ok();
                }
            }
            self.schedule();
        }

        rx.close();
        while let Ok(msg) = rx.try_recv() {
            if let SchedulerMsg::Submit(request) = msg {
                request.reject(CoreError::SchedulerStopped);
            }
        }
        for endpoint in self.endpoints.into_values() {
            for request in endpoint.pending {
                request.reject(CoreError::SchedulerStopped);
            }
        }
        debug!("request scheduler stopped");
    }

    fn handle(&mut self, msg: SchedulerMsg) {
        match msg {
            SchedulerMsg::Submit(request) => {
                let key = endpoint_key(request.url());
                trace!(endpoint = %key, kind = %request.kind(), "request queued");
                self.endpoints.entry(key).or_default().pending.push(request);
            }
            SchedulerMsg::Cancel {
                endpoint,
                predicate,
                reply,
            } => {
                let dropped = self.cancel_matching(&endpoint, predicate.as_ref());
                let _ = reply.send(dropped);
            }
            SchedulerMsg::Completed { endpoint, id } => {
                if let Some(ep) = self.endpoints.get_mut(&endpoint) {
                    ep.in_flight.remove(&id);
                }
            }
            SchedulerMsg::Stats { reply } => {
                let stats = self
                    .endpoints
                    .iter()
                    .map(|(key, ep)| {
                        let stats = EndpointStats {
                            queued: ep.pending.len(),
                            in_flight: ep.in_flight.len(),
                        };
                        (key.clone(), stats)
                    })
                    .collect();
                let _ = reply.send(stats);
            }
        }
    }

    fn cancel_matching(
        &mut self,
        endpoint: &str,
        predicate: &(dyn Fn(&PendingRequest) -> bool + Send),
    ) -> usize {
        let Some(ep) = self.endpoints.get_mut(endpoint) else {
            return 0;
        };

        let (dropped, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut ep.pending).into_iter().partition(predicate);
        ep.pending = kept;

        let count = dropped.len();
        for request in dropped {
            request.reject(CoreError::Canceled);
        }
        if count > 0 {
            debug!(endpoint, count, "dropped queued requests");
        }
        count
    }

    /// One scheduling pass over every endpoint.
    fn schedule(&mut self) {
        let (limit, timeout) = {
            let config = self.config.borrow();
            (config.max_running(), config.request_timeout())
        };

        for (key, ep) in &mut self.endpoints {
            while ep.in_flight.len() < limit {
                let Some(request) = ep.pending.pop() else {
                    break;
                };
                if request.is_abandoned() {
                    trace!(endpoint = %key, "skipping abandoned request");
                    continue;
                }

                let id = self.next_id;
                self.next_id += 1;
                ep.in_flight.insert(id);

                let Some(completions) = self.completions.upgrade() else {
                    request.reject(CoreError::SchedulerStopped);
                    ep.in_flight.remove(&id);
                    continue;
                };
                let transport = Arc::clone(&self.transport);
                let endpoint = key.clone();
                trace!(endpoint = %endpoint, id, kind = %request.kind(), "dispatching");

                tokio::spawn(async move {
                    request.dispatch(transport.as_ref(), timeout).await;
                    let _ = completions.send(SchedulerMsg::Completed { endpoint, id });
                });
            }
        }

        self.endpoints
            .retain(|_, ep| !ep.pending.is_empty() || !ep.in_flight.is_empty());
    }
}
