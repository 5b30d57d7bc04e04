// ── Test doubles ──
//
// `MockTransport` answers from canned responses and can hold calls at a
// gate until the test releases them, which makes in-flight counts
// observable. `RecordingSink` keeps every appended sample.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panwatch_api::ApiElement;
use secrecy::SecretString;
use tokio::sync::{Notify, oneshot};
use url::Url;

use crate::error::CoreError;
use crate::model::{SampleCategory, StoredSample};
use crate::scheduler::RequestKind;
use crate::sink::SampleSink;
use crate::transport::Transport;

/// One call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub url: Url,
    pub kind: RequestKind,
    /// Command, xpath or username, depending on `kind`.
    pub target: String,
    pub vsys: Option<String>,
}

#[derive(Default)]
struct MockState {
    ops: HashMap<String, Result<ApiElement, CoreError>>,
    configs: HashMap<String, Result<ApiElement, CoreError>>,
    api_key: Option<Result<SecretString, CoreError>>,
    calls: Vec<MockCall>,
    gated: bool,
    gates: VecDeque<oneshot::Sender<()>>,
    delay: Option<Duration>,
}

/// Scriptable [`Transport`].
///
/// Unscripted commands answer with an empty `<result/>`.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    changed: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ────────────────────────────────────────────────

    pub fn on_op(&self, command: &str, response: Result<ApiElement, CoreError>) {
        self.state().ops.insert(command.to_owned(), response);
    }

    /// Answer `command` with a parsed XML `<result>` element.
    pub fn on_op_xml(&self, command: &str, xml: &str) -> Result<(), CoreError> {
        let element = ApiElement::parse(xml)?;
        self.on_op(command, Ok(element));
        Ok(())
    }

    pub fn on_config(&self, xpath: &str, response: Result<ApiElement, CoreError>) {
        self.state().configs.insert(xpath.to_owned(), response);
    }

    pub fn on_key_gen(&self, response: Result<SecretString, CoreError>) {
        self.state().api_key = Some(response);
    }

    /// Hold every subsequent call until [`release`](Self::release).
    pub fn gate(&self) {
        self.state().gated = true;
    }

    /// Stop gating new calls and release every held one.
    pub fn open(&self) {
        let gates = {
            let mut state = self.state();
            state.gated = false;
            std::mem::take(&mut state.gates)
        };
        for gate in gates {
            let _ = gate.send(());
        }
    }

    /// Release up to `n` held calls, oldest first. Returns how many of
    /// them were still waiting.
    pub fn release(&self, n: usize) -> usize {
        let mut released = 0;
        let mut state = self.state();
        while released < n {
            let Some(gate) = state.gates.pop_front() else {
                break;
            };
            if gate.send(()).is_ok() {
                released += 1;
            }
        }
        released
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Calls held at the gate right now.
    pub fn waiting(&self) -> usize {
        self.state().gates.iter().filter(|g| !g.is_closed()).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently running calls seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have arrived.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Wait until exactly `n` calls are held at the gate.
    pub async fn wait_for_waiting(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.waiting() == n {
                return;
            }
            notified.await;
        }
    }

    // ── Call path ────────────────────────────────────────────────

    async fn respond<T>(
        &self,
        call: MockCall,
        answer: impl FnOnce(&MockState) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let (gate, delay) = {
            let mut state = self.state();
            state.calls.push(call);
            let gate = if state.gated {
                let (tx, rx) = oneshot::channel();
                state.gates.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (gate, state.delay)
        };

        let _running = InFlight::enter(self);
        self.changed.notify_waiters();

        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        answer(&self.state())
    }
}

/// In-flight accounting that also covers calls dropped by a timeout.
struct InFlight<'a> {
    transport: &'a MockTransport,
}

impl<'a> InFlight<'a> {
    fn enter(transport: &'a MockTransport) -> Self {
        let now = transport.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        transport.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { transport }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.transport.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.transport.changed.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn key_exchange(
        &self,
        url: &Url,
        user: &str,
        _password: &SecretString,
        _timeout: Option<Duration>,
    ) -> Result<SecretString, CoreError> {
        let call = MockCall {
            url: url.clone(),
            kind: RequestKind::KeyGen,
            target: user.to_owned(),
            vsys: None,
        };
        self.respond(call, |state| {
            state
                .api_key
                .clone()
                .unwrap_or_else(|| Ok(SecretString::from("mock-api-key")))
        })
        .await
    }

    async fn call(
        &self,
        url: &Url,
        _api_key: &SecretString,
        command: &str,
        vsys: Option<&str>,
        _timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError> {
        let call = MockCall {
            url: url.clone(),
            kind: RequestKind::Op,
            target: command.to_owned(),
            vsys: vsys.map(str::to_owned),
        };
        self.respond(call, |state| {
            state
                .ops
                .get(command)
                .cloned()
                .unwrap_or_else(|| Ok(ApiElement::new("result")))
        })
        .await
    }

    async fn config_fetch(
        &self,
        url: &Url,
        _api_key: &SecretString,
        xpath: &str,
        _timeout: Option<Duration>,
    ) -> Result<ApiElement, CoreError> {
        let call = MockCall {
            url: url.clone(),
            kind: RequestKind::Config,
            target: xpath.to_owned(),
            vsys: None,
        };
        self.respond(call, |state| {
            state
                .configs
                .get(xpath)
                .cloned()
                .unwrap_or_else(|| Ok(ApiElement::new("result")))
        })
        .await
    }
}

// ── RecordingSink ────────────────────────────────────────────────

/// [`SampleSink`] that keeps every record and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<StoredSample>>,
    failing: Mutex<Option<String>>,
    appended: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append with `message` until cleared with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = message.map(str::to_owned);
    }

    pub fn records(&self) -> Vec<StoredSample> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` records were appended.
    pub async fn wait_for(&self, n: usize) {
        loop {
            let notified = self.appended.notified();
            if self.len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    async fn append(&self, record: StoredSample) -> Result<(), CoreError> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(message) = failing {
            return Err(CoreError::Sink { message });
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        self.appended.notify_waiters();
        Ok(())
    }

    async fn read_recent(
        &self,
        serial: &str,
        category: SampleCategory,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredSample>, CoreError> {
        Ok(self
            .records()
            .into_iter()
            .filter(|r| r.serial == serial && r.category == category && r.timestamp >= since)
            .collect())
    }
}
