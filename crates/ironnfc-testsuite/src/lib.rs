//! Scripted mock provider and reader backend for the integration tests.
//!
//! A [`MockBackend`] replays canned APDU exchanges: the test scripts
//! `expect(frame) -> response` pairs, the backend matches incoming
//! transmissions against them in any order and records everything it saw.
//! The paired [`MockHandle`] drives the status stream (card insertion,
//! removal, reader end) the way a real provider would.

use core::fmt;
use core::future::Future;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ironnfc::{
    BackendEvent, CardState, Disposition, Protocol, Protocols, Provider, ProviderEvent, Reader, ReaderBackend,
    ReaderEvent, ReaderOptions, ShareMode, Vendor,
};
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockError(pub String);

impl MockError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MockError {}

#[derive(Debug)]
struct Exchange {
    expect: Vec<u8>,
    response: Result<Vec<u8>, MockError>,
}

#[derive(Debug)]
struct MockState {
    name: String,
    connect_results: Mutex<VecDeque<Result<Protocol, MockError>>>,
    disconnect_results: Mutex<VecDeque<Result<(), MockError>>>,
    exchanges: Mutex<Vec<Exchange>>,
    transmitted: Mutex<Vec<Vec<u8>>>,
    controls: Mutex<Vec<(Vec<u8>, u32)>>,
    status_tx: mpsc::UnboundedSender<BackendEvent<MockError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted reader backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Arc<MockState>,
}

/// Test-side handle to a [`MockBackend`]: scripting and status driving.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> (Self, MockHandle, mpsc::UnboundedReceiver<BackendEvent<MockError>>) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let state = Arc::new(MockState {
            name: name.into(),
            connect_results: Mutex::new(VecDeque::new()),
            disconnect_results: Mutex::new(VecDeque::new()),
            exchanges: Mutex::new(Vec::new()),
            transmitted: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            status_tx,
        });

        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
            status_rx,
        )
    }
}

impl MockHandle {
    /// Scripts one `frame -> response bytes` exchange.
    pub fn expect(&self, frame: impl Into<Vec<u8>>, response: impl Into<Vec<u8>>) {
        lock(&self.state.exchanges).push(Exchange {
            expect: frame.into(),
            response: Ok(response.into()),
        });
    }

    /// Scripts a provider-level transmit failure for `frame`.
    pub fn expect_failure(&self, frame: impl Into<Vec<u8>>, message: &str) {
        lock(&self.state.exchanges).push(Exchange {
            expect: frame.into(),
            response: Err(MockError::new(message)),
        });
    }

    /// Queues a connect outcome; connects succeed with T=1 once the queue
    /// is empty.
    pub fn push_connect_result(&self, result: Result<Protocol, MockError>) {
        lock(&self.state.connect_results).push_back(result);
    }

    pub fn push_disconnect_result(&self, result: Result<(), MockError>) {
        lock(&self.state.disconnect_results).push_back(result);
    }

    pub fn status(&self, state: CardState, atr: Option<Vec<u8>>) {
        let _ = self
            .state
            .status_tx
            .send(BackendEvent::Status(ironnfc::StatusChange { state, atr }));
    }

    pub fn insert_card(&self, atr: Option<Vec<u8>>) {
        self.status(CardState::PRESENT | CardState::INUSE, atr);
    }

    pub fn remove_card(&self) {
        self.status(CardState::EMPTY, None);
    }

    pub fn reader_error(&self, message: &str) {
        let _ = self.state.status_tx.send(BackendEvent::Error(MockError::new(message)));
    }

    pub fn end(&self) {
        let _ = self.state.status_tx.send(BackendEvent::End);
    }

    /// Every frame transmitted so far, in arrival order.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        lock(&self.state.transmitted).clone()
    }

    /// Every control command sent so far as `(data, control code)`.
    pub fn controls(&self) -> Vec<(Vec<u8>, u32)> {
        lock(&self.state.controls).clone()
    }

    /// Exchanges scripted but never consumed.
    pub fn outstanding_exchanges(&self) -> usize {
        lock(&self.state.exchanges).len()
    }
}

impl ReaderBackend for MockBackend {
    type Error = MockError;

    fn name(&self) -> &str {
        &self.state.name
    }

    fn connect(&self, _mode: ShareMode, _protocols: Protocols) -> impl Future<Output = Result<Protocol, Self::Error>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            tokio::task::yield_now().await;
            lock(&state.connect_results).pop_front().unwrap_or(Ok(Protocol::T1))
        }
    }

    fn disconnect(&self, _disposition: Disposition) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            tokio::task::yield_now().await;
            lock(&state.disconnect_results).pop_front().unwrap_or(Ok(()))
        }
    }

    fn transmit(
        &self,
        data: &[u8],
        _max_response_len: usize,
        _protocol: Protocol,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send {
        let state = Arc::clone(&self.state);
        let data = data.to_vec();

        async move {
            // Force a suspension point so concurrent callers interleave the
            // way they do against a real provider.
            tokio::task::yield_now().await;

            lock(&state.transmitted).push(data.clone());

            let mut exchanges = lock(&state.exchanges);
            match exchanges.iter().position(|exchange| exchange.expect == data) {
                Some(index) => exchanges.remove(index).response,
                None => Err(MockError::new(format!("unexpected apdu: {}", hex::encode(&data)))),
            }
        }
    }

    fn control(
        &self,
        data: &[u8],
        control_code: u32,
        _max_response_len: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send {
        let state = Arc::clone(&self.state);
        let data = data.to_vec();

        async move {
            tokio::task::yield_now().await;
            lock(&state.controls).push((data, control_code));
            Ok(Vec::new())
        }
    }

    fn close(&self) {
        let _ = self.state.status_tx.send(BackendEvent::End);
    }
}

/// Scripted provider for the adapter tests.
pub struct MockProvider {
    rx: mpsc::UnboundedReceiver<ProviderEvent<MockBackend, MockError>>,
}

#[derive(Clone)]
pub struct MockProviderHandle {
    tx: mpsc::UnboundedSender<ProviderEvent<MockBackend, MockError>>,
}

impl MockProvider {
    pub fn new() -> (Self, MockProviderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, MockProviderHandle { tx })
    }
}

impl MockProviderHandle {
    /// Attaches a new reader and returns its scripting handle.
    pub fn attach_reader(&self, name: &str) -> MockHandle {
        let (backend, handle, status) = MockBackend::new(name);

        let _ = self.tx.send(ProviderEvent::ReaderAttached { backend, status });

        handle
    }

    pub fn provider_error(&self, message: &str) {
        let _ = self.tx.send(ProviderEvent::Error(MockError::new(message)));
    }
}

impl Provider for MockProvider {
    type Backend = MockBackend;
    type Error = MockError;

    fn next_event(&mut self) -> impl Future<Output = Option<ProviderEvent<Self::Backend, Self::Error>>> + Send {
        self.rx.recv()
    }
}

/// Launches a reader over a fresh mock backend.
pub fn launch_reader(name: &str, options: ReaderOptions) -> (Reader<MockBackend>, MockHandle) {
    let (backend, handle, status) = MockBackend::new(name);
    let vendor = Vendor::detect(name);
    let reader = Reader::launch(backend, status, vendor, options);

    (reader, handle)
}

/// Awaits the next reader event, with a deadline so a missing emission
/// fails the test instead of hanging it.
pub async fn next_event(events: &mut broadcast::Receiver<ReaderEvent>) -> ReaderEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a reader event")
        .expect("event stream closed")
}

/// An ATR whose byte 5 flags a 14443-3 tag.
pub fn atr_14443_3() -> Vec<u8> {
    vec![0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06]
}

/// An ATR that routes to the 14443-4 path.
pub fn atr_14443_4() -> Vec<u8> {
    vec![0x3B, 0x8A, 0x80, 0x01, 0x00, 0x31, 0xC1, 0x73, 0xC8, 0x40, 0x00, 0x00]
}
