//! Reader sessions and the per-reader state machine.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};

use crate::backend::{
    ioctl_ccid_escape, BackendEvent, CardState, Disposition, Protocol, Protocols, ReaderBackend, ShareMode,
};
use crate::card::{Card, StandardPredicate, TagStandard};
use crate::context::Vendor;
use crate::event::{EventSender, ReaderEvent};
use crate::mifare::KeyStorage;
use crate::process::Aid;
use crate::{ReaderError, ReaderErrorExt as _, ReaderResult};

/// How [`Reader::connect`] opens the provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectMode {
    /// Direct connection to the reader, card not required.
    Direct,
    /// Shared connection to the card.
    Card,
}

impl ConnectMode {
    /// Maps a raw provider share constant to a connect mode.
    pub fn from_raw(raw: u32) -> ReaderResult<Self> {
        match ShareMode::from_raw(raw) {
            Some(ShareMode::Direct) => Ok(Self::Direct),
            Some(ShareMode::Shared) => Ok(Self::Card),
            _ => Err(ReaderError::invalid_mode("connect", raw)),
        }
    }

    pub(crate) const fn share_mode(self) -> ShareMode {
        match self {
            Self::Direct => ShareMode::Direct,
            Self::Card => ShareMode::Shared,
        }
    }
}

/// An open provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub share_mode: ShareMode,
    pub protocol: Protocol,
}

/// Lifecycle phase of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    /// No card in the field.
    Idle,
    /// Card present, connection not yet open.
    CardInserted,
    /// Connection open.
    Connected,
    /// The tag dispatcher is running.
    Processing,
    /// The reader went away. Terminal.
    Ended,
}

impl ReaderPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CardInserted => "CardInserted",
            Self::Connected => "Connected",
            Self::Processing => "Processing",
            Self::Ended => "Ended",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Reader behavior configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Run the tag dispatcher automatically on insertion. When disabled the
    /// `card` event carries the bare snapshot and the consumer drives the
    /// card through [`Reader::transmit`].
    pub auto_processing: bool,
    /// Tag standard detection, defaults to [`TagStandard::detect`].
    pub standard_predicate: StandardPredicate,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            auto_processing: true,
            standard_predicate: TagStandard::detect,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) card: Option<Card>,
    pub(crate) connection: Option<Connection>,
    pub(crate) phase: SessionPhase,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    #[default]
    Idle,
    CardInserted,
    Connected,
    Processing,
    Ended,
}

impl From<SessionPhase> for ReaderPhase {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Idle => Self::Idle,
            SessionPhase::CardInserted => Self::CardInserted,
            SessionPhase::Connected => Self::Connected,
            SessionPhase::Processing => Self::Processing,
            SessionPhase::Ended => Self::Ended,
        }
    }
}

pub(crate) struct ReaderInner<B: ReaderBackend> {
    pub(crate) backend: B,
    pub(crate) name: String,
    pub(crate) vendor: Vendor,
    pub(crate) auto_processing: AtomicBool,
    pub(crate) standard_predicate: StandardPredicate,
    pub(crate) aid: Mutex<Option<Aid>>,
    pub(crate) session: Mutex<Session>,
    pub(crate) keys: Mutex<KeyStorage>,
    pub(crate) pending_loads: Mutex<HashMap<String, crate::mifare::SharedKeyLoad>>,
    pub(crate) events: EventSender<ReaderEvent>,
}

/// Handle to one reader.
///
/// Cheap to clone; all clones observe the same session, key storage and
/// event stream. The reader's state machine runs on its own task, driven by
/// the backend status stream.
pub struct Reader<B: ReaderBackend> {
    pub(crate) inner: Arc<ReaderInner<B>>,
}

impl<B: ReaderBackend> Clone for Reader<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ReaderBackend> fmt::Debug for Reader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.inner.name)
            .field("vendor", &self.inner.vendor)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<B: ReaderBackend> fmt::Display for Reader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl<B: ReaderBackend> Reader<B> {
    /// Builds the reader and spawns its monitor task on the current Tokio
    /// runtime.
    pub fn launch(
        backend: B,
        status: mpsc::UnboundedReceiver<BackendEvent<B::Error>>,
        vendor: Vendor,
        options: ReaderOptions,
    ) -> Self {
        let name = backend.name().to_owned();

        let reader = Self {
            inner: Arc::new(ReaderInner {
                backend,
                name,
                vendor,
                auto_processing: AtomicBool::new(options.auto_processing),
                standard_predicate: options.standard_predicate,
                aid: Mutex::new(None),
                session: Mutex::new(Session::default()),
                keys: Mutex::new(KeyStorage::default()),
                pending_loads: Mutex::new(HashMap::new()),
                events: EventSender::new(),
            }),
        };

        tokio::spawn(run_monitor(reader.clone(), status));

        reader
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn vendor(&self) -> Vendor {
        self.inner.vendor
    }

    pub fn phase(&self) -> ReaderPhase {
        lock(&self.inner.session).phase.into()
    }

    /// Snapshot of the card currently in the field.
    pub fn card(&self) -> Option<Card> {
        lock(&self.inner.session).card.clone()
    }

    pub fn auto_processing(&self) -> bool {
        self.inner.auto_processing.load(Ordering::Relaxed)
    }

    pub fn set_auto_processing(&self, enabled: bool) {
        self.inner.auto_processing.store(enabled, Ordering::Relaxed);
    }

    /// Configures the AID used by 14443-4 processing.
    pub fn set_aid(&self, aid: Aid) {
        *lock(&self.inner.aid) = Some(aid);
    }

    pub fn clear_aid(&self) {
        *lock(&self.inner.aid) = None;
    }

    /// Subscribes to this reader's lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ReaderEvent> {
        self.inner.events.subscribe()
    }

    /// Releases the backend. The status stream ends afterwards and the
    /// monitor emits the final `end` event.
    pub fn close(&self) {
        self.inner.backend.close();
    }

    /// Opens a provider connection, letting the provider pick the protocol.
    pub async fn connect(&self, mode: ConnectMode) -> ReaderResult<()> {
        self.connect_with(mode, Protocols::default()).await
    }

    /// Opens a provider connection restricted to `protocols`.
    pub async fn connect_with(&self, mode: ConnectMode, protocols: Protocols) -> ReaderResult<()> {
        let share_mode = mode.share_mode();

        let protocol = self
            .inner
            .backend
            .connect(share_mode, protocols)
            .await
            .map_err(|e| ReaderError::failure("connect", e))?;

        debug!(reader = %self.inner.name, ?share_mode, ?protocol, "connected");

        lock(&self.inner.session).connection = Some(Connection { share_mode, protocol });

        Ok(())
    }

    /// Closes the provider connection, leaving the card as-is.
    pub async fn disconnect(&self) -> ReaderResult<()> {
        if lock(&self.inner.session).connection.is_none() {
            return Err(ReaderError::not_connected("disconnect"));
        }

        self.inner
            .backend
            .disconnect(Disposition::LeaveCard)
            .await
            .map_err(|e| ReaderError::failure("disconnect", e))?;

        debug!(reader = %self.inner.name, "disconnected");

        lock(&self.inner.session).connection = None;

        Ok(())
    }

    /// Sends a command APDU to the card and returns the raw response.
    ///
    /// Requires both a card in the field and an open connection.
    pub async fn transmit(&self, data: &[u8], max_response_len: usize) -> ReaderResult<Vec<u8>> {
        let protocol = {
            let session = lock(&self.inner.session);
            match (&session.card, &session.connection) {
                (Some(_), Some(connection)) => connection.protocol,
                _ => return Err(ReaderError::card_not_connected("transmit")),
            }
        };

        trace!(reader = %self.inner.name, data = %hex::encode(data), "transmit");

        self.inner
            .backend
            .transmit(data, max_response_len, protocol)
            .await
            .map_err(|e| ReaderError::failure("transmit", e))
    }

    /// Sends a direct CCID escape command to the reader.
    ///
    /// Requires an open connection; a card is not required (connect in
    /// [`ConnectMode::Direct`] to talk to an empty reader).
    pub async fn control(&self, data: &[u8], max_response_len: usize) -> ReaderResult<Vec<u8>> {
        if lock(&self.inner.session).connection.is_none() {
            return Err(ReaderError::not_connected("control"));
        }

        trace!(reader = %self.inner.name, data = %hex::encode(data), "control");

        self.inner
            .backend
            .control(data, ioctl_ccid_escape(), max_response_len)
            .await
            .map_err(|e| ReaderError::failure("control", e))
    }

    pub(crate) fn emit(&self, event: ReaderEvent) {
        self.inner.events.emit(event);
    }

    pub(crate) fn emit_error(&self, error: ReaderError) {
        self.inner.events.emit(ReaderEvent::Error(Arc::new(error)));
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        lock(&self.inner.session).phase = phase;
    }

    async fn on_card_inserted(&self, atr: Option<Vec<u8>>) {
        debug!(reader = %self.inner.name, atr = ?atr.as_deref().map(hex::encode), "card inserted");

        let card = Card::from_atr(atr, self.inner.standard_predicate);
        let standard = card.standard;

        {
            let mut session = lock(&self.inner.session);
            session.card = Some(card);
            session.phase = SessionPhase::CardInserted;
        }

        if let Err(e) = self.connect(ConnectMode::Card).await {
            warn!(reader = %self.inner.name, error = %e, "auto-connect failed");
            self.emit_error(e);
            return;
        }

        self.set_phase(SessionPhase::Connected);

        if !self.auto_processing() {
            if let Some(snapshot) = self.card() {
                self.emit(ReaderEvent::Card(snapshot));
            }
            return;
        }

        self.set_phase(SessionPhase::Processing);
        let outcome = self.process_card(standard).await;
        self.set_phase(SessionPhase::Connected);

        match outcome {
            Ok(snapshot) => self.emit(ReaderEvent::Card(snapshot)),
            Err(e) => {
                warn!(reader = %self.inner.name, error = %e, "card processing failed");
                self.emit_error(e);
            }
        }
    }

    async fn on_card_removed(&self) {
        let (prior, connected) = {
            let mut session = lock(&self.inner.session);
            let prior = session.card.take();
            session.phase = SessionPhase::Idle;
            (prior, session.connection.is_some())
        };

        if let Some(card) = prior {
            debug!(reader = %self.inner.name, "card removed");
            self.emit(ReaderEvent::CardRemoved(card));
        }

        if connected {
            if let Err(e) = self.disconnect().await {
                warn!(reader = %self.inner.name, error = %e, "disconnect after removal failed");
                self.emit_error(e);
            }
        }
    }

    fn on_end(&self) {
        {
            let mut session = lock(&self.inner.session);
            if session.phase == SessionPhase::Ended {
                return;
            }
            session.phase = SessionPhase::Ended;
        }

        debug!(reader = %self.inner.name, "reader removed");
        self.emit(ReaderEvent::End);
    }
}

/// Drives one reader's state machine from its backend status stream.
///
/// Insertion and removal are edge-triggered: a bit matters when it rose in
/// the XOR against the previous mask *and* is set in the new one.
async fn run_monitor<B: ReaderBackend>(reader: Reader<B>, mut status: mpsc::UnboundedReceiver<BackendEvent<B::Error>>) {
    let mut previous = CardState::empty();

    while let Some(event) = status.recv().await {
        match event {
            BackendEvent::Status(change) => {
                let changes = previous ^ change.state;
                debug!(reader = %reader.inner.name, state = ?change.state, ?changes, "status change");

                if changes.contains(CardState::EMPTY) && change.state.contains(CardState::EMPTY) {
                    reader.on_card_removed().await;
                } else if changes.contains(CardState::PRESENT) && change.state.contains(CardState::PRESENT) {
                    reader.on_card_inserted(change.atr).await;
                }

                previous = change.state;
            }
            BackendEvent::Error(e) => {
                // Status stream errors happen outside any operation, so
                // there is nothing more specific to classify them as.
                reader.emit_error(ReaderError::unknown("reader", e));
            }
            BackendEvent::End => break,
        }
    }

    reader.on_end();
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReaderErrorKind;

    #[test]
    fn connect_mode_from_raw_maps_share_constants() {
        assert_eq!(ConnectMode::from_raw(2).unwrap(), ConnectMode::Card);
        assert_eq!(ConnectMode::from_raw(3).unwrap(), ConnectMode::Direct);
    }

    #[test]
    fn connect_mode_from_raw_rejects_unknown() {
        let err = ConnectMode::from_raw(9).unwrap_err();

        assert_eq!(err.context, "connect");
        assert!(matches!(err.kind(), ReaderErrorKind::InvalidMode { got: 9 }));
    }

    #[test]
    fn phase_names() {
        assert_eq!(ReaderPhase::Idle.name(), "Idle");
        assert_eq!(ReaderPhase::Processing.name(), "Processing");
        assert!(!ReaderPhase::Connected.is_terminal());
        assert!(ReaderPhase::Ended.is_terminal());
    }
}
