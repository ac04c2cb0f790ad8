//! Typed multicast event surface.
//!
//! Events fan out over broadcast channels: every subscriber gets every
//! event emitted after it subscribed, in emission order.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::backend::ReaderBackend;
use crate::card::Card;
use crate::reader::Reader;
use crate::ReaderError;

/// Lifecycle events of one reader.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    /// A card was inserted (and, with auto-processing, processed).
    Card(Card),
    /// The card left the field. Carries the last known snapshot.
    CardRemoved(Card),
    /// A failure inside the reader's status handling.
    Error(Arc<ReaderError>),
    /// The reader went away; this is the final event.
    End,
}

/// Top-level events of the provider adapter.
pub enum NfcEvent<B: ReaderBackend> {
    Reader(Reader<B>),
    Error(Arc<ReaderError>),
}

impl<B: ReaderBackend> Clone for NfcEvent<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Reader(reader) => Self::Reader(reader.clone()),
            Self::Error(e) => Self::Error(Arc::clone(e)),
        }
    }
}

impl<B: ReaderBackend> core::fmt::Debug for NfcEvent<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Reader(reader) => f.debug_tuple("Reader").field(&reader.name()).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Multicast sender that tolerates having no subscriber.
#[derive(Debug)]
pub(crate) struct EventSender<T>(broadcast::Sender<T>);

impl<T: Clone> EventSender<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self(tx)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<T> {
        self.0.subscribe()
    }

    pub(crate) fn emit(&self, event: T) {
        // A send error only means nobody is listening right now.
        let _ = self.0.send(event);
    }
}
