//! Provider adapter: reader enumeration and vendor classification.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::backend::{Provider, ProviderEvent, ReaderBackend};
use crate::event::{EventSender, NfcEvent};
use crate::reader::{Reader, ReaderOptions};
use crate::{ReaderError, ReaderErrorExt as _};

/// Reader vendor family, detected from the reader name.
///
/// Only classification lives here; vendor-specific command suites (LED,
/// buzzer, PICC parameters) are built on top of the base [`Reader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Generic,
    /// ACS ACR122-family readers (including ACR125 derivatives).
    Acr122,
}

impl Vendor {
    pub fn detect(name: &str) -> Self {
        let name = name.to_lowercase();

        if name.contains("acr122") || name.contains("acr125") {
            Self::Acr122
        } else {
            Self::Generic
        }
    }
}

/// Entry point: watches the provider for readers and hands out [`Reader`]
/// handles over the event stream.
pub struct Nfc<B: ReaderBackend> {
    events: Arc<EventSender<NfcEvent<B>>>,
}

impl<B: ReaderBackend> Nfc<B> {
    /// Starts watching `provider` on the current Tokio runtime. Every
    /// attached reader is launched with `options`.
    pub fn start<P>(provider: P, options: ReaderOptions) -> Self
    where
        P: Provider<Backend = B>,
    {
        let events = Arc::new(EventSender::new());

        tokio::spawn(run_provider(provider, Arc::clone(&events), options));

        Self { events }
    }

    /// Subscribes to reader attachment and provider error events.
    pub fn events(&self) -> broadcast::Receiver<NfcEvent<B>> {
        self.events.subscribe()
    }
}

async fn run_provider<P: Provider>(
    mut provider: P,
    events: Arc<EventSender<NfcEvent<P::Backend>>>,
    options: ReaderOptions,
) {
    while let Some(event) = provider.next_event().await {
        match event {
            ProviderEvent::ReaderAttached { backend, status } => {
                let vendor = Vendor::detect(backend.name());

                debug!(reader = %backend.name(), ?vendor, "reader attached");

                let reader = Reader::launch(backend, status, vendor, options);
                events.emit(NfcEvent::Reader(reader));
            }
            ProviderEvent::Error(e) => {
                warn!(error = %e, "provider error");
                events.emit(NfcEvent::Error(Arc::new(ReaderError::failure("provider", e))));
            }
        }
    }

    debug!("provider closed");
}
