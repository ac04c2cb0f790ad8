//! MIFARE Classic key management and authentication.
//!
//! Loaded keys live in the reader's two volatile key slots. Concurrent
//! loads of the same key are coalesced: the first caller issues the Load
//! Authentication Key exchange, everyone else awaits the same shared
//! future.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::Shared;
use futures_util::FutureExt as _;
use ironnfc_apdu::{Authenticate, KeyType, LoadAuthenticationKey, Response, MIFARE_KEY_LENGTH};

use crate::backend::ReaderBackend;
use crate::reader::{lock, Reader};
use crate::{ReaderError, ReaderErrorExt as _, ReaderResult, ReaderResultExt as _};

/// The targeted readers expose two volatile key slots.
pub const KEY_SLOTS: usize = 2;

/// A 6-byte MIFARE Classic key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MifareKey([u8; MIFARE_KEY_LENGTH]);

impl MifareKey {
    pub const fn new(bytes: [u8; MIFARE_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parses a 12-digit hex string.
    pub fn from_hex(hex_str: &str) -> ReaderResult<Self> {
        let bytes = hex::decode(hex_str).map_err(|_| ReaderError::invalid_key("mifare key"))?;
        Self::try_from(bytes.as_slice())
    }

    /// Canonical lowercase hex form, the pending-load table key.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; MIFARE_KEY_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for MifareKey {
    type Error = ReaderError;

    fn try_from(bytes: &[u8]) -> ReaderResult<Self> {
        <[u8; MIFARE_KEY_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ReaderError::invalid_key("mifare key"))
    }
}

impl TryFrom<Vec<u8>> for MifareKey {
    type Error = ReaderError;

    fn try_from(bytes: Vec<u8>) -> ReaderResult<Self> {
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&str> for MifareKey {
    type Error = ReaderError;

    fn try_from(hex_str: &str) -> ReaderResult<Self> {
        Self::from_hex(hex_str)
    }
}

impl From<[u8; MIFARE_KEY_LENGTH]> for MifareKey {
    fn from(bytes: [u8; MIFARE_KEY_LENGTH]) -> Self {
        Self(bytes)
    }
}

// Keys are credentials; keep them out of logs.
impl fmt::Debug for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MifareKey(REDACTED)")
    }
}

/// Fixed-size table of the keys currently loaded into the reader slots.
#[derive(Debug, Default)]
pub(crate) struct KeyStorage {
    slots: [Option<MifareKey>; KEY_SLOTS],
}

impl KeyStorage {
    /// With a key: the slot holding that key. With `None`: the first empty
    /// slot.
    pub(crate) fn find_slot(&self, key: Option<&MifareKey>) -> Option<u8> {
        let position = match key {
            Some(key) => self.slots.iter().position(|slot| slot.as_ref() == Some(key)),
            None => self.slots.iter().position(Option::is_none),
        };

        position.map(|index| index as u8)
    }

    pub(crate) fn store(&mut self, slot: u8, key: MifareKey) {
        self.slots[usize::from(slot)] = Some(key);
    }
}

type KeyLoadFuture = Pin<Box<dyn Future<Output = Result<u8, Arc<ReaderError>>> + Send>>;

/// In-flight key load, awaitable from multiple callers.
pub(crate) type SharedKeyLoad = Shared<KeyLoadFuture>;

/// Removes the pending-load entry when the initiator settles, including on
/// cancellation.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, SharedKeyLoad>>,
    key_hex: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.key_hex);
    }
}

enum LoadRole {
    Initiator(SharedKeyLoad),
    Awaiter(SharedKeyLoad),
}

impl<B: ReaderBackend> Reader<B> {
    /// Loads `key` into the reader key slot `slot` (0 or 1).
    ///
    /// Returns the slot on success and records the key so later
    /// [`Reader::authenticate`] calls reuse it.
    pub async fn load_authentication_key(&self, slot: u8, key: MifareKey) -> ReaderResult<u8> {
        if usize::from(slot) >= KEY_SLOTS {
            return Err(ReaderError::invalid_key_number("load authentication key", slot));
        }

        let frame = LoadAuthenticationKey {
            slot,
            key: *key.as_bytes(),
        }
        .to_bytes();

        let raw = self.transmit(&frame, 2).await.with_context("load authentication key")?;

        Response::parse("load authentication key", &raw)
            .and_then(|response| response.expect_success("load authentication key"))
            .map_err(ReaderError::apdu)?;

        lock(&self.inner.keys).store(slot, key);

        debug!(reader = %self.name(), slot, "authentication key loaded");

        Ok(slot)
    }

    /// Authenticates `block` with `key`, loading the key into a slot first
    /// when necessary.
    ///
    /// `obsolete` selects the PC/SC V2.01 authenticate frame for older
    /// firmwares.
    pub async fn authenticate(&self, block: u8, key_type: KeyType, key: MifareKey, obsolete: bool) -> ReaderResult<()> {
        let loaded = { lock(&self.inner.keys).find_slot(Some(&key)) };

        let slot = match loaded {
            Some(slot) => slot,
            None => self.load_key_coalesced(key).await?,
        };

        let frame = Authenticate {
            block,
            key_type,
            slot,
            obsolete,
        }
        .to_bytes();

        let raw = self.transmit(&frame, 2).await.with_context("authenticate")?;

        Response::parse("authenticate", &raw)
            .and_then(|response| response.expect_success("authenticate"))
            .map_err(ReaderError::apdu)?;

        debug!(reader = %self.name(), block, ?key_type, slot, "authenticated");

        Ok(())
    }

    /// Loads `key` into a slot, deduplicating concurrent loads of the same
    /// key through the pending-load table.
    async fn load_key_coalesced(&self, key: MifareKey) -> ReaderResult<u8> {
        let key_hex = key.to_hex();

        // Slot 0 is the overwrite victim when every slot is taken.
        let target = lock(&self.inner.keys).find_slot(None).unwrap_or(0);

        let role = {
            let mut pending = lock(&self.inner.pending_loads);

            match pending.get(&key_hex) {
                Some(load) => LoadRole::Awaiter(load.clone()),
                None => {
                    let this = self.clone();
                    let fut: KeyLoadFuture =
                        Box::pin(async move { this.load_authentication_key(target, key).await.map_err(Arc::new) });
                    let load = fut.shared();
                    pending.insert(key_hex.clone(), load.clone());
                    LoadRole::Initiator(load)
                }
            }
        };

        let loaded = match role {
            LoadRole::Initiator(load) => {
                let _guard = PendingGuard {
                    pending: &self.inner.pending_loads,
                    key_hex: &key_hex,
                };
                load.await
            }
            LoadRole::Awaiter(load) => load.await,
        };

        loaded.map_err(|e| ReaderError::unable_to_load_key("authenticate", e))
    }
}
