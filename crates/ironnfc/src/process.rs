//! Tag processing: 14443-3 UID acquisition and 14443-4 AID selection.

use core::fmt;
use std::sync::Arc;

use ironnfc_apdu::{GetUid, Response, SelectAid, StatusWord};

use crate::backend::ReaderBackend;
use crate::card::{Card, TagStandard};
use crate::reader::{lock, Reader};
use crate::{ReaderError, ReaderErrorExt as _, ReaderResult, ReaderResultExt as _};

/// Largest Get UID response: triple-size UIDs are 10 bytes, plus the
/// status word.
const GET_UID_RESPONSE_LEN: usize = 12;

/// Largest SELECT response accepted.
const SELECT_RESPONSE_LEN: usize = 40;

/// Resolver producing an AID from the current card snapshot.
pub type AidResolver = dyn Fn(&Card) -> ReaderResult<Vec<u8>> + Send + Sync;

/// Application identifier used by 14443-4 processing.
#[derive(Clone)]
pub enum Aid {
    /// Literal AID bytes.
    Fixed(Vec<u8>),
    /// Resolved per card at dispatch time.
    Dynamic(Arc<AidResolver>),
}

impl Aid {
    /// Decodes and validates a hex string.
    pub fn from_hex(hex_str: &str) -> ReaderResult<Self> {
        let bytes =
            hex::decode(hex_str).map_err(|e| ReaderError::reason("aid", format!("invalid AID hex string: {e}")))?;

        Ok(Self::Fixed(bytes))
    }

    pub fn fixed(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Fixed(bytes.into())
    }

    pub fn dynamic<F>(resolver: F) -> Self
    where
        F: Fn(&Card) -> ReaderResult<Vec<u8>> + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(resolver))
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(bytes) => f.debug_tuple("Fixed").field(&hex::encode_upper(bytes)).finish(),
            Self::Dynamic(_) => f.debug_tuple("Dynamic").field(&"..").finish(),
        }
    }
}

impl<B: ReaderBackend> Reader<B> {
    /// Routes the freshly connected card to the standard-specific
    /// processing and returns the enriched snapshot.
    pub(crate) async fn process_card(&self, standard: Option<TagStandard>) -> ReaderResult<Card> {
        match standard {
            Some(TagStandard::Iso14443_3) => self.process_iso_14443_3().await,
            _ => self.process_iso_14443_4().await,
        }
    }

    /// Retrieves the ISO/IEC 14443-3 UID of the card as lowercase hex.
    pub async fn get_uid(&self) -> ReaderResult<String> {
        let raw = self
            .transmit(&GetUid.to_bytes(), GET_UID_RESPONSE_LEN)
            .await
            .with_context("get uid")?;

        let payload = Response::parse("get uid", &raw)
            .and_then(|response| response.into_payload("get uid"))
            .map_err(ReaderError::apdu)?;

        Ok(hex::encode(payload))
    }

    async fn process_iso_14443_3(&self) -> ReaderResult<Card> {
        let uid = self.get_uid().await?;

        debug!(reader = %self.name(), %uid, "uid acquired");

        let mut session = lock(&self.inner.session);
        match session.card.as_mut() {
            Some(card) => {
                card.uid = Some(uid);
                Ok(card.clone())
            }
            None => Err(ReaderError::card_not_connected("get uid")),
        }
    }

    async fn process_iso_14443_4(&self) -> ReaderResult<Card> {
        let snapshot = self
            .card()
            .ok_or_else(|| ReaderError::card_not_connected("select aid"))?;

        let aid = lock(&self.inner.aid).clone();

        let aid = match aid {
            None => {
                return Err(ReaderError::reason(
                    "select aid",
                    "no AID configured for 14443-4 processing",
                ))
            }
            Some(Aid::Fixed(bytes)) => bytes,
            Some(Aid::Dynamic(resolver)) => resolver(&snapshot).with_context("select aid")?,
        };

        let frame = SelectAid { aid: &aid }.to_bytes();

        let raw = self
            .transmit(&frame, SELECT_RESPONSE_LEN)
            .await
            .with_context("select aid")?;

        let response = Response::parse("select aid", &raw).map_err(ReaderError::apdu)?;

        if response.status() == StatusWord::FILE_NOT_FOUND {
            return Err(ReaderError::not_compatible("select aid", hex::encode_upper(&aid)));
        }

        let payload = response.into_payload("select aid").map_err(ReaderError::apdu)?;

        debug!(reader = %self.name(), aid = %hex::encode_upper(&aid), "application selected");

        let mut session = lock(&self.inner.session);
        match session.card.as_mut() {
            Some(card) => {
                card.data = Some(payload);
                Ok(card.clone())
            }
            None => Err(ReaderError::card_not_connected("select aid")),
        }
    }
}
