#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod backend;
mod block;
mod card;
mod context;
mod event;
mod mifare;
mod process;
mod reader;

use core::fmt;

use ironnfc_apdu::ApduError;

pub use self::backend::{
    ioctl_ccid_escape, scard_ctl_code, BackendEvent, CardState, Disposition, Protocol, Protocols, Provider,
    ProviderEvent, ReaderBackend, ShareMode, StatusChange,
};
pub use self::block::ReadOptions;
pub use self::card::{Card, StandardPredicate, TagStandard};
pub use self::context::{Nfc, Vendor};
pub use self::event::{NfcEvent, ReaderEvent};
pub use self::mifare::{MifareKey, KEY_SLOTS};
pub use self::process::{Aid, AidResolver};
pub use self::reader::{ConnectMode, Connection, Reader, ReaderOptions, ReaderPhase};
pub use ironnfc_apdu::KeyType;

pub type ReaderResult<T> = Result<T, ReaderError>;

pub type ReaderError = ironnfc_error::Error<ReaderErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum ReaderErrorKind {
    /// The provider reported an error; it is attached as the source.
    Failure,
    /// The operation requires an open connection.
    NotConnected,
    /// The operation requires both a card in the field and an open connection.
    CardNotConnected,
    /// The raw connect mode does not map to any known share mode.
    InvalidMode { got: u32 },
    /// MIFARE keys are exactly 6 bytes.
    InvalidKey,
    /// The reader only has key slots 0 and 1.
    InvalidKeyNumber { got: u8 },
    /// Write data must be a positive multiple of the block size.
    InvalidDataLength { len: usize, block_size: usize },
    /// Loading the authentication key failed; the load error is the source.
    UnableToLoadKey,
    /// SELECT returned file-not-found for this AID.
    NotCompatible { aid: String },
    /// Wire-level failure (short response or non-success status word).
    Apdu(ApduError),
    Reason(String),
    /// The provider surfaced an error outside any operation; it is attached
    /// as the source.
    Unknown,
}

impl fmt::Display for ReaderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure => write!(f, "provider failure"),
            Self::NotConnected => write!(f, "reader is not connected"),
            Self::CardNotConnected => write!(f, "card is not connected"),
            Self::InvalidMode { got } => write!(f, "invalid connect mode ({got:#x})"),
            Self::InvalidKey => write!(f, "key must be exactly 6 bytes"),
            Self::InvalidKeyNumber { got } => write!(f, "invalid key slot ({got})"),
            Self::InvalidDataLength { len, block_size } => {
                write!(
                    f,
                    "data length {len} must be a non-zero multiple of block size {block_size}"
                )
            }
            Self::UnableToLoadKey => write!(f, "unable to load authentication key"),
            Self::NotCompatible { aid } => write!(f, "tag not compatible with AID {aid}"),
            Self::Apdu(_) => write!(f, "APDU error"),
            Self::Reason(description) => write!(f, "reason: {description}"),
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

impl std::error::Error for ReaderErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Apdu(e) => Some(e),
            _ => None,
        }
    }
}

pub trait ReaderErrorExt {
    fn failure<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
    fn not_connected(context: &'static str) -> Self;
    fn card_not_connected(context: &'static str) -> Self;
    fn invalid_mode(context: &'static str, got: u32) -> Self;
    fn invalid_key(context: &'static str) -> Self;
    fn invalid_key_number(context: &'static str, got: u8) -> Self;
    fn invalid_data_length(context: &'static str, len: usize, block_size: usize) -> Self;
    fn unable_to_load_key<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
    fn not_compatible(context: &'static str, aid: String) -> Self;
    fn apdu(error: ApduError) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn unknown<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl ReaderErrorExt for ReaderError {
    fn failure<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ReaderErrorKind::Failure).with_source(source)
    }

    fn not_connected(context: &'static str) -> Self {
        Self::new(context, ReaderErrorKind::NotConnected)
    }

    fn card_not_connected(context: &'static str) -> Self {
        Self::new(context, ReaderErrorKind::CardNotConnected)
    }

    fn invalid_mode(context: &'static str, got: u32) -> Self {
        Self::new(context, ReaderErrorKind::InvalidMode { got })
    }

    fn invalid_key(context: &'static str) -> Self {
        Self::new(context, ReaderErrorKind::InvalidKey)
    }

    fn invalid_key_number(context: &'static str, got: u8) -> Self {
        Self::new(context, ReaderErrorKind::InvalidKeyNumber { got })
    }

    fn invalid_data_length(context: &'static str, len: usize, block_size: usize) -> Self {
        Self::new(context, ReaderErrorKind::InvalidDataLength { len, block_size })
    }

    fn unable_to_load_key<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ReaderErrorKind::UnableToLoadKey).with_source(source)
    }

    fn not_compatible(context: &'static str, aid: String) -> Self {
        Self::new(context, ReaderErrorKind::NotCompatible { aid })
    }

    fn apdu(error: ApduError) -> Self {
        Self::new(error.context, ReaderErrorKind::Apdu(error))
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, ReaderErrorKind::Reason(reason.into()))
    }

    fn unknown<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ReaderErrorKind::Unknown).with_source(source)
    }
}

pub trait ReaderResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
    #[must_use]
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl<T> ReaderResultExt for ReaderResult<T> {
    fn with_context(self, context: &'static str) -> Self {
        self.map_err(|mut e| {
            e.context = context;
            e
        })
    }

    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        self.map_err(|e| e.with_source(source))
    }
}
