//! Response APDU validation.

use core::fmt;

use crate::{ApduError, ApduErrorExt as _, ApduResult};

/// Two-byte big-endian trailer of every response APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    /// Normal processing, no further qualification.
    pub const SUCCESS: Self = Self(0x9000);

    /// File or application not found (e.g. SELECT with an unknown AID).
    pub const FILE_NOT_FOUND: Self = Self(0x6A82);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

impl From<u16> for StatusWord {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// A parsed response APDU: payload plus trailing status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Vec<u8>,
    status: StatusWord,
}

impl Response {
    /// Splits a raw response into payload and status word.
    ///
    /// Fails when the buffer is too short to carry the two-byte trailer.
    pub fn parse(context: &'static str, raw: &[u8]) -> ApduResult<Self> {
        let Some(split) = raw.len().checked_sub(2) else {
            return Err(ApduError::response_too_short(context, raw.len()));
        };

        let status = StatusWord::new(u16::from_be_bytes([raw[split], raw[split + 1]]));

        Ok(Self {
            payload: raw[..split].to_vec(),
            status,
        })
    }

    pub fn status(&self) -> StatusWord {
        self.status
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Enforces a `0x9000` status and hands out the payload.
    pub fn into_payload(self, context: &'static str) -> ApduResult<Vec<u8>> {
        if self.status.is_success() {
            Ok(self.payload)
        } else {
            Err(ApduError::operation_failed(context, self.status))
        }
    }

    /// Enforces a `0x9000` status, discarding the payload.
    pub fn expect_success(&self, context: &'static str) -> ApduResult<()> {
        if self.status.is_success() {
            Ok(())
        } else {
            Err(ApduError::operation_failed(context, self.status))
        }
    }
}
