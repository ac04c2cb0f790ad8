#![cfg_attr(doc, doc = include_str!("../README.md"))]

use core::fmt;

mod command;
mod response;

pub use self::command::{
    Authenticate, GetUid, KeyType, LoadAuthenticationKey, ReadBinary, SelectAid, UpdateBinary, CLA_PROPRIETARY,
    CLA_STANDARD, MIFARE_KEY_LENGTH,
};
pub use self::response::{Response, StatusWord};

pub type ApduResult<T> = Result<T, ApduError>;

pub type ApduError = ironnfc_error::Error<ApduErrorKind>;

#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum ApduErrorKind {
    /// The response is too short to carry a status word.
    ResponseTooShort { len: usize },
    /// The response status word is not `0x9000`.
    OperationFailed { status: StatusWord },
}

impl std::error::Error for ApduErrorKind {}

impl fmt::Display for ApduErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseTooShort { len } => {
                write!(f, "invalid response: {len} bytes is too short for a status word")
            }
            Self::OperationFailed { status } => {
                write!(f, "operation failed (status {status})")
            }
        }
    }
}

pub trait ApduErrorExt {
    fn response_too_short(context: &'static str, len: usize) -> Self;
    fn operation_failed(context: &'static str, status: StatusWord) -> Self;
}

impl ApduErrorExt for ApduError {
    fn response_too_short(context: &'static str, len: usize) -> Self {
        Self::new(context, ApduErrorKind::ResponseTooShort { len })
    }

    fn operation_failed(context: &'static str, status: StatusWord) -> Self {
        Self::new(context, ApduErrorKind::OperationFailed { status })
    }
}
