//! Provider capability consumed by the core.
//!
//! The PC/SC layer is kept behind two traits: [`Provider`] surfaces reader
//! attachment, [`ReaderBackend`] covers the per-reader operations. Values
//! and constants mirror the ones every PC/SC implementation exposes
//! (WinSCard, pcsclite, the Apple framework), so an FFI-backed
//! implementation is a thin mapping.

use core::future::Future;

use bitflags::bitflags;
use tokio::sync::mpsc;

bitflags! {
    /// Reader state mask as reported by status change notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CardState: u32 {
        const IGNORE = 0x0001;
        const CHANGED = 0x0002;
        const UNKNOWN = 0x0004;
        const UNAVAILABLE = 0x0008;
        const EMPTY = 0x0010;
        const PRESENT = 0x0020;
        const ATRMATCH = 0x0040;
        const EXCLUSIVE = 0x0080;
        const INUSE = 0x0100;
        const MUTE = 0x0200;
        const UNPOWERED = 0x0400;
    }
}

/// How a connection to a reader is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareMode {
    Exclusive,
    Shared,
    Direct,
}

impl ShareMode {
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Exclusive => 1,
            Self::Shared => 2,
            Self::Direct => 3,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Exclusive),
            2 => Some(Self::Shared),
            3 => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Disposition applied to the card when disconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    LeaveCard,
    ResetCard,
    UnpowerCard,
    EjectCard,
}

bitflags! {
    /// Protocols acceptable to the caller when connecting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protocols: u32 {
        const T0 = 0x0001;
        const T1 = 0x0002;
    }
}

impl Default for Protocols {
    /// Let the provider negotiate either protocol.
    fn default() -> Self {
        Self::T0 | Self::T1
    }
}

/// Negotiated transmission protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    T0,
    T1,
}

impl Protocol {
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::T0 => 0x0001,
            Self::T1 => 0x0002,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x0001 => Some(Self::T0),
            0x0002 => Some(Self::T1),
            _ => None,
        }
    }
}

/// `SCARD_CTL_CODE(code)` with the platform-dependent encoding.
pub const fn scard_ctl_code(code: u32) -> u32 {
    if cfg!(windows) {
        (0x31 << 16) | (code << 2)
    } else {
        0x4200_0000 + code
    }
}

/// Control code for CCID escape commands.
///
/// Windows reserves function 3500 for the CCID escape IOCTL; pcsclite uses
/// function 1.
pub const fn ioctl_ccid_escape() -> u32 {
    if cfg!(windows) {
        scard_ctl_code(3500)
    } else {
        scard_ctl_code(1)
    }
}

/// One status change notification for a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub state: CardState,
    pub atr: Option<Vec<u8>>,
}

/// Stream item produced by a reader backend.
#[derive(Debug)]
pub enum BackendEvent<E> {
    Status(StatusChange),
    Error(E),
    /// The reader went away; no further events follow.
    End,
}

/// Per-reader operations of the provider.
///
/// Async methods return `Send` futures so reader monitors can be spawned on
/// a multi-threaded runtime; implementations wrap whatever completion style
/// the underlying provider has (callbacks, blocking calls, …).
pub trait ReaderBackend: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Opens a connection and returns the negotiated protocol.
    fn connect(&self, mode: ShareMode, protocols: Protocols) -> impl Future<Output = Result<Protocol, Self::Error>> + Send;

    fn disconnect(&self, disposition: Disposition) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sends a command APDU to the card and returns the raw response,
    /// bounded by `max_response_len`.
    fn transmit(
        &self,
        data: &[u8],
        max_response_len: usize,
        protocol: Protocol,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;

    /// Sends a direct control command to the reader.
    fn control(
        &self,
        data: &[u8],
        control_code: u32,
        max_response_len: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;

    /// Releases the backend; the status stream ends after this.
    fn close(&self);
}

/// Top-level provider event.
pub enum ProviderEvent<B: ReaderBackend, E> {
    /// A reader appeared. `status` carries its status change stream.
    ReaderAttached {
        backend: B,
        status: mpsc::UnboundedReceiver<BackendEvent<B::Error>>,
    },
    Error(E),
}

/// Reader enumeration surface of the provider.
pub trait Provider: Send + 'static {
    type Backend: ReaderBackend;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for the next provider event; `None` once the provider is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<ProviderEvent<Self::Backend, Self::Error>>> + Send;
}
