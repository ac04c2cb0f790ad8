//! Card descriptors and tag standard detection.

use core::fmt;

/// Predicate deciding the tag standard from an ATR.
pub type StandardPredicate = fn(&[u8]) -> TagStandard;

/// Tag standard the dispatcher routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagStandard {
    Iso14443_3,
    Iso14443_4,
}

impl TagStandard {
    /// Default detection heuristic: ATR byte 5 equal to `0x4F` means a
    /// 14443-3 tag, anything else a 14443-4 one.
    ///
    /// This is loose (byte 5 being `0x4F` only indicates a registered
    /// application provider in the historical bytes) but matches what the
    /// targeted readers report in practice. Swap in your own
    /// [`StandardPredicate`] via `ReaderOptions` when it misfires.
    pub fn detect(atr: &[u8]) -> Self {
        if atr.len() > 5 && atr[5] == 0x4F {
            Self::Iso14443_3
        } else {
            Self::Iso14443_4
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iso14443_3 => "TAG_ISO_14443_3",
            Self::Iso14443_4 => "TAG_ISO_14443_4",
        }
    }
}

impl fmt::Display for TagStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient descriptor of the card currently in the field.
///
/// Created on insertion, destroyed on removal. Events carry snapshot clones
/// of this value, never shared mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Card {
    /// Answer-To-Reset reported by the provider, when available.
    pub atr: Option<Vec<u8>>,
    /// Standard derived from the ATR, when available.
    pub standard: Option<TagStandard>,
    /// Lowercase hex UID, populated by successful 14443-3 processing.
    pub uid: Option<String>,
    /// SELECT response payload, populated by successful 14443-4 processing.
    pub data: Option<Vec<u8>>,
}

impl Card {
    pub(crate) fn from_atr(atr: Option<Vec<u8>>, predicate: StandardPredicate) -> Self {
        let standard = atr.as_deref().map(predicate);

        Self {
            atr,
            standard,
            uid: None,
            data: None,
        }
    }

    /// String mirror of [`Card::standard`] for external consumers.
    pub fn kind(&self) -> Option<&'static str> {
        self.standard.map(TagStandard::as_str)
    }
}
