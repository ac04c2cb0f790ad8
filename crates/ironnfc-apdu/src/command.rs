//! Command APDU builders.
//!
//! The frames follow the pseudo-APDU conventions of PC/SC contactless
//! readers (ACS ACR122U API and compatibles): class `FF` commands are
//! handled by the reader itself, class `00` SELECT is forwarded to the card.

/// Proprietary class byte routing a command to the reader.
pub const CLA_PROPRIETARY: u8 = 0xFF;

/// Standard ISO/IEC 7816-4 class byte.
pub const CLA_STANDARD: u8 = 0x00;

/// MIFARE Classic keys are always 6 bytes.
pub const MIFARE_KEY_LENGTH: usize = 6;

/// MIFARE Classic key type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyType {
    A = 0x60,
    B = 0x61,
}

impl KeyType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Load Authentication Key: stores a 6-byte MIFARE key into a volatile
/// reader key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadAuthenticationKey {
    pub slot: u8,
    pub key: [u8; MIFARE_KEY_LENGTH],
}

impl LoadAuthenticationKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(5 + MIFARE_KEY_LENGTH);
        frame.extend_from_slice(&[
            CLA_PROPRIETARY,
            0x82,
            0x00,
            self.slot,
            MIFARE_KEY_LENGTH as u8,
        ]);
        frame.extend_from_slice(&self.key);
        frame
    }
}

/// General Authenticate: authenticates a block against a previously loaded
/// key slot.
///
/// `obsolete` selects the PC/SC V2.01 frame some older firmwares expect
/// instead of the V2.07 one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticate {
    pub block: u8,
    pub key_type: KeyType,
    pub slot: u8,
    pub obsolete: bool,
}

impl Authenticate {
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.obsolete {
            vec![
                CLA_PROPRIETARY,
                0x88,
                0x00,
                self.block,
                self.key_type.as_u8(),
                self.slot,
            ]
        } else {
            vec![
                CLA_PROPRIETARY,
                0x86,
                0x00,
                0x00,
                0x05,
                0x01, // version
                0x00,
                self.block,
                self.key_type.as_u8(),
                self.slot,
            ]
        }
    }
}

/// Read Binary: reads `length` bytes starting at `block`.
///
/// The class byte is configurable; some tags want a different one than the
/// proprietary `FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBinary {
    pub class: u8,
    pub block: u16,
    pub length: u8,
}

impl ReadBinary {
    pub fn to_bytes(&self) -> Vec<u8> {
        let [high, low] = self.block.to_be_bytes();
        vec![self.class, 0xB0, high, low, self.length]
    }
}

/// Update Binary: writes one block of data at `block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBinary<'a> {
    pub block: u8,
    pub data: &'a [u8],
}

impl UpdateBinary<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(5 + self.data.len());
        frame.extend_from_slice(&[CLA_PROPRIETARY, 0xD6, 0x00, self.block, self.data.len() as u8]);
        frame.extend_from_slice(self.data);
        frame
    }
}

/// Get Data (UID): retrieves the ISO/IEC 14443-3 UID of the card in field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetUid;

impl GetUid {
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![CLA_PROPRIETARY, 0xCA, 0x00, 0x00, 0x00]
    }
}

/// SELECT (by AID): selects an ISO/IEC 14443-4 application on the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectAid<'a> {
    pub aid: &'a [u8],
}

impl SelectAid<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(6 + self.aid.len());
        frame.extend_from_slice(&[CLA_STANDARD, 0xA4, 0x04, 0x00, self.aid.len() as u8]);
        frame.extend_from_slice(self.aid);
        frame.push(0x00); // Le
        frame
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn load_authentication_key_layout() {
        let frame = LoadAuthenticationKey {
            slot: 0,
            key: [0xFF; 6],
        }
        .to_bytes();

        assert_eq!(frame, [0xFF, 0x82, 0x00, 0x00, 0x06, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn load_authentication_key_slot_in_p2() {
        let frame = LoadAuthenticationKey {
            slot: 1,
            key: [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
        }
        .to_bytes();

        assert_eq!(frame[3], 0x01);
        assert_eq!(&frame[5..], [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
    }

    #[test]
    fn authenticate_v2_07_layout() {
        let frame = Authenticate {
            block: 4,
            key_type: KeyType::A,
            slot: 0,
            obsolete: false,
        }
        .to_bytes();

        assert_eq!(frame, [0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, 0x04, 0x60, 0x00]);
    }

    #[test]
    fn authenticate_v2_01_layout() {
        let frame = Authenticate {
            block: 4,
            key_type: KeyType::B,
            slot: 1,
            obsolete: true,
        }
        .to_bytes();

        assert_eq!(frame, [0xFF, 0x88, 0x00, 0x04, 0x61, 0x01]);
    }

    #[rstest]
    #[case(0x0000, 16, [0xFF, 0xB0, 0x00, 0x00, 0x10])]
    #[case(0x0004, 16, [0xFF, 0xB0, 0x00, 0x04, 0x10])]
    #[case(0x0102, 4, [0xFF, 0xB0, 0x01, 0x02, 0x04])]
    fn read_binary_layout(#[case] block: u16, #[case] length: u8, #[case] expected: [u8; 5]) {
        let frame = ReadBinary {
            class: CLA_PROPRIETARY,
            block,
            length,
        }
        .to_bytes();

        assert_eq!(frame, expected);
    }

    #[test]
    fn read_binary_custom_class() {
        let frame = ReadBinary {
            class: 0x00,
            block: 4,
            length: 16,
        }
        .to_bytes();

        assert_eq!(frame[0], 0x00);
    }

    #[test]
    fn update_binary_layout() {
        let frame = UpdateBinary {
            block: 1,
            data: &[0xDE, 0xAD, 0xBE, 0xEF],
        }
        .to_bytes();

        assert_eq!(frame, [0xFF, 0xD6, 0x00, 0x01, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn get_uid_layout() {
        assert_eq!(GetUid.to_bytes(), [0xFF, 0xCA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn select_aid_layout() {
        let aid = [0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let frame = SelectAid { aid: &aid }.to_bytes();

        assert_eq!(
            frame,
            [0x00, 0xA4, 0x04, 0x00, 0x07, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00]
        );
    }
}
