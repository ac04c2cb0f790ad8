//! Tag dispatching: UID acquisition and AID selection.

use ironnfc::{Aid, ReaderErrorKind, ReaderEvent, ReaderOptions, TagStandard};
use ironnfc_testsuite::{atr_14443_3, atr_14443_4, launch_reader, next_event};

const GET_UID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];
const SELECT_TEST_AID: [u8; 13] = [
    0x00, 0xA4, 0x04, 0x00, 0x07, 0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00,
];

#[tokio::test]
async fn iso_14443_3_card_gets_a_uid() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    handle.expect(GET_UID, [0x04, 0xA1, 0xB2, 0xC3, 0x90, 0x00]);
    handle.insert_card(Some(atr_14443_3()));

    let ReaderEvent::Card(card) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    assert_eq!(card.standard, Some(TagStandard::Iso14443_3));
    assert_eq!(card.kind(), Some("TAG_ISO_14443_3"));
    assert_eq!(card.uid.as_deref(), Some("04a1b2c3"));
    assert_eq!(card.data, None);
}

#[tokio::test]
async fn uid_failure_is_emitted_as_an_error() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    handle.expect(GET_UID, [0x63, 0x00]);
    handle.insert_card(Some(atr_14443_3()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "get uid");
    assert!(err.report().to_string().contains("0x6300"));
}

#[tokio::test]
async fn truncated_uid_response_is_an_invalid_response() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    handle.expect(GET_UID, [0x90]);
    handle.insert_card(Some(atr_14443_3()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "get uid");
    assert!(matches!(err.kind(), ReaderErrorKind::Apdu(_)));
}

#[tokio::test]
async fn iso_14443_4_card_is_selected_by_aid() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::from_hex("F0010203040506").unwrap());

    handle.expect(SELECT_TEST_AID, [0x11, 0x22, 0x33, 0x44, 0x90, 0x00]);
    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Card(card) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    assert_eq!(card.standard, Some(TagStandard::Iso14443_4));
    assert_eq!(card.data.as_deref(), Some([0x11, 0x22, 0x33, 0x44].as_slice()));
    assert_eq!(card.uid, None);
}

#[tokio::test]
async fn file_not_found_names_the_aid_in_uppercase_hex() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::from_hex("f0010203040506").unwrap());

    handle.expect(SELECT_TEST_AID, [0x6A, 0x82]);
    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert!(matches!(err.kind(), ReaderErrorKind::NotCompatible { .. }));
    assert!(err.to_string().contains("F0010203040506"));
}

#[tokio::test]
async fn other_select_statuses_are_operation_failures() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::from_hex("F0010203040506").unwrap());

    handle.expect(SELECT_TEST_AID, [0x62, 0x83]);
    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "select aid");
    assert!(err.report().to_string().contains("0x6283"));
}

#[tokio::test]
async fn missing_aid_is_an_error_event() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "select aid");
    assert!(err.to_string().contains("AID"));
}

#[tokio::test]
async fn dynamic_aid_is_resolved_against_the_card_snapshot() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::dynamic(|card| {
        assert_eq!(card.standard, Some(TagStandard::Iso14443_4));
        Ok(vec![0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06])
    }));

    handle.expect(SELECT_TEST_AID, [0xAB, 0x90, 0x00]);
    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Card(card) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    assert_eq!(card.data.as_deref(), Some([0xAB].as_slice()));
}

#[tokio::test]
async fn failing_aid_resolver_is_an_error_event() {
    use ironnfc::{ReaderError, ReaderErrorExt as _};

    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::dynamic(|_card| {
        Err(ReaderError::reason("aid", "no application for this card"))
    }));

    handle.insert_card(Some(atr_14443_4()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "select aid");
    assert!(err.to_string().contains("no application for this card"));
}

#[tokio::test]
async fn card_without_atr_takes_the_14443_4_path() {
    let (reader, handle) = launch_reader("test reader", ReaderOptions::default());
    let mut events = reader.events();

    reader.set_aid(Aid::from_hex("F0010203040506").unwrap());

    handle.expect(SELECT_TEST_AID, [0x90, 0x00]);
    handle.insert_card(None);

    let ReaderEvent::Card(card) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    assert_eq!(card.standard, None);
    assert_eq!(card.data.as_deref(), Some([].as_slice()));
}

#[tokio::test]
async fn manual_processing_leaves_the_card_untouched() {
    let options = ReaderOptions {
        auto_processing: false,
        ..ReaderOptions::default()
    };
    let (reader, handle) = launch_reader("test reader", options);
    let mut events = reader.events();

    handle.insert_card(Some(atr_14443_3()));

    let ReaderEvent::Card(card) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    assert_eq!(card.uid, None);
    assert_eq!(card.data, None);
    // No dispatcher ran: nothing was transmitted.
    assert!(handle.transmitted().is_empty());

    // The consumer drives the card itself.
    handle.expect(GET_UID, [0x04, 0xAA, 0xBB, 0xCC, 0x90, 0x00]);
    assert_eq!(reader.get_uid().await.unwrap(), "04aabbcc");
}
