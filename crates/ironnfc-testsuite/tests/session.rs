//! Connection lifecycle, transmit/control preconditions and the reader
//! state machine.

use ironnfc::{ioctl_ccid_escape, ConnectMode, ReaderErrorKind, ReaderEvent, ReaderOptions, ReaderPhase};
use ironnfc_testsuite::{atr_14443_3, launch_reader, next_event, MockError};

fn manual_options() -> ReaderOptions {
    ReaderOptions {
        auto_processing: false,
        ..ReaderOptions::default()
    }
}

#[tokio::test]
async fn insertion_connects_and_emits_card() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.insert_card(Some(atr_14443_3()));

    let card = match next_event(&mut events).await {
        ReaderEvent::Card(card) => card,
        other => panic!("expected a card event, got {other:?}"),
    };

    assert_eq!(card.atr, Some(atr_14443_3()));
    assert_eq!(card.kind(), Some("TAG_ISO_14443_3"));
    assert_eq!(card.uid, None);
    assert_eq!(reader.phase(), ReaderPhase::Connected);
}

#[tokio::test]
async fn removal_emits_card_off_and_disconnects() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.insert_card(Some(atr_14443_3()));
    let ReaderEvent::Card(inserted) = next_event(&mut events).await else {
        panic!("expected a card event");
    };

    handle.remove_card();

    let ReaderEvent::CardRemoved(removed) = next_event(&mut events).await else {
        panic!("expected a card.off event");
    };

    assert_eq!(removed, inserted);
    assert_eq!(reader.phase(), ReaderPhase::Idle);
    assert_eq!(reader.card(), None);

    // The prior card is gone: card-level operations must fail fast.
    let err = reader.transmit(&[0x00], 2).await.unwrap_err();
    assert_eq!(err.context, "transmit");
    assert!(matches!(err.kind(), ReaderErrorKind::CardNotConnected));
}

#[tokio::test]
async fn card_off_precedes_next_card() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.insert_card(Some(atr_14443_3()));
    handle.remove_card();
    handle.insert_card(Some(atr_14443_3()));

    assert!(matches!(next_event(&mut events).await, ReaderEvent::Card(_)));
    assert!(matches!(next_event(&mut events).await, ReaderEvent::CardRemoved(_)));
    assert!(matches!(next_event(&mut events).await, ReaderEvent::Card(_)));
}

#[tokio::test]
async fn auto_connect_failure_is_emitted_not_thrown() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.push_connect_result(Err(MockError::new("sharing violation")));
    handle.insert_card(Some(atr_14443_3()));

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "connect");
    assert!(matches!(err.kind(), ReaderErrorKind::Failure));
}

#[tokio::test]
async fn end_is_emitted_once() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.end();

    assert!(matches!(next_event(&mut events).await, ReaderEvent::End));
    assert_eq!(reader.phase(), ReaderPhase::Ended);
    assert!(reader.phase().is_terminal());
}

#[tokio::test]
async fn close_ends_the_reader() {
    let (reader, _handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    reader.close();

    assert!(matches!(next_event(&mut events).await, ReaderEvent::End));
}

#[tokio::test]
async fn backend_errors_are_forwarded_as_unknown() {
    let (reader, handle) = launch_reader("test reader", manual_options());
    let mut events = reader.events();

    handle.reader_error("reader unavailable");

    let ReaderEvent::Error(err) = next_event(&mut events).await else {
        panic!("expected an error event");
    };

    assert_eq!(err.context, "reader");
    assert!(matches!(err.kind(), ReaderErrorKind::Unknown));
    assert!(err.report().to_string().contains("reader unavailable"));
}

#[tokio::test]
async fn direct_connect_allows_control_without_card() {
    let (reader, handle) = launch_reader("test reader", manual_options());

    reader.connect(ConnectMode::Direct).await.unwrap();
    reader.control(&[0x01, 0x02], 64).await.unwrap();

    let controls = handle.controls();
    assert_eq!(controls.len(), 1);
    assert_eq!(controls[0].0, [0x01, 0x02]);
    assert_eq!(controls[0].1, ioctl_ccid_escape());
}

#[tokio::test]
async fn control_requires_a_connection() {
    let (reader, _handle) = launch_reader("test reader", manual_options());

    let err = reader.control(&[0x01], 64).await.unwrap_err();

    assert_eq!(err.context, "control");
    assert!(matches!(err.kind(), ReaderErrorKind::NotConnected));
}

#[tokio::test]
async fn transmit_requires_card_and_connection() {
    let (reader, _handle) = launch_reader("test reader", manual_options());

    // Connected in direct mode, but no card in the field.
    reader.connect(ConnectMode::Direct).await.unwrap();

    let err = reader.transmit(&[0x00], 2).await.unwrap_err();
    assert!(matches!(err.kind(), ReaderErrorKind::CardNotConnected));
}

#[tokio::test]
async fn disconnect_without_connection_fails() {
    let (reader, _handle) = launch_reader("test reader", manual_options());

    let err = reader.disconnect().await.unwrap_err();

    assert_eq!(err.context, "disconnect");
    assert!(matches!(err.kind(), ReaderErrorKind::NotConnected));
}

#[tokio::test]
async fn connect_failure_wraps_the_provider_error() {
    let (reader, handle) = launch_reader("test reader", manual_options());

    handle.push_connect_result(Err(MockError::new("no service")));

    let err = reader.connect(ConnectMode::Card).await.unwrap_err();

    assert!(matches!(err.kind(), ReaderErrorKind::Failure));
    assert!(err.report().to_string().contains("no service"));
}
