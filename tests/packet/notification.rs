use std::sync::LazyLock;

use bgpd::packet::message::{DecodeCxt, EncodeCxt, Message, NotificationMsg};

use super::{test_decode_msg, test_encode_msg};

// Cease / Administrative Shutdown, no data.
static NOTIFICATION1: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x15,
        0x03,
        0x06, 0x02,
    ];
    (bytes, Message::Notification(NotificationMsg::new(6, 2, vec![])))
});

// Hold Timer Expired, carrying opaque data (this code attaches none beyond
// the two subcode bytes, but a peer's own NOTIFICATION may, so decode must
// pass it through untouched).
static NOTIFICATION2: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x18,
        0x03,
        0x04, 0x00,
        0xde, 0xad, 0xbe,
    ];
    (bytes, Message::Notification(NotificationMsg::new(4, 0, vec![0xde, 0xad, 0xbe])))
});

#[test]
fn test_encode_notification1() {
    let (bytes, msg) = &*NOTIFICATION1;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_notification1() {
    let (bytes, msg) = &*NOTIFICATION1;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}

#[test]
fn test_encode_notification2() {
    let (bytes, msg) = &*NOTIFICATION2;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_notification2() {
    let (bytes, msg) = &*NOTIFICATION2;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}
