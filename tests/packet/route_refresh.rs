use std::sync::LazyLock;

use bgpd::packet::message::{DecodeCxt, EncodeCxt, Message, RouteRefreshMsg, RouteRefreshSubtype};
use bgpd::packet::nlri::Family;

use super::{test_decode_msg, test_encode_msg};

static ROUTE_REFRESH1: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x17,
        0x05,
        0x00, 0x02, 0x00, 0x01,
    ];
    let msg = Message::RouteRefresh(RouteRefreshMsg {
        family: Family::IPV6_UNICAST,
        subtype: RouteRefreshSubtype::Normal,
    });
    (bytes, msg)
});

// RFC 7313 End-of-RIB marker for IPv4 unicast (spec.md §8 scenario 6's
// enhanced-route-refresh form).
static ROUTE_REFRESH2: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x17,
        0x05,
        0x00, 0x01, 0x02, 0x01,
    ];
    let msg = Message::RouteRefresh(RouteRefreshMsg {
        family: Family::IPV4_UNICAST,
        subtype: RouteRefreshSubtype::EndOfRib,
    });
    (bytes, msg)
});

#[test]
fn test_encode_route_refresh1() {
    let (bytes, msg) = &*ROUTE_REFRESH1;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_route_refresh1() {
    let (bytes, msg) = &*ROUTE_REFRESH1;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}

#[test]
fn test_encode_route_refresh2() {
    let (bytes, msg) = &*ROUTE_REFRESH2;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_route_refresh2() {
    let (bytes, msg) = &*ROUTE_REFRESH2;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}
