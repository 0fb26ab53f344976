//! Integration tests for the register codec.

use std::net::Ipv4Addr;

use modlink_common::{
    ADDRESS_ORDER, RegisterOrder, decode_ipv4, decode_u32, encode_ipv4, encode_u32,
};

/// Deterministic spread of values across the whole u32 range.
fn sample_values() -> impl Iterator<Item = u32> {
    let mut state: u32 = 0x9E37_79B9;
    let spread = (0..4096).map(move |_| {
        // xorshift32
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    });

    [0, 1, 0xFF, 0x100, 0xFFFF, 0x1_0000, 0x7FFF_FFFF, 0x8000_0000, u32::MAX]
        .into_iter()
        .chain(spread)
}

#[test]
fn test_address_order_round_trip() {
    for value in sample_values() {
        assert_eq!(
            decode_u32(encode_u32(value, ADDRESS_ORDER), ADDRESS_ORDER),
            value
        );
    }
}

#[test]
fn test_every_order_round_trips() {
    for order in RegisterOrder::ALL {
        for value in sample_values().take(256) {
            assert_eq!(decode_u32(encode_u32(value, order), order), value);
        }
    }
}

#[test]
fn test_mismatched_orders_corrupt_value() {
    let value = 0x1234_5678;

    for encode_order in RegisterOrder::ALL {
        for decode_order in RegisterOrder::ALL {
            if encode_order == decode_order {
                continue;
            }

            let decoded = decode_u32(encode_u32(value, encode_order), decode_order);
            assert_ne!(
                decoded, value,
                "encoded with {} and decoded with {}",
                encode_order, decode_order
            );
        }
    }
}

#[test]
fn test_mismatched_orders_corrupt_addresses() {
    let addr = Ipv4Addr::new(10, 8, 0, 14);
    let words = encode_u32(u32::from(addr), RegisterOrder::BIG_BIG);

    assert_ne!(decode_ipv4(words), addr);
    assert_eq!(decode_ipv4(encode_ipv4(addr)), addr);
}
