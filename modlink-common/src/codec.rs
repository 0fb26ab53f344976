//! Register codec for 32-bit values carried in two 16-bit Modbus registers.
//!
//! A 32-bit value is split into a high and a low word. The word order decides
//! which of the two goes into the first register, the byte order decides how
//! the two bytes of each word are laid out on the wire.
//!
//! Encoder and decoder must agree on the order or the decoded value is silently
//! wrong. Everything that advertises or reads back a gateway address therefore
//! goes through [`ADDRESS_ORDER`] instead of picking an order locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Byte order inside a single register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Most significant byte first (Modbus native).
    Big,
    /// Least significant byte first.
    Little,
}

/// Order of the two words making up a 32-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// High word in the first register.
    Big,
    /// Low word in the first register.
    Little,
}

/// Combined byte/word order used to encode and decode 32-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterOrder {
    pub byte: ByteOrder,
    pub word: WordOrder,
}

impl RegisterOrder {
    pub const BIG_BIG: Self = Self::new(ByteOrder::Big, WordOrder::Big);
    pub const BIG_LITTLE: Self = Self::new(ByteOrder::Big, WordOrder::Little);
    pub const LITTLE_BIG: Self = Self::new(ByteOrder::Little, WordOrder::Big);
    pub const LITTLE_LITTLE: Self = Self::new(ByteOrder::Little, WordOrder::Little);

    /// All four byte/word order combinations.
    pub const ALL: [Self; 4] = [
        Self::BIG_BIG,
        Self::BIG_LITTLE,
        Self::LITTLE_BIG,
        Self::LITTLE_LITTLE,
    ];

    pub const fn new(byte: ByteOrder, word: WordOrder) -> Self {
        Self { byte, word }
    }
}

impl fmt::Display for RegisterOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let byte = match self.byte {
            ByteOrder::Big => "big",
            ByteOrder::Little => "little",
        };
        let word = match self.word {
            WordOrder::Big => "big",
            WordOrder::Little => "little",
        };
        write!(f, "byte={}/word={}", byte, word)
    }
}

/// Order used by gateways to advertise their address in registers 0-1.
///
/// Shared by the advertising side and the discovery poller.
pub const ADDRESS_ORDER: RegisterOrder = RegisterOrder::LITTLE_LITTLE;

/// First holding register of the advertised address.
pub const ADDRESS_REGISTER: u16 = 0;

/// Number of registers holding the advertised address.
pub const ADDRESS_REGISTER_COUNT: u16 = 2;

fn order_bytes(word: u16, order: ByteOrder) -> u16 {
    match order {
        ByteOrder::Big => word,
        ByteOrder::Little => word.swap_bytes(),
    }
}

/// Encode a 32-bit unsigned value into two register words.
pub fn encode_u32(value: u32, order: RegisterOrder) -> [u16; 2] {
    let high = (value >> 16) as u16;
    let low = value as u16;

    let (first, second) = match order.word {
        WordOrder::Big => (high, low),
        WordOrder::Little => (low, high),
    };

    [order_bytes(first, order.byte), order_bytes(second, order.byte)]
}

/// Decode two register words into a 32-bit unsigned value.
///
/// Inverse of [`encode_u32`] for the same `order`.
pub fn decode_u32(words: [u16; 2], order: RegisterOrder) -> u32 {
    let first = order_bytes(words[0], order.byte);
    let second = order_bytes(words[1], order.byte);

    let (high, low) = match order.word {
        WordOrder::Big => (first, second),
        WordOrder::Little => (second, first),
    };

    ((high as u32) << 16) | low as u32
}

/// Decode the first two words of a register slice.
///
/// Returns `None` if fewer than two words are available.
pub fn decode_u32_from_slice(words: &[u16], order: RegisterOrder) -> Option<u32> {
    match words {
        [first, second, ..] => Some(decode_u32([*first, *second], order)),
        _ => None,
    }
}

/// Encode an IPv4 address as advertised by a gateway.
///
/// The address is first read as a network-order integer (`inet_aton`), then
/// laid out with [`ADDRESS_ORDER`].
pub fn encode_ipv4(addr: Ipv4Addr) -> [u16; 2] {
    encode_u32(u32::from(addr), ADDRESS_ORDER)
}

/// Decode an IPv4 address advertised by a gateway.
pub fn decode_ipv4(words: [u16; 2]) -> Ipv4Addr {
    Ipv4Addr::from(decode_u32(words, ADDRESS_ORDER))
}

/// Parse a dotted IPv4 string, ignoring surrounding whitespace.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_big_big() {
        assert_eq!(encode_u32(0x1234_5678, RegisterOrder::BIG_BIG), [0x1234, 0x5678]);
    }

    #[test]
    fn test_encode_little_little() {
        // low word first, bytes swapped inside each word
        assert_eq!(
            encode_u32(0x1234_5678, RegisterOrder::LITTLE_LITTLE),
            [0x7856, 0x3412]
        );
    }

    #[test]
    fn test_encode_mixed_orders() {
        assert_eq!(
            encode_u32(0x1234_5678, RegisterOrder::BIG_LITTLE),
            [0x5678, 0x1234]
        );
        assert_eq!(
            encode_u32(0x1234_5678, RegisterOrder::LITTLE_BIG),
            [0x3412, 0x7856]
        );
    }

    #[test]
    fn test_decode_inverts_encode() {
        for order in RegisterOrder::ALL {
            for value in [0, 1, 0xFFFF, 0x1_0000, 0xDEAD_BEEF, u32::MAX] {
                assert_eq!(decode_u32(encode_u32(value, order), order), value, "{}", order);
            }
        }
    }

    #[test]
    fn test_decode_from_short_slice() {
        assert_eq!(decode_u32_from_slice(&[1], ADDRESS_ORDER), None);
        assert_eq!(
            decode_u32_from_slice(&[0x7856, 0x3412, 0xFFFF], ADDRESS_ORDER),
            Some(0x1234_5678)
        );
    }

    #[test]
    fn test_ipv4_words() {
        // 192.168.1.121 -> 0xC0A80179
        let words = encode_ipv4(Ipv4Addr::new(192, 168, 1, 121));
        assert_eq!(words, [0x7901, 0xA8C0]);
        assert_eq!(decode_ipv4(words), Ipv4Addr::new(192, 168, 1, 121));
    }

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4(" 10.8.0.2 ").unwrap(), Ipv4Addr::new(10, 8, 0, 2));
        assert!(matches!(parse_ipv4("10.8.0"), Err(Error::InvalidAddress(_))));
        assert!(parse_ipv4("gateway.local").is_err());
    }

    #[test]
    fn test_order_display() {
        assert_eq!(ADDRESS_ORDER.to_string(), "byte=little/word=little");
    }
}
