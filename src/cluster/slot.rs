//! Hash slot calculation.
//!
//! Keys map to one of 16384 slots through CRC16/XMODEM. When a key contains
//! a non-empty `{...}` section, only that section is hashed, so related keys
//! can be forced onto the same node.

use std::fmt;

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Routing information derived from a command's keys.
///
/// Keyed commands carry the slot of their keys. Keyless commands such as
/// `PING` or `INFO` can go to any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// The command touches keys in this slot.
    Slot(u16),
    /// The command has no keys.
    Keyless,
}

impl RoutingKey {
    /// Returns the slot for keyed commands.
    pub fn slot(&self) -> Option<u16> {
        match self {
            RoutingKey::Slot(slot) => Some(*slot),
            RoutingKey::Keyless => None,
        }
    }

    /// Builds the routing key for a single key.
    pub fn for_key(key: impl AsRef<[u8]>) -> Self {
        RoutingKey::Slot(key_slot(key))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Slot(slot) => write!(f, "slot {}", slot),
            RoutingKey::Keyless => f.write_str("keyless"),
        }
    }
}

/// Calculates the cluster slot for a key.
///
/// # Examples
///
/// ```
/// use slotwise::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Returns the bytes between the first `{` and the next `}` when non-empty,
/// otherwise the whole key.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_slot_known_values() {
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("bar"), 5061);
        assert_eq!(key_slot("123456789"), 12739);
    }

    #[test]
    fn test_key_slot_with_hash_tag() {
        let slot1 = key_slot("{user1000}.following");
        let slot2 = key_slot("{user1000}.followers");
        assert_eq!(slot1, slot2);
        assert_eq!(slot1, key_slot("user1000"));
    }

    #[test]
    fn test_extract_hash_tag() {
        assert_eq!(extract_hash_tag(b"foo{bar}"), b"bar");
        assert_eq!(extract_hash_tag(b"prefix{tag}suffix"), b"tag");
        assert_eq!(extract_hash_tag(b"foo{bar}{baz}"), b"bar");
        assert_eq!(extract_hash_tag(b"simple_key"), b"simple_key");
    }

    #[test]
    fn test_extract_hash_tag_empty_or_unmatched() {
        // An empty tag hashes the whole key.
        assert_eq!(extract_hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"foo}bar"), b"foo}bar");
        // First `{` pairs with the next `}`, even if that yields an empty tag.
        assert_eq!(extract_hash_tag(b"{}{bar}"), b"{}{bar}");
    }

    #[test]
    fn test_key_slot_binary_key() {
        let slot = key_slot([0xffu8, 0x00, 0x7b, 0x01, 0x7d]);
        assert_eq!(slot, key_slot([0x01u8]));
        assert!(key_slot("").lt(&SLOT_COUNT));
    }

    #[test]
    fn test_key_slot_distribution() {
        let slots: std::collections::HashSet<_> =
            (0..100).map(|i| key_slot(format!("key{}", i))).collect();
        assert!(slots.len() >= 50, "keys should spread across slots");
    }

    #[test]
    fn test_routing_key() {
        assert_eq!(RoutingKey::for_key("foo"), RoutingKey::Slot(12182));
        assert_eq!(RoutingKey::Keyless.slot(), None);
        assert_eq!(RoutingKey::Slot(7).to_string(), "slot 7");
    }
}
