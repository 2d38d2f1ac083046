//! Record encoding and content hashing.
//!
//! ## SSZ Records
//!
//! Every persisted record derives `SimpleSerialize` from ssz_rs, so the byte
//! layout is fixed-width and identical on every validator. Wide values
//! (`U256`, `H256`, `H160`) are carried as 32-byte big-endian words:
//!
//! ```text
//! U256  -> big-endian 32 bytes
//! H256  -> the 32 bytes as-is
//! H160  -> left-padded with 12 zero bytes
//! ```
//!
//! ## Content Hash
//!
//! The content hash of a record is SHA-256 over its SSZ encoding. Parents
//! hash their own record together with their children's hashes, so any
//! validator can recompute a book hash from the persisted records alone.

use primitive_types::{H160, H256, U256};
use sha2::{Digest, Sha256};
use ssz_rs::prelude::*;

use crate::error::CodecError;

/// 32-byte word used inside SSZ containers
pub type Word = [u8; 32];

/// The empty/sentinel key
pub const EMPTY_KEY: H256 = H256([0u8; 32]);

// ============================================================================
// Word conversions
// ============================================================================

#[inline]
pub fn u256_to_word(value: U256) -> Word {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

#[inline]
pub fn word_to_u256(word: &Word) -> U256 {
    U256::from_big_endian(word)
}

#[inline]
pub fn h160_to_word(address: H160) -> Word {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

#[inline]
pub fn word_to_h160(word: &Word) -> H160 {
    H160::from_slice(&word[12..])
}

/// Interpret a key as a big-endian integer.
#[inline]
pub fn key_to_u256(key: &H256) -> U256 {
    U256::from_big_endian(key.as_bytes())
}

#[inline]
pub fn u256_to_key(value: U256) -> H256 {
    H256(u256_to_word(value))
}

/// `slot + offset`, wrapping at 2^256.
///
/// Store keys for tree nodes and list orders are derived this way so that
/// each book's key space is isolated by its slot.
#[inline]
pub fn slot_key(slot: U256, offset: U256) -> H256 {
    let (sum, _) = slot.overflowing_add(offset);
    u256_to_key(sum)
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> H256 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    H256::from_slice(&hasher.finalize())
}

/// Slot (namespace) derived from a record key.
pub fn derive_slot(parts: &[&[u8]]) -> U256 {
    key_to_u256(&sha256(parts))
}

// ============================================================================
// SSZ helpers
// ============================================================================

/// Serialize a record, tagging failures with the record kind.
pub fn encode<T: SimpleSerialize>(value: &T, kind: &'static str) -> Result<Vec<u8>, CodecError> {
    ssz_rs::serialize(value).map_err(|e| CodecError::Encode {
        kind,
        reason: format!("{e:?}"),
    })
}

pub fn decode<T: SimpleSerialize>(bytes: &[u8], kind: &'static str) -> Result<T, CodecError> {
    ssz_rs::deserialize::<T>(bytes).map_err(|e| CodecError::Decode {
        kind,
        reason: format!("{e:?}"),
    })
}

/// SHA-256 of the record's SSZ encoding.
pub fn content_hash<T: SimpleSerialize>(value: &T, kind: &'static str) -> Result<H256, CodecError> {
    let bytes = encode(value, kind)?;
    Ok(sha256(&[&bytes]))
}

/// Hex form of a hash with `0x` prefix, for logs.
pub fn hash_hex(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_word_roundtrip() {
        let value = U256::from_dec_str("123456789012345678901234567890").unwrap();
        let word = u256_to_word(value);
        assert_eq!(word_to_u256(&word), value);
        // Big-endian: small values land at the end
        assert_eq!(u256_to_word(U256::from(1u64))[31], 1);
    }

    #[test]
    fn test_h160_word_padding() {
        let address = H160::repeat_byte(0xAB);
        let word = h160_to_word(address);
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(word_to_h160(&word), address);
    }

    #[test]
    fn test_slot_key_wraps() {
        let key = slot_key(U256::MAX, U256::from(2u64));
        assert_eq!(key_to_u256(&key), U256::from(1u64));
    }

    #[test]
    fn test_sha256_concatenation() {
        assert_eq!(sha256(&[b"ab", b"c"]), sha256(&[b"abc"]));
        assert_ne!(sha256(&[b"abc"]), sha256(&[b"abd"]));
    }

    #[test]
    fn test_hash_hex() {
        let hex = hash_hex(&H256::repeat_byte(0xAB));
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("0xabab"));
    }
}
