//! Error types for the order book core.
//!
//! Errors fall into four groups:
//!
//! 1. **Not found**: order, price list or book absent. Expected outcomes.
//! 2. **Validation**: surfaced as [`crate::types::Reject`] values instead of
//!    errors; [`BookError::InvalidOrder`] only covers malformed input handed
//!    directly to the book.
//! 3. **Internal consistency**: a missing tree node, a headless order list,
//!    an unknown revision. The local replica has diverged.
//! 4. **Store I/O**: propagated to the caller, who must revert.

use primitive_types::{H256, U256};
use thiserror::Error;

/// Failures raised by a key-value backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Sled backend error
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// The all-zero key is the empty sentinel and cannot hold a value
    #[error("refusing to write the reserved empty key")]
    ReservedKey,

    /// Configured backend cannot be opened
    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Failures while encoding or decoding persisted records.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("ssz encode failed for {kind}: {reason}")]
    Encode { kind: &'static str, reason: String },

    #[error("ssz decode failed for {kind}: {reason}")]
    Decode { kind: &'static str, reason: String },

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("record too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid enum tag {tag} for {kind}")]
    InvalidTag { kind: &'static str, tag: u8 },
}

/// Order book error taxonomy.
#[derive(Error, Debug)]
pub enum BookError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Order absent, or present with a different content hash
    #[error("order not found: id={order_id}, price={price}")]
    OrderNotFound { order_id: u64, price: U256 },

    #[error("order list not found at price {0}")]
    OrderListNotFound(U256),

    #[error("order book not found: {0:?}")]
    OrderBookNotFound(H256),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// A node referenced by the tree is absent from the store
    #[error("red-black tree node missing: {0:?}")]
    MissingNode(H256),

    /// An order list claims a length but its head order cannot be read
    #[error("order list at price {price} has no head order (length {length})")]
    EmptyHeadOrder { price: U256, length: u64 },

    #[error("revision id {0} cannot be reverted")]
    RevisionNotFound(usize),

    #[error("snapshot hash mismatch for book {book:?}: expected {expected:?}, got {actual:?}")]
    SnapshotHashMismatch {
        book: H256,
        expected: H256,
        actual: H256,
    },

    #[error("arithmetic overflow: {0}")]
    Overflow(&'static str),

    #[error("insufficient balance for {0}")]
    InsufficientBalance(String),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl BookError {
    /// True for errors that imply local state corruption.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BookError::MissingNode(_)
                | BookError::EmptyHeadOrder { .. }
                | BookError::RevisionNotFound(_)
                | BookError::SnapshotHashMismatch { .. }
                | BookError::Overflow(_)
                | BookError::Codec(_)
        )
    }

    /// True for the expected "absent" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BookError::OrderNotFound { .. }
                | BookError::OrderListNotFound(_)
                | BookError::OrderBookNotFound(_)
        )
    }
}

/// Result type alias.
///
/// The error parameter defaults to [`BookError`] so derive-generated code
/// that names `Result<T, E>` explicitly still resolves.
pub type Result<T, E = BookError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = BookError::MissingNode(H256::repeat_byte(1));
        assert!(missing.is_fatal());
        assert!(!missing.is_not_found());

        let absent = BookError::OrderNotFound {
            order_id: 7,
            price: U256::from(100u64),
        };
        assert!(absent.is_not_found());
        assert!(!absent.is_fatal());
        assert_eq!(absent.to_string(), "order not found: id=7, price=100");
    }

    #[test]
    fn test_store_error_wraps() {
        let err: BookError = StoreError::ReservedKey.into();
        assert!(matches!(err, BookError::Store(StoreError::ReservedKey)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_result_alias_accepts_other_errors() {
        fn decode(ok: bool) -> Result<u8, StoreError> {
            if ok {
                Ok(1)
            } else {
                Err(StoreError::ReservedKey)
            }
        }
        fn lift(ok: bool) -> Result<u8> {
            Ok(decode(ok)?)
        }

        assert_eq!(lift(true).unwrap(), 1);
        assert!(matches!(lift(false), Err(BookError::Store(StoreError::ReservedKey))));
    }
}
