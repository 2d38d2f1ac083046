//! Rejections and execution receipts.
//!
//! A [`Reject`] is a validation outcome, not an error: the order is refused,
//! the user's nonce still advances, and processing continues with the next
//! order. An [`ExecutionReceipt`] summarizes one batch for the caller and
//! carries the state root after it.

use primitive_types::{H160, H256};
use ssz_rs::prelude::*;

use crate::codec::hash_hex;

/// Why an order was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    InvalidQuantity,
    InvalidPrice,
    NonceTooLow,
    NonceTooHigh,
    InsufficientBalance,
    InsufficientRelayerFee,
    /// The opposing maker could not pay; reported against the maker order
    MakerInsufficientBalance,
    /// The user names a pair the book does not trade
    InvalidPair,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidQuantity => "invalid quantity",
            RejectReason::InvalidPrice => "invalid price",
            RejectReason::NonceTooLow => "nonce too low",
            RejectReason::NonceTooHigh => "nonce too high",
            RejectReason::InsufficientBalance => "insufficient balance",
            RejectReason::InsufficientRelayerFee => "insufficient relayer fee",
            RejectReason::MakerInsufficientBalance => "maker insufficient balance",
            RejectReason::InvalidPair => "invalid pair",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub order_hash: H256,
    pub order_id: u64,
    pub user: H160,
    pub nonce: u64,
    pub reason: RejectReason,
}

impl Reject {
    pub fn new(order: &crate::types::Order, reason: RejectReason) -> Self {
        Self {
            order_hash: order.hash,
            order_id: order.id,
            user: order.user,
            nonce: order.nonce,
            reason,
        }
    }
}

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reject {} ({})", hash_hex(&self.order_hash), self.reason)
    }
}

/// Summary of a processed batch.
///
/// ## State Root
///
/// `state_root` is the versioned store's root after the batch, the value
/// every validator must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct ExecutionReceipt {
    /// Batch (block) number
    pub batch_id: u64,

    pub orders_processed: u64,
    pub trades_executed: u64,
    pub orders_rejected: u64,

    pub state_root: [u8; 32],

    pub timestamp: u64,
}

impl ExecutionReceipt {
    pub fn new(
        batch_id: u64,
        orders_processed: u64,
        trades_executed: u64,
        orders_rejected: u64,
        state_root: H256,
        timestamp: u64,
    ) -> Self {
        Self {
            batch_id,
            orders_processed,
            trades_executed,
            orders_rejected,
            state_root: state_root.0,
            timestamp,
        }
    }

    pub fn state_root(&self) -> H256 {
        H256(self.state_root)
    }

    /// Get the state root as a hex string
    pub fn state_root_hex(&self) -> String {
        hash_hex(&self.state_root())
    }

    pub fn is_empty(&self) -> bool {
        self.orders_processed == 0
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Order, Side};
    use primitive_types::U256;

    #[test]
    fn test_reject_from_order() {
        let order = Order::limit(Side::Buy, U256::from(1u64), U256::zero())
            .with_user(H160::repeat_byte(3))
            .with_nonce(4);
        let reject = Reject::new(&order, RejectReason::InvalidQuantity);

        assert_eq!(reject.order_hash, order.hash);
        assert_eq!(reject.nonce, 4);
        assert!(reject.to_string().ends_with("(invalid quantity)"));
    }

    #[test]
    fn test_receipt_new() {
        let receipt = ExecutionReceipt::new(7, 10, 4, 2, H256::repeat_byte(0xAB), 1_703_577_600);

        assert_eq!(receipt.batch_id, 7);
        assert_eq!(receipt.orders_rejected, 2);
        assert_eq!(receipt.state_root(), H256::repeat_byte(0xAB));
        assert!(receipt.state_root_hex().starts_with("0xabab"));
        assert!(!receipt.is_empty());
    }

    #[test]
    fn test_receipt_ssz_size() {
        let receipt = ExecutionReceipt::default();
        let bytes = ssz_rs::serialize(&receipt).expect("Failed to serialize");

        // 8 + 8 + 8 + 8 + 32 + 8
        assert_eq!(bytes.len(), 72);
        let decoded: ExecutionReceipt = ssz_rs::deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(decoded, receipt);
    }
}
