//! Order node records for the per-price order lists.
//!
//! ## Design
//!
//! `OrderNode` wraps an `Order` with doubly-linked list links. The links are
//! logical order keys (the order id as a 32-byte word), not store keys; the
//! owning [`OrderList`](crate::orderbook::OrderList) resolves them through
//! its slot. The all-zero key means "no neighbour".
//!
//! ## Linked List
//!
//! - `next`: the next (newer) order at this price
//! - `prev`: the previous (older) order at this price

use primitive_types::{H256, U256};
use ssz_rs::prelude::*;

use crate::codec::{self, u256_to_key, Word, EMPTY_KEY};
use crate::error::CodecError;
use crate::types::{Order, OrderRecord};

/// Logical key of an order id
#[inline]
pub fn order_key(order_id: u64) -> H256 {
    u256_to_key(U256::from(order_id))
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct OrderNodeRecord {
    order: OrderRecord,
    next: Word,
    prev: Word,
}

/// Order plus its position in the price list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNode {
    pub order: Order,

    /// Newer neighbour, zero if this is the tail
    pub next: H256,

    /// Older neighbour, zero if this is the head
    pub prev: H256,
}

impl OrderNode {
    /// Unlinked node
    #[inline]
    pub fn new(order: Order) -> Self {
        Self {
            order,
            next: EMPTY_KEY,
            prev: EMPTY_KEY,
        }
    }

    #[inline]
    pub fn key(&self) -> H256 {
        order_key(self.order.id)
    }

    #[inline]
    pub fn is_unlinked(&self) -> bool {
        self.next.is_zero() && self.prev.is_zero()
    }

    #[inline]
    pub fn order_id(&self) -> u64 {
        self.order.id
    }

    #[inline]
    pub fn quantity(&self) -> U256 {
        self.order.quantity
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let record = OrderNodeRecord {
            order: self.order.to_record(),
            next: self.next.0,
            prev: self.prev.0,
        };
        codec::encode(&record, "order node")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: OrderNodeRecord = codec::decode(bytes, "order node")?;
        Ok(Self {
            order: Order::from_record(&record.order)?,
            next: H256(record.next),
            prev: H256(record.prev),
        })
    }

    /// Content hash of the persisted record
    pub fn hash(&self) -> Result<H256, CodecError> {
        Ok(codec::sha256(&[&self.encode()?]))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn create_test_node() -> OrderNode {
        let mut order = Order::limit(Side::Sell, U256::from(100u64), U256::from(5u64));
        order.id = 3;
        OrderNode::new(order)
    }

    #[test]
    fn test_order_node_new() {
        let node = create_test_node();
        assert!(node.is_unlinked());
        assert_eq!(node.order_id(), 3);
        assert_eq!(node.key(), order_key(3));
        assert_eq!(node.quantity(), U256::from(5u64));
    }

    #[test]
    fn test_order_node_record() {
        let mut node = create_test_node();
        node.next = order_key(4);

        let decoded = OrderNode::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(decoded, node);
        assert!(!decoded.is_unlinked());
    }

    #[test]
    fn test_order_node_hash_covers_links() {
        let node = create_test_node();
        let mut linked = node.clone();
        linked.prev = order_key(1);
        assert_ne!(node.hash().unwrap(), linked.hash().unwrap());
    }
}
