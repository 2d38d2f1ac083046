//! Items stored in the versioned state.

use std::fmt::Debug;

use primitive_types::{H256, U256};

use crate::error::Result;
use crate::types::{LendingItem, Order, OrderStatus, Side};

/// What the versioned store needs to know about a resting item.
///
/// Spot orders rest by price, lending items by interest rate. Both are just
/// a `price()` here.
pub trait StateItem: Clone + Debug + PartialEq {
    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;

    fn order_id(&self) -> u64;

    fn set_order_id(&mut self, id: u64);

    fn side(&self) -> Side;

    fn price(&self) -> U256;

    fn quantity(&self) -> U256;

    fn set_quantity(&mut self, quantity: U256);

    fn mark_cancelled(&mut self);

    /// Still resting: not cancelled, rejected or filled
    fn is_live(&self) -> bool;

    /// Signature hash, used to authenticate cancels
    fn item_hash(&self) -> H256;
}

impl StateItem for Order {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Order::encode(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Order::decode(bytes)?)
    }

    fn order_id(&self) -> u64 {
        self.id
    }

    fn set_order_id(&mut self, id: u64) {
        self.id = id;
    }

    fn side(&self) -> Side {
        self.side
    }

    fn price(&self) -> U256 {
        self.price
    }

    fn quantity(&self) -> U256 {
        self.quantity
    }

    fn set_quantity(&mut self, quantity: U256) {
        self.quantity = quantity;
        if quantity.is_zero() {
            self.status = OrderStatus::Filled;
        } else if quantity < self.original_quantity {
            self.status = OrderStatus::PartialFilled;
        }
    }

    fn mark_cancelled(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    fn is_live(&self) -> bool {
        !self.status.is_final() && !self.quantity.is_zero()
    }

    fn item_hash(&self) -> H256 {
        self.hash
    }
}

impl StateItem for LendingItem {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(LendingItem::encode(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(LendingItem::decode(bytes)?)
    }

    fn order_id(&self) -> u64 {
        self.id
    }

    fn set_order_id(&mut self, id: u64) {
        self.id = id;
    }

    fn side(&self) -> Side {
        self.side.book_side()
    }

    fn price(&self) -> U256 {
        self.interest
    }

    fn quantity(&self) -> U256 {
        self.quantity
    }

    fn set_quantity(&mut self, quantity: U256) {
        self.quantity = quantity;
        self.status = if quantity.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFilled
        };
    }

    fn mark_cancelled(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    fn is_live(&self) -> bool {
        !self.status.is_final() && !self.quantity.is_zero()
    }

    fn item_hash(&self) -> H256 {
        self.hash
    }
}
