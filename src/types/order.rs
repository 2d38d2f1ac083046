//! Order types for the chainbook matching core.
//!
//! ## SSZ Serialization
//!
//! [`Order`] is the working form. It is persisted as an [`OrderRecord`],
//! which derives `SimpleSerialize` from ssz_rs:
//! - Basic types (u64, u8): little-endian
//! - Wide values (U256, H160, H256): 32-byte big-endian words
//!
//! ## Content Hash
//!
//! `Order::hash` covers the fields a user signs: exchange, user, tokens,
//! side, type, price, original quantity and nonce. Fills and status changes
//! do not alter it, so a cancellation can name the order it means.

use primitive_types::{H160, H256, U256};
use ssz_rs::prelude::*;

use crate::codec::{self, h160_to_word, u256_to_word, word_to_h160, word_to_u256, Word};
use crate::error::CodecError;

// ============================================================================
// Side enum
// ============================================================================

/// Order side
///
/// Represented as u8 for SSZ compatibility:
/// - Buy = 0 (bid)
/// - Sell = 1 (ask)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

impl Side {
    pub fn to_u8(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

    /// Returns the opposite side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// True if an opposing resting price is acceptable for a taker with
    /// limit `limit` on this side.
    #[inline]
    pub fn accepts(self, limit: U256, resting: U256) -> bool {
        match self {
            Side::Buy => resting <= limit,
            Side::Sell => resting >= limit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

// ============================================================================
// OrderType enum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderType {
    /// Executes at the given price or better, remainder rests
    #[default]
    Limit,
    /// Executes against whatever liquidity exists, never rests
    Market,
}

impl OrderType {
    pub fn to_u8(self) -> u8 {
        match self {
            OrderType::Limit => 0,
            OrderType::Market => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OrderType::Limit),
            1 => Some(OrderType::Market),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LO",
            OrderType::Market => "MO",
        }
    }
}

// ============================================================================
// OrderStatus enum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderStatus {
    #[default]
    New,
    Open,
    PartialFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Open => 1,
            OrderStatus::PartialFilled => 2,
            OrderStatus::Filled => 3,
            OrderStatus::Cancelled => 4,
            OrderStatus::Rejected => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OrderStatus::New),
            1 => Some(OrderStatus::Open),
            2 => Some(OrderStatus::PartialFilled),
            3 => Some(OrderStatus::Filled),
            4 => Some(OrderStatus::Cancelled),
            5 => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    /// No further transitions possible
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

// ============================================================================
// Order
// ============================================================================

/// An order, resting or incoming.
///
/// `quantity` is the remaining quantity and only ever decreases through
/// fills. `original_quantity` is what the user signed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Order {
    /// Book-scoped id, assigned when the order is accepted
    pub id: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,

    /// Zero only for market orders
    pub price: U256,
    pub quantity: U256,
    pub original_quantity: U256,

    pub base_token: H160,
    pub quote_token: H160,
    pub user: H160,

    /// Relayer that submitted the order
    pub exchange: H160,

    pub nonce: u64,
    pub created_at: u64,
    pub updated_at: u64,

    pub hash: H256,
}

/// Persisted form of [`Order`]
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct OrderRecord {
    pub id: u64,
    pub side_raw: u8,
    pub order_type_raw: u8,
    pub status_raw: u8,
    pub price: Word,
    pub quantity: Word,
    pub original_quantity: Word,
    pub base_token: Word,
    pub quote_token: Word,
    pub user: Word,
    pub exchange: Word,
    pub nonce: u64,
    pub created_at: u64,
    pub updated_at: u64,
    pub hash: Word,
}

/// Fields covered by the order hash
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct SignedFields {
    exchange: Word,
    user: Word,
    base_token: Word,
    quote_token: Word,
    side_raw: u8,
    order_type_raw: u8,
    price: Word,
    quantity: Word,
    nonce: u64,
}

impl Order {
    /// Create a limit order. Token and party fields start zeroed; set them
    /// with the `with_*` methods, each of which refreshes the hash.
    pub fn limit(side: Side, price: U256, quantity: U256) -> Self {
        let mut order = Self {
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            original_quantity: quantity,
            ..Self::default()
        };
        order.rehash();
        order
    }

    /// Create a market order (price zero)
    pub fn market(side: Side, quantity: U256) -> Self {
        let mut order = Self::limit(side, U256::zero(), quantity);
        order.order_type = OrderType::Market;
        order.rehash();
        order
    }

    pub fn with_tokens(mut self, base_token: H160, quote_token: H160) -> Self {
        self.base_token = base_token;
        self.quote_token = quote_token;
        self.rehash();
        self
    }

    pub fn with_user(mut self, user: H160) -> Self {
        self.user = user;
        self.rehash();
        self
    }

    pub fn with_exchange(mut self, exchange: H160) -> Self {
        self.exchange = exchange;
        self.rehash();
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.rehash();
        self
    }

    /// Timestamps are not signed; the hash is unchanged.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.created_at = timestamp;
        self.updated_at = timestamp;
        self
    }

    /// Hash over the signed fields.
    pub fn compute_hash(&self) -> H256 {
        let fields = SignedFields {
            exchange: h160_to_word(self.exchange),
            user: h160_to_word(self.user),
            base_token: h160_to_word(self.base_token),
            quote_token: h160_to_word(self.quote_token),
            side_raw: self.side.to_u8(),
            order_type_raw: self.order_type.to_u8(),
            price: u256_to_word(self.price),
            quantity: u256_to_word(self.original_quantity),
            nonce: self.nonce,
        };
        // Fixed-size container, serialization cannot fail
        codec::content_hash(&fields, "order signature").unwrap_or_default()
    }

    fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    #[inline]
    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn filled_quantity(&self) -> U256 {
        self.original_quantity.saturating_sub(self.quantity)
    }

    /// Fill up to `amount`; returns the amount actually filled.
    pub fn fill(&mut self, amount: U256) -> U256 {
        let actual = amount.min(self.quantity);
        self.quantity -= actual;
        self.status = if self.quantity.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFilled
        };
        actual
    }

    pub fn to_record(&self) -> OrderRecord {
        OrderRecord {
            id: self.id,
            side_raw: self.side.to_u8(),
            order_type_raw: self.order_type.to_u8(),
            status_raw: self.status.to_u8(),
            price: u256_to_word(self.price),
            quantity: u256_to_word(self.quantity),
            original_quantity: u256_to_word(self.original_quantity),
            base_token: h160_to_word(self.base_token),
            quote_token: h160_to_word(self.quote_token),
            user: h160_to_word(self.user),
            exchange: h160_to_word(self.exchange),
            nonce: self.nonce,
            created_at: self.created_at,
            updated_at: self.updated_at,
            hash: self.hash.0,
        }
    }

    pub fn from_record(record: &OrderRecord) -> Result<Self, CodecError> {
        let side = Side::from_u8(record.side_raw).ok_or(CodecError::InvalidTag {
            kind: "order side",
            tag: record.side_raw,
        })?;
        let order_type = OrderType::from_u8(record.order_type_raw).ok_or(CodecError::InvalidTag {
            kind: "order type",
            tag: record.order_type_raw,
        })?;
        let status = OrderStatus::from_u8(record.status_raw).ok_or(CodecError::InvalidTag {
            kind: "order status",
            tag: record.status_raw,
        })?;
        Ok(Self {
            id: record.id,
            side,
            order_type,
            status,
            price: word_to_u256(&record.price),
            quantity: word_to_u256(&record.quantity),
            original_quantity: word_to_u256(&record.original_quantity),
            base_token: word_to_h160(&record.base_token),
            quote_token: word_to_h160(&record.quote_token),
            user: word_to_h160(&record.user),
            exchange: word_to_h160(&record.exchange),
            nonce: record.nonce,
            created_at: record.created_at,
            updated_at: record.updated_at,
            hash: H256(record.hash),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.to_record(), "order")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: OrderRecord = codec::decode(bytes, "order")?;
        Self::from_record(&record)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
