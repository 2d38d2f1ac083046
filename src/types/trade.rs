//! Trade type representing one fill between a taker and a maker.
//!
//! ## Flat Record
//!
//! Downstream consumers (settlement, indexing, notification) receive trades
//! as a flat string map. The field names are a stable contract:
//!
//! | field | value |
//! |---|---|
//! | `takerOrderHash` | 0x-hex |
//! | `makerOrderHash` | 0x-hex |
//! | `timestamp` | decimal |
//! | `quantity` | decimal |
//! | `exAddr` | maker exchange, 0x-hex |
//! | `uAddr` | maker user, 0x-hex |
//! | `bToken` | base token, 0x-hex |
//! | `qToken` | quote token, 0x-hex |
//! | `tradedPrice` | decimal |
//! | `makerOrderType` | `LO` / `MO` |

use std::collections::BTreeMap;

use primitive_types::{H160, H256, U256};

use crate::codec::hash_hex;
use crate::types::{Order, OrderType, Side};

pub const FIELD_TAKER_ORDER_HASH: &str = "takerOrderHash";
pub const FIELD_MAKER_ORDER_HASH: &str = "makerOrderHash";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_QUANTITY: &str = "quantity";
pub const FIELD_EXCHANGE_ADDRESS: &str = "exAddr";
pub const FIELD_USER_ADDRESS: &str = "uAddr";
pub const FIELD_BASE_TOKEN: &str = "bToken";
pub const FIELD_QUOTE_TOKEN: &str = "qToken";
pub const FIELD_TRADED_PRICE: &str = "tradedPrice";
pub const FIELD_MAKER_ORDER_TYPE: &str = "makerOrderType";

/// One fill.
///
/// The trade always executes at the maker's price.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trade {
    pub taker_order_hash: H256,
    pub maker_order_hash: H256,
    pub taker_order_id: u64,
    pub maker_order_id: u64,
    pub taker_side: Side,
    pub timestamp: u64,
    pub quantity: U256,
    pub price: U256,

    /// Maker's relayer
    pub maker_exchange: H160,
    pub maker_user: H160,
    pub base_token: H160,
    pub quote_token: H160,
    pub maker_order_type: OrderType,
}

impl Trade {
    /// Trade of `quantity` between `taker` and resting `maker`
    pub fn between(taker: &Order, maker: &Order, quantity: U256, timestamp: u64) -> Self {
        Self {
            taker_order_hash: taker.hash,
            maker_order_hash: maker.hash,
            taker_order_id: taker.id,
            maker_order_id: maker.id,
            taker_side: taker.side,
            timestamp,
            quantity,
            price: maker.price,
            maker_exchange: maker.exchange,
            maker_user: maker.user,
            base_token: maker.base_token,
            quote_token: maker.quote_token,
            maker_order_type: maker.order_type,
        }
    }

    /// price * quantity, unscaled
    pub fn notional_raw(&self) -> Option<U256> {
        self.price.checked_mul(self.quantity)
    }

    pub fn to_record(&self) -> BTreeMap<String, String> {
        let address = |a: &H160| format!("0x{}", hex::encode(a.as_bytes()));
        let mut record = BTreeMap::new();
        record.insert(FIELD_TAKER_ORDER_HASH.to_string(), hash_hex(&self.taker_order_hash));
        record.insert(FIELD_MAKER_ORDER_HASH.to_string(), hash_hex(&self.maker_order_hash));
        record.insert(FIELD_TIMESTAMP.to_string(), self.timestamp.to_string());
        record.insert(FIELD_QUANTITY.to_string(), self.quantity.to_string());
        record.insert(FIELD_EXCHANGE_ADDRESS.to_string(), address(&self.maker_exchange));
        record.insert(FIELD_USER_ADDRESS.to_string(), address(&self.maker_user));
        record.insert(FIELD_BASE_TOKEN.to_string(), address(&self.base_token));
        record.insert(FIELD_QUOTE_TOKEN.to_string(), address(&self.quote_token));
        record.insert(FIELD_TRADED_PRICE.to_string(), self.price.to_string());
        record.insert(
            FIELD_MAKER_ORDER_TYPE.to_string(),
            self.maker_order_type.as_str().to_string(),
        );
        record
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
