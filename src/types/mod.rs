//! Core data types for chainbook
//!
//! Persisted forms derive SSZ for deterministic encoding. Amounts and prices
//! are `U256` integers in token units.
//!
//! ## Types
//!
//! - [`Order`]: a spot order, resting or incoming
//! - [`Side`], [`OrderType`], [`OrderStatus`]
//! - [`LendingItem`]: borrow/invest offer for the lending books
//! - [`Trade`]: one fill between a taker and a maker
//! - [`Reject`]: a refused order with its [`RejectReason`]
//! - [`ExecutionReceipt`]: batch summary with state root

mod lending;
mod order;
mod receipt;
mod trade;
pub mod units;

pub use lending::{LendingItem, LendingRecord, LendingSide};
pub use order::{Order, OrderRecord, OrderStatus, OrderType, Side};
pub use receipt::{ExecutionReceipt, Reject, RejectReason};
pub use trade::Trade;
