//! Matching engine module for chainbook.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: same input, same trades, same records
//! 2. **Integer Math**: `U256` token units, no floating point
//! 3. **Synchronous Execution**: callers serialize access per book
//! 4. **Price-Time Priority**: best price first, then FIFO
//!
//! ## Matching Rules
//!
//! - **Buy orders** match against asks (lowest price first)
//! - **Sell orders** match against bids (highest price first)
//! - **Partial fills** are supported
//! - **Limit remainder** rests on the book
//! - **Market remainder** is dropped
//!
//! ## Two Paths
//!
//! - [`MatchingEngine`] matches against a store-backed
//!   [`OrderBook`](crate::orderbook::OrderBook), no balances involved.
//! - [`OrderProcessor`] matches against the versioned state with balance
//!   checks and settlement, under a combined snapshot of book state and
//!   account state.
//!
//! ## Example
//!
//! ```
//! use chainbook::engine::MatchingEngine;
//! use chainbook::orderbook::OrderBook;
//! use chainbook::store::MemoryStore;
//! use chainbook::types::{Order, Side};
//! use primitive_types::{H160, U256};
//!
//! let mut book = OrderBook::open(MemoryStore::memory(), H160::zero(), H160::repeat_byte(1)).unwrap();
//! let mut engine = MatchingEngine::new();
//!
//! // Resting sell order
//! let sell = Order::limit(Side::Sell, U256::from(50_000u64), U256::from(10u64));
//! engine.process_order(&mut book, sell, 1).unwrap();
//!
//! // Incoming buy order matches
//! let buy = Order::limit(Side::Buy, U256::from(50_000u64), U256::from(10u64));
//! let result = engine.process_order(&mut book, buy, 2).unwrap();
//!
//! assert!(result.fully_filled);
//! assert_eq!(result.trades.len(), 1);
//! ```

pub mod matcher;
pub mod processor;

pub use matcher::{MatchResult, MatchingEngine};
pub use processor::{Execution, OrderProcessor, ProcessorConfig};
