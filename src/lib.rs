//! # Chainbook
//!
//! Order book and deterministic matching core of an on-chain exchange.
//!
//! ## Architecture
//!
//! - **Store**: key-value store with a pending batch and a dry-run overlay
//! - **RbTree**: red-black tree whose nodes are store records
//! - **OrderBook**: order lists, order trees and books built on the tree
//! - **Engine**: price-time priority matching, with or without settlement
//! - **State**: journaled, authenticated order state with snapshots
//! - **Snapshot**: point-in-time book exports keyed by block
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical inputs give identical trades, records and hashes
//! 2. **No Floating Point**: `U256` token units throughout
//! 3. **Explicit Store Handles**: no global database; every component gets its store
//! 4. **Synchronous Execution**: callers serialize access per book

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: Order, Trade, Reject, ExecutionReceipt
pub mod types;

/// Record encoding and content hashing
pub mod codec;

/// Error taxonomy
pub mod error;

/// Key-value store with dry-run overlay
pub mod store;

/// Store-backed red-black tree
pub mod rbtree;

/// Order lists, trees and books
pub mod orderbook;

/// Matching engine and settlement-aware processor
pub mod engine;

/// Settlement quantity and balance movement
pub mod settlement;

/// Account state capability
pub mod accounts;

/// Versioned, authenticated order state
pub mod state;

/// Book snapshots
pub mod snapshot;

/// Engine configuration
pub mod config;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use accounts::{AccountState, MemoryAccounts};
pub use engine::{Execution, MatchResult, MatchingEngine, OrderProcessor, ProcessorConfig};
pub use error::{BookError, Result};
pub use orderbook::{OrderBook, OrderList, OrderNode, OrderTree};
pub use snapshot::Snapshot;
pub use state::{StateItem, VersionedStore};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{ExecutionReceipt, LendingItem, Order, OrderStatus, OrderType, Reject, RejectReason, Side, Trade};
