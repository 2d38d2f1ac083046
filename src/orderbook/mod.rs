//! Order book module for the chainbook matching core.
//!
//! ## Architecture
//!
//! Every structure here is a set of records in a [`KeyValueStore`]:
//!
//! - **Order records**: `Order` plus list links, one record per order
//! - **Order lists**: FIFO queue metadata for one price, stored as the value
//!   of that price in the tree's red-black index
//! - **Order trees**: one per side, price -> order list
//! - **Order books**: bid tree + ask tree for one pair
//!
//! ## Components
//!
//! - [`OrderNode`]: order with `next`/`prev` links
//! - [`OrderList`]: orders at a single price
//! - [`OrderTree`]: all prices of one side
//! - [`OrderBook`]: both sides of a pair
//!
//! ## Complexity
//!
//! | Operation | Store reads |
//! |-----------|-------------|
//! | Add order | O(log p) |
//! | Cancel order | O(log p) |
//! | Best bid/ask | O(log p) |
//! | Match order | O(k log p) |
//!
//! where `p` is the number of price levels and `k` the number of fills.
//!
//! ## Example
//!
//! ```
//! use chainbook::orderbook::OrderBook;
//! use chainbook::store::MemoryStore;
//! use chainbook::types::{Order, Side};
//! use primitive_types::{H160, U256};
//!
//! let (base, quote) = (H160::repeat_byte(1), H160::repeat_byte(2));
//! let mut book = OrderBook::open(MemoryStore::memory(), base, quote).unwrap();
//!
//! let order = Order::limit(Side::Buy, U256::from(100u64), U256::from(5u64));
//! book.process_order(order, 1).unwrap();
//!
//! assert_eq!(book.best_bid().unwrap(), Some(U256::from(100u64)));
//! ```
//!
//! [`KeyValueStore`]: crate::store::KeyValueStore

pub mod book;
pub mod list;
pub mod node;
pub mod tree;

pub use book::{book_key, OrderBook, OrderBookItem};
pub use list::{OrderList, OrderListItem};
pub use node::{order_key, OrderNode};
pub use tree::{OrderTree, OrderTreeItem};
