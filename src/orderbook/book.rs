//! Order book: bid tree + ask tree for one trading pair.
//!
//! ## Architecture
//!
//! ```text
//! book record   @ book_key = sha256(base ‖ quote)
//! bid tree      @ sha256(book_key ‖ 0)   price index @ tree_key + price
//! ask tree      @ sha256(book_key ‖ 1)   price index @ tree_key + price
//! order records @ sha256(tree_key ‖ price) + order_id
//! ```
//!
//! The book owns its store handle (or a `&mut` borrow of a shared one) and
//! a dry-run flag that every store call carries. Nothing is cached across
//! operations except the small book and tree records, which are written
//! back on every mutation.
//!
//! ## Content Hash
//!
//! `hash = sha256(book record ‖ bid tree hash ‖ ask tree hash)`. Tree and
//! list hashes are derived the same way from their own records, so any
//! validator can recompute the hash from persisted records alone.

use primitive_types::{H160, H256, U256};
use ssz_rs::prelude::*;
use tracing::{debug, info};

use crate::codec::{self, h160_to_word, hash_hex, word_to_h160, Word};
use crate::engine::{MatchResult, MatchingEngine};
use crate::error::{BookError, CodecError, Result};
use crate::orderbook::tree::OrderTree;
use crate::store::KeyValueStore;
use crate::types::{Order, OrderStatus, Side};

/// Book metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderBookItem {
    /// Last update time
    pub timestamp: u64,

    /// Last issued order id; ids are never reused
    pub next_order_id: u64,
    pub base_token: H160,
    pub quote_token: H160,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct OrderBookRecord {
    timestamp: u64,
    next_order_id: u64,
    base_token: Word,
    quote_token: Word,
}

impl OrderBookItem {
    pub fn encode(&self) -> std::result::Result<Vec<u8>, CodecError> {
        let record = OrderBookRecord {
            timestamp: self.timestamp,
            next_order_id: self.next_order_id,
            base_token: h160_to_word(self.base_token),
            quote_token: h160_to_word(self.quote_token),
        };
        codec::encode(&record, "order book")
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CodecError> {
        let record: OrderBookRecord = codec::decode(bytes, "order book")?;
        Ok(Self {
            timestamp: record.timestamp,
            next_order_id: record.next_order_id,
            base_token: word_to_h160(&record.base_token),
            quote_token: word_to_h160(&record.quote_token),
        })
    }
}

/// Record key of the book for a pair. Also keys the pair in the
/// versioned state.
pub fn book_key(base_token: H160, quote_token: H160) -> H256 {
    codec::sha256(&[base_token.as_bytes(), quote_token.as_bytes()])
}

/// Store-backed order book for one pair.
#[derive(Debug)]
pub struct OrderBook<S: KeyValueStore> {
    store: S,
    key: H256,
    dry_run: bool,
    pub item: OrderBookItem,
    bids: OrderTree,
    asks: OrderTree,
}

impl<S: KeyValueStore> OrderBook<S> {
    pub fn key_for(base_token: H160, quote_token: H160) -> H256 {
        book_key(base_token, quote_token)
    }

    /// Open the book for a pair, creating it if absent.
    pub fn open(store: S, base_token: H160, quote_token: H160) -> Result<Self> {
        Self::open_with(store, base_token, quote_token, false)
    }

    /// Open with an explicit dry-run flag.
    pub fn open_with(store: S, base_token: H160, quote_token: H160, dry_run: bool) -> Result<Self> {
        let key = Self::key_for(base_token, quote_token);
        let item = match store.get(&key, dry_run)? {
            Some(bytes) => OrderBookItem::decode(&bytes)?,
            None => {
                info!(book = %hash_hex(&key), "creating order book");
                OrderBookItem {
                    base_token,
                    quote_token,
                    ..OrderBookItem::default()
                }
            }
        };
        let bids = OrderTree::open(&store, &key, Side::Buy, dry_run)?;
        let asks = OrderTree::open(&store, &key, Side::Sell, dry_run)?;
        Ok(Self {
            store,
            key,
            dry_run,
            item,
            bids,
            asks,
        })
    }

    /// Open an existing book; absence is [`BookError::OrderBookNotFound`].
    pub fn load(store: S, base_token: H160, quote_token: H160, dry_run: bool) -> Result<Self> {
        let key = Self::key_for(base_token, quote_token);
        if !store.has(&key, dry_run)? {
            return Err(BookError::OrderBookNotFound(key));
        }
        Self::open_with(store, base_token, quote_token, dry_run)
    }

    #[inline]
    pub fn key(&self) -> H256 {
        self.key
    }

    #[inline]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Switch between durable and trial mode. Reloads the book records as
    /// seen through the new mode.
    pub fn set_dry_run(&mut self, dry_run: bool) -> Result<()> {
        self.dry_run = dry_run;
        self.reload()
    }

    /// Re-read book and tree records from the store.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(bytes) = self.store.get(&self.key, self.dry_run)? {
            self.item = OrderBookItem::decode(&bytes)?;
        }
        self.bids = OrderTree::open(&self.store, &self.key, Side::Buy, self.dry_run)?;
        self.asks = OrderTree::open(&self.store, &self.key, Side::Sell, self.dry_run)?;
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn bids(&self) -> &OrderTree {
        &self.bids
    }

    pub fn asks(&self) -> &OrderTree {
        &self.asks
    }

    pub fn tree(&self, side: Side) -> &OrderTree {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Tree and store borrowed together for mutation
    pub(crate) fn side_mut(&mut self, side: Side) -> (&mut OrderTree, &mut S) {
        match side {
            Side::Buy => (&mut self.bids, &mut self.store),
            Side::Sell => (&mut self.asks, &mut self.store),
        }
    }

    #[inline]
    pub fn next_order_id(&self) -> u64 {
        self.item.next_order_id
    }

    /// Issue the next order id
    pub(crate) fn allocate_order_id(&mut self) -> u64 {
        self.item.next_order_id += 1;
        self.item.next_order_id
    }

    pub(crate) fn touch(&mut self, timestamp: u64) {
        self.item.timestamp = self.item.timestamp.max(timestamp);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn best_bid(&self) -> Result<Option<U256>> {
        self.bids.best_price(&self.store, self.dry_run)
    }

    pub fn best_ask(&self) -> Result<Option<U256>> {
        self.asks.best_price(&self.store, self.dry_run)
    }

    pub fn get_order(&self, side: Side, order_id: u64, price: U256) -> Result<Option<Order>> {
        self.tree(side).get_order(&self.store, order_id, price, self.dry_run)
    }

    pub fn volume_at(&self, side: Side, price: U256) -> Result<U256> {
        self.tree(side).volume_at(&self.store, price, self.dry_run)
    }

    /// Aggregated `(price, volume)` levels for one side, best first.
    pub fn depth(&self, side: Side, levels: usize) -> Result<Vec<(U256, U256)>> {
        self.tree(side).depth(&self.store, levels, self.dry_run)
    }

    pub fn hash(&self) -> Result<H256> {
        let item = self.item.encode()?;
        let bids = self.bids.hash(&self.store, self.dry_run)?;
        let asks = self.asks.hash(&self.store, self.dry_run)?;
        Ok(codec::sha256(&[&item, bids.as_bytes(), asks.as_bytes()]))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Match an incoming order; the unfilled part of a limit order rests.
    pub fn process_order(&mut self, order: Order, timestamp: u64) -> Result<MatchResult> {
        MatchingEngine::new().process_order(self, order, timestamp)
    }

    /// Cancel a resting order.
    ///
    /// `request` names the order by side, price and id; its hash must match
    /// the resting order's hash. The order record is kept with status
    /// `Cancelled`. Fails with [`BookError::OrderNotFound`] otherwise.
    pub fn cancel_order(&mut self, request: &Order, timestamp: u64) -> Result<Order> {
        let not_found = BookError::OrderNotFound {
            order_id: request.id,
            price: request.price,
        };
        let resting = match self.get_order(request.side, request.id, request.price)? {
            Some(order) if order.hash == request.hash && !order.status.is_final() => order,
            _ => return Err(not_found),
        };

        let dry_run = self.dry_run;
        let (tree, store) = self.side_mut(request.side);
        let mut node = tree
            .remove_order(store, resting.id, resting.price, dry_run)?
            .ok_or(not_found)?;
        node.order.status = OrderStatus::Cancelled;
        node.order.updated_at = timestamp;
        let list = tree.order_list_or_empty(store, resting.price, dry_run)?;
        list.save_node(store, &node, dry_run)?;

        self.touch(timestamp);
        self.save()?;
        debug!(order_id = resting.id, price = %resting.price, "order cancelled");
        Ok(node.order)
    }

    /// Apply an update to a resting order.
    ///
    /// `old_price` locates the order. A price change re-queues the order at
    /// its new price; a larger quantity loses time priority, a smaller one
    /// keeps it.
    pub fn update_order(&mut self, old_price: U256, mut order: Order, timestamp: u64) -> Result<()> {
        if order.quantity.is_zero() {
            return Err(BookError::InvalidOrder("update to zero quantity".into()));
        }
        order.updated_at = timestamp;
        let dry_run = self.dry_run;
        let (tree, store) = self.side_mut(order.side);
        tree.update_order(store, old_price, order, dry_run)?;
        self.touch(timestamp);
        self.save()
    }

    /// Write the book and tree records.
    pub fn save(&mut self) -> Result<()> {
        let dry_run = self.dry_run;
        self.store.put(self.key, self.item.encode()?, dry_run)?;
        self.bids.save(&mut self.store, dry_run)?;
        self.asks.save(&mut self.store, dry_run)?;
        Ok(())
    }

    /// Persist: durable mode commits the pending batch, dry-run mode replays
    /// the overlay into the backend.
    pub fn commit(&mut self) -> Result<()> {
        self.save()?;
        if self.dry_run {
            self.store.save_dry_run_result()?;
        } else {
            self.store.commit()?;
        }
        debug!(book = %hash_hex(&self.key), dry_run = self.dry_run, "order book committed");
        Ok(())
    }

    /// Throw away every trial write and reload the durable records.
    pub fn discard_dry_run(&mut self) -> Result<()> {
        self.store.init_dry_run();
        self.reload()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn base() -> H160 {
        H160::repeat_byte(0x0B)
    }

    fn quote() -> H160 {
        H160::repeat_byte(0x0C)
    }

    fn create_test_book() -> OrderBook<MemoryStore> {
        OrderBook::open(MemoryStore::memory(), base(), quote()).unwrap()
    }

    fn limit(side: Side, price: u64, quantity: u64) -> Order {
        Order::limit(side, U256::from(price), U256::from(quantity)).with_tokens(base(), quote())
    }

    #[test]
    fn test_book_open_empty() {
        let book = create_test_book();
        assert_eq!(book.best_bid().unwrap(), None);
        assert_eq!(book.best_ask().unwrap(), None);
        assert_eq!(book.next_order_id(), 0);
        assert_eq!(book.item.base_token, base());
    }

    #[test]
    fn test_load_missing_book() {
        let err = OrderBook::load(MemoryStore::memory(), base(), quote(), false).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resting_orders_and_best_prices() {
        let mut book = create_test_book();
        book.process_order(limit(Side::Buy, 99, 10), 1).unwrap();
        book.process_order(limit(Side::Buy, 100, 10), 2).unwrap();
        book.process_order(limit(Side::Sell, 105, 10), 3).unwrap();

        assert_eq!(book.best_bid().unwrap(), Some(U256::from(100u64)));
        assert_eq!(book.best_ask().unwrap(), Some(U256::from(105u64)));
        assert_eq!(book.next_order_id(), 3);
        assert_eq!(book.item.timestamp, 3);
    }

    #[test]
    fn test_cancel_order_keeps_cancelled_record() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Sell, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();

        let cancelled = book.cancel_order(&resting, 2).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(book.asks().volume(), U256::zero());
        assert_eq!(book.asks().num_orders(), 0);
        assert_eq!(book.best_ask().unwrap(), None);

        // Audit record retained
        let record = book.get_order(Side::Sell, resting.id, resting.price).unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_cancel_twice_is_not_found() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Buy, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();
        book.process_order(limit(Side::Buy, 100, 7), 2).unwrap();

        book.cancel_order(&resting, 3).unwrap();
        let volume = book.bids().volume();
        let count = book.bids().num_orders();

        let err = book.cancel_order(&resting, 4).unwrap_err();
        assert!(matches!(err, BookError::OrderNotFound { .. }));
        assert_eq!(book.bids().volume(), volume);
        assert_eq!(book.bids().num_orders(), count);
    }

    #[test]
    fn test_cancel_hash_mismatch() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Buy, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();

        let mut forged = resting.clone();
        forged.hash = H256::repeat_byte(0xFF);
        assert!(book.cancel_order(&forged, 2).unwrap_err().is_not_found());
        assert_eq!(book.bids().num_orders(), 1);
    }

    #[test]
    fn test_update_order_quantity() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Sell, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();

        let mut smaller = resting.clone();
        smaller.quantity = U256::from(4u64);
        book.update_order(resting.price, smaller, 2).unwrap();

        assert_eq!(book.volume_at(Side::Sell, resting.price).unwrap(), U256::from(4u64));
        let stored = book.get_order(Side::Sell, resting.id, resting.price).unwrap().unwrap();
        assert_eq!(stored.updated_at, 2);
    }

    #[test]
    fn test_cancel_last_order_at_level_then_read_record() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Buy, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();
        book.process_order(limit(Side::Buy, 99, 5), 2).unwrap();

        book.cancel_order(&resting, 3).unwrap();
        assert_eq!(book.best_bid().unwrap(), Some(U256::from(99u64)));
        assert_eq!(book.volume_at(Side::Buy, resting.price).unwrap(), U256::zero());

        let record = book.get_order(Side::Buy, resting.id, resting.price).unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.updated_at, 3);
        assert_eq!(record.quantity, U256::from(10u64));

        // Level gone, record kept: a second cancel is still rejected
        assert!(book.cancel_order(&resting, 4).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_order_price_change_requeues() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Sell, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();
        let other = book
            .process_order(limit(Side::Sell, 105, 3), 2)
            .unwrap()
            .order_in_book
            .unwrap();

        let mut moved = resting.clone();
        moved.price = U256::from(105u64);
        moved.quantity = U256::from(6u64);
        book.update_order(resting.price, moved, 3).unwrap();

        assert_eq!(book.best_ask().unwrap(), Some(U256::from(105u64)));
        assert_eq!(book.asks().depth_len(), 1);
        assert_eq!(book.asks().num_orders(), 2);
        assert_eq!(book.asks().volume(), U256::from(9u64));
        assert_eq!(book.volume_at(Side::Sell, U256::from(105u64)).unwrap(), U256::from(9u64));
        assert!(book.get_order(Side::Sell, resting.id, resting.price).unwrap().is_none());

        // Re-queued behind the order already at 105
        let orders = book
            .asks()
            .order_list(book.store(), U256::from(105u64), false)
            .unwrap()
            .orders(book.store(), false)
            .unwrap();
        let ids: Vec<u64> = orders.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![other.id, resting.id]);
    }

    #[test]
    fn test_update_cancelled_order_is_rejected() {
        let mut book = create_test_book();
        let resting = book
            .process_order(limit(Side::Buy, 100, 10), 1)
            .unwrap()
            .order_in_book
            .unwrap();
        book.process_order(limit(Side::Buy, 100, 7), 2).unwrap();
        book.cancel_order(&resting, 3).unwrap();

        let hash = book.hash().unwrap();
        let volume = book.bids().volume();

        // Same price, larger quantity
        let mut grown = resting.clone();
        grown.quantity = U256::from(20u64);
        let err = book.update_order(resting.price, grown, 4).unwrap_err();
        assert!(matches!(err, BookError::OrderNotFound { .. }));

        // New price
        let mut moved = resting.clone();
        moved.price = U256::from(98u64);
        let err = book.update_order(resting.price, moved, 5).unwrap_err();
        assert!(matches!(err, BookError::OrderNotFound { .. }));

        assert_eq!(book.bids().volume(), volume);
        assert_eq!(book.bids().num_orders(), 1);
        assert_eq!(book.bids().depth_len(), 1);
        let record = book.get_order(Side::Buy, resting.id, resting.price).unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        // Rejected before anything was written, timestamp included
        assert_eq!(book.hash().unwrap(), hash);
    }

    #[test]
    fn test_hash_deterministic_across_stores() {
        let mut a = create_test_book();
        let mut b = create_test_book();
        for book in [&mut a, &mut b] {
            book.process_order(limit(Side::Buy, 100, 10), 1).unwrap();
            book.process_order(limit(Side::Sell, 101, 3), 2).unwrap();
        }
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());

        a.process_order(limit(Side::Sell, 100, 1), 3).unwrap();
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_reopen_after_commit() {
        let mut book = create_test_book();
        book.process_order(limit(Side::Buy, 100, 10), 1).unwrap();
        book.commit().unwrap();
        let hash = book.hash().unwrap();

        let store = book.into_store();
        let reopened = OrderBook::load(store, base(), quote(), false).unwrap();
        assert_eq!(reopened.hash().unwrap(), hash);
        assert_eq!(reopened.next_order_id(), 1);
    }

    #[test]
    fn test_borrowed_store() {
        let mut store = MemoryStore::memory();
        {
            let mut book = OrderBook::open(&mut store, base(), quote()).unwrap();
            book.process_order(limit(Side::Buy, 100, 10), 1).unwrap();
            book.commit().unwrap();
        }
        assert!(!store.backend().is_empty());
    }
}
