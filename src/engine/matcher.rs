//! Price-time priority matching over a store-backed [`OrderBook`].
//!
//! ## Algorithm
//!
//! ```text
//! process_order:
//!   issue id, stamp time
//!   market -> while qty > 0 and opposing side not empty: consume best list
//!             remainder is dropped
//!   limit  -> while qty > 0 and best opposing price acceptable: consume
//!             remainder rests on the order's own side
//!
//! consume list (head first):
//!   qty <  head.qty  -> maker reduced in place, taker done
//!   qty == head.qty  -> maker removed, taker done
//!   qty >  head.qty  -> maker removed, continue with next head
//! ```
//!
//! Every fill emits one [`Trade`] at the maker's price.

use primitive_types::U256;
use tracing::{debug, trace};

use crate::error::{BookError, Result};
use crate::orderbook::OrderBook;
use crate::store::KeyValueStore;
use crate::types::{Order, OrderStatus, OrderType, Trade};

/// Outcome of one incoming order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    /// Fills in execution order
    pub trades: Vec<Trade>,

    /// The resting remainder of a limit order
    pub order_in_book: Option<Order>,

    /// Unfilled market quantity, discarded
    pub dropped: U256,

    pub fully_filled: bool,
}

impl MatchResult {
    pub fn filled_quantity(&self) -> U256 {
        self.trades
            .iter()
            .fold(U256::zero(), |acc, trade| acc.saturating_add(trade.quantity))
    }
}

/// Matching engine with running counters.
#[derive(Debug, Default, Clone)]
pub struct MatchingEngine {
    orders_processed: u64,
    trades_executed: u64,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders_processed(&self) -> u64 {
        self.orders_processed
    }

    pub fn trades_executed(&self) -> u64 {
        self.trades_executed
    }

    /// Match `order` against `book`.
    ///
    /// The order receives the book's next id. A limit remainder rests under
    /// that id. Errors leave the book's trial writes in the store; callers
    /// running in durable mode must not commit after an error.
    pub fn process_order<S: KeyValueStore>(
        &mut self,
        book: &mut OrderBook<S>,
        mut order: Order,
        timestamp: u64,
    ) -> Result<MatchResult> {
        if order.quantity.is_zero() {
            return Err(BookError::InvalidOrder("zero quantity".into()));
        }
        if order.order_type == OrderType::Limit && order.price.is_zero() {
            return Err(BookError::InvalidOrder("limit order with zero price".into()));
        }

        book.touch(timestamp);
        order.id = book.allocate_order_id();
        order.created_at = timestamp;
        order.updated_at = timestamp;

        let mut result = MatchResult::default();
        match order.order_type {
            OrderType::Market => self.process_market_order(book, &mut order, timestamp, &mut result)?,
            OrderType::Limit => self.process_limit_order(book, &mut order, timestamp, &mut result)?,
        }
        book.save()?;

        self.orders_processed += 1;
        self.trades_executed += result.trades.len() as u64;
        result.fully_filled = order.quantity.is_zero();
        debug!(
            order_id = order.id,
            side = order.side.as_str(),
            trades = result.trades.len(),
            resting = result.order_in_book.is_some(),
            "order processed"
        );
        Ok(result)
    }

    fn process_market_order<S: KeyValueStore>(
        &mut self,
        book: &mut OrderBook<S>,
        order: &mut Order,
        timestamp: u64,
        result: &mut MatchResult,
    ) -> Result<()> {
        let opposing = order.side.opposite();
        while !order.quantity.is_zero() {
            let best = book.tree(opposing).best_list(book.store(), book.dry_run())?;
            let price = match best {
                Some(list) => list.price(),
                None => break,
            };
            self.process_order_list(book, price, order, timestamp, result)?;
        }
        if !order.quantity.is_zero() {
            // Market orders never rest and leave no reject for the tail
            debug!(order_id = order.id, dropped = %order.quantity, "market order remainder dropped");
            result.dropped = order.quantity;
        }
        Ok(())
    }

    fn process_limit_order<S: KeyValueStore>(
        &mut self,
        book: &mut OrderBook<S>,
        order: &mut Order,
        timestamp: u64,
        result: &mut MatchResult,
    ) -> Result<()> {
        let opposing = order.side.opposite();
        while !order.quantity.is_zero() {
            let best = book.tree(opposing).best_list(book.store(), book.dry_run())?;
            let price = match best {
                Some(list) if order.side.accepts(order.price, list.price()) => list.price(),
                _ => break,
            };
            self.process_order_list(book, price, order, timestamp, result)?;
        }

        if !order.quantity.is_zero() {
            order.status = if result.trades.is_empty() {
                OrderStatus::Open
            } else {
                OrderStatus::PartialFilled
            };
            let dry_run = book.dry_run();
            let (tree, store) = book.side_mut(order.side);
            tree.insert_order(store, order.clone(), dry_run)?;
            trace!(order_id = order.id, price = %order.price, quantity = %order.quantity, "order resting");
            result.order_in_book = Some(order.clone());
        }
        Ok(())
    }

    /// Consume the opposing list at `price` head first until the taker is
    /// filled or the list is exhausted.
    pub fn process_order_list<S: KeyValueStore>(
        &mut self,
        book: &mut OrderBook<S>,
        price: U256,
        taker: &mut Order,
        timestamp: u64,
        result: &mut MatchResult,
    ) -> Result<()> {
        let dry_run = book.dry_run();
        let (tree, store) = book.side_mut(taker.side.opposite());

        while !taker.quantity.is_zero() {
            let list = match tree.price_list(store, price, dry_run)? {
                Some(list) if !list.is_empty() => list,
                _ => break,
            };
            let maker = list
                .head(store, dry_run)?
                .ok_or(BookError::EmptyHeadOrder {
                    price,
                    length: list.len(),
                })?
                .order;

            let traded = if taker.quantity < maker.quantity {
                tree.fill_order(store, maker.id, price, taker.quantity, timestamp, dry_run)?;
                taker.quantity
            } else {
                // The head was just read from this list, so it must unlink
                tree.remove_order(store, maker.id, price, dry_run)?
                    .ok_or(BookError::EmptyHeadOrder {
                        price,
                        length: list.len(),
                    })?;
                list.delete_order(store, maker.id, dry_run)?;
                maker.quantity
            };

            taker.fill(traded);
            taker.updated_at = timestamp;
            trace!(maker = maker.id, taker = taker.id, %price, quantity = %traded, "fill");
            result.trades.push(Trade::between(taker, &maker, traded, timestamp));
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
