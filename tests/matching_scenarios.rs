//! End-to-end matching scenarios.
//!
//! Each test drives a public entry point (the store-backed `OrderBook` or the
//! settlement-aware `OrderProcessor`) through a short, hand-checked sequence.
//!
//! ```bash
//! cargo test --test matching_scenarios
//! ```

use chainbook::accounts::Relayer;
use chainbook::{
    AccountState, KeyValueStore, MemoryAccounts, MemoryStore, Order, OrderBook, OrderProcessor, OrderStatus,
    RejectReason, Side, VersionedStore,
};
use primitive_types::{H160, H256, U256};

const BASE: H160 = H160([0x0B; 20]);
const QUOTE: H160 = H160([0x0C; 20]);
const RELAYER: H160 = H160([0x0E; 20]);
const OWNER: H160 = H160([0x0F; 20]);
const ALICE: H160 = H160([0x01; 20]);
const BOB: H160 = H160([0x02; 20]);

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn u(value: u64) -> U256 {
    U256::from(value)
}

fn create_test_book() -> OrderBook<MemoryStore> {
    OrderBook::open(MemoryStore::memory(), BASE, QUOTE).unwrap()
}

fn limit(side: Side, price: u64, quantity: u64) -> Order {
    Order::limit(side, u(price), u(quantity))
}

fn create_test_accounts(fee_rate: u64) -> MemoryAccounts {
    let mut accounts = MemoryAccounts::new();
    accounts.set_token_decimals(BASE, 0);
    accounts.register_relayer(
        RELAYER,
        Relayer {
            owner: OWNER,
            fee_rate: u(fee_rate),
            deposit: u(1_000),
        },
    );
    accounts.set_balance(ALICE, BASE, u(2_000));
    accounts.set_balance(BOB, QUOTE, u(1_000_000));
    accounts
}

fn signed(side: Side, price: u64, quantity: u64, user: H160, nonce: u64) -> Order {
    limit(side, price, quantity)
        .with_tokens(BASE, QUOTE)
        .with_user(user)
        .with_exchange(RELAYER)
        .with_nonce(nonce)
}

// ============================================================================
// BOOK SCENARIOS
// ============================================================================

/// Asks at 100 and 99, a bid for 1600 at 101 takes the better price first.
#[test]
fn scenario_better_price_consumed_first() {
    let mut book = create_test_book();

    let a = book.process_order(limit(Side::Sell, 100, 1_000), 1).unwrap();
    assert!(a.trades.is_empty());
    assert_eq!(book.asks().depth_len(), 1);
    let a = a.order_in_book.unwrap();

    let b = book.process_order(limit(Side::Sell, 99, 1_000), 2).unwrap();
    let b = b.order_in_book.unwrap();

    let c = book.process_order(limit(Side::Buy, 101, 1_600), 3).unwrap();
    assert_eq!(c.trades.len(), 2);
    assert_eq!(c.trades[0].maker_order_id, b.id);
    assert_eq!(c.trades[0].quantity, u(1_000));
    assert_eq!(c.trades[0].price, u(99));
    assert_eq!(c.trades[1].maker_order_id, a.id);
    assert_eq!(c.trades[1].quantity, u(600));
    assert!(c.fully_filled);
    assert!(c.order_in_book.is_none());

    let resting = book.get_order(Side::Sell, a.id, u(100)).unwrap().unwrap();
    assert_eq!(resting.quantity, u(400));
    assert_eq!(book.asks().depth_len(), 1);
    assert_eq!(book.asks().volume(), u(400));
    assert_eq!(book.bids().num_orders(), 0);
}

/// A smaller bid leaves the ask resting with the difference.
#[test]
fn scenario_partial_fill_of_resting_ask() {
    let mut book = create_test_book();
    let ask = book.process_order(limit(Side::Sell, 100, 1_000), 1).unwrap();
    let ask = ask.order_in_book.unwrap();

    let bid = book.process_order(limit(Side::Buy, 101, 900), 2).unwrap();
    assert_eq!(bid.trades.len(), 1);
    assert_eq!(bid.trades[0].quantity, u(900));
    assert_eq!(bid.trades[0].price, u(100));

    let resting = book.get_order(Side::Sell, ask.id, u(100)).unwrap().unwrap();
    assert_eq!(resting.quantity, u(100));
    assert_eq!(resting.status, OrderStatus::PartialFilled);
    assert_eq!(book.volume_at(Side::Sell, u(100)).unwrap(), u(100));
}

/// A market bid sweeps the asks and the unfilled tail is dropped, not queued.
#[test]
fn scenario_market_remainder_dropped() {
    let mut book = create_test_book();
    book.process_order(limit(Side::Sell, 98, 1_000), 1).unwrap();
    book.process_order(limit(Side::Sell, 99, 1_000), 1).unwrap();

    let result = book.process_order(Order::market(Side::Buy, u(2_500)), 2).unwrap();
    assert_eq!(result.trades.len(), 2);
    assert!(result.trades.iter().all(|t| t.quantity == u(1_000)));
    assert_eq!(result.trades[0].price, u(98));
    assert_eq!(result.dropped, u(500));
    assert!(result.order_in_book.is_none());
    assert!(!result.fully_filled);

    assert!(book.asks().is_empty());
    assert!(book.bids().is_empty());
    assert_eq!(book.best_ask().unwrap(), None);
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn fifo_within_price_level() {
    let mut book = create_test_book();
    let ids: Vec<u64> = (0..5)
        .map(|i| {
            book.process_order(limit(Side::Buy, 50, 10 + i), i)
                .unwrap()
                .order_in_book
                .unwrap()
                .id
        })
        .collect();

    let result = book.process_order(limit(Side::Sell, 50, 1_000), 10).unwrap();
    let makers: Vec<u64> = result.trades.iter().map(|t| t.maker_order_id).collect();
    assert_eq!(makers, ids);
}

#[test]
fn list_volume_conservation() {
    let mut book = create_test_book();
    for quantity in [300u64, 200, 500, 100] {
        book.process_order(limit(Side::Sell, 70, quantity), 1).unwrap();
    }
    let before = book.volume_at(Side::Sell, u(70)).unwrap();

    let result = book.process_order(limit(Side::Buy, 70, 650), 2).unwrap();
    let traded = result.trades.iter().fold(U256::zero(), |acc, t| acc + t.quantity);
    let after = book.volume_at(Side::Sell, u(70)).unwrap();

    assert_eq!(traded, u(650));
    assert_eq!(before - after, traded);
    assert_eq!(book.asks().volume(), after);
}

#[test]
fn cancel_is_idempotent() {
    let mut book = create_test_book();
    let keep = book.process_order(limit(Side::Buy, 40, 25), 1).unwrap();
    let target = book.process_order(limit(Side::Buy, 40, 75), 1).unwrap();
    let target = target.order_in_book.unwrap();
    assert!(keep.order_in_book.is_some());

    let cancelled = book.cancel_order(&target, 2).unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(book.bids().volume(), u(25));
    assert_eq!(book.bids().num_orders(), 1);

    let err = book.cancel_order(&target, 3).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(book.bids().volume(), u(25));
    assert_eq!(book.bids().num_orders(), 1);
}

/// Cancelling the only order at a price removes the level but keeps the
/// cancelled record readable, and a later update of it is refused.
#[test]
fn cancel_last_order_at_level_keeps_audit_record() {
    let mut book = create_test_book();
    let target = book.process_order(limit(Side::Sell, 120, 40), 1).unwrap();
    let target = target.order_in_book.unwrap();
    book.process_order(limit(Side::Sell, 125, 10), 1).unwrap();

    book.cancel_order(&target, 2).unwrap();
    assert_eq!(book.best_ask().unwrap(), Some(u(125)));
    assert_eq!(book.asks().depth_len(), 1);

    let record = book.get_order(Side::Sell, target.id, u(120)).unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Cancelled);
    assert_eq!(record.quantity, u(40));

    let hash = book.hash().unwrap();
    let mut revived = target.clone();
    revived.quantity = u(60);
    assert!(book.update_order(u(120), revived, 3).unwrap_err().is_not_found());
    assert!(book.cancel_order(&target, 3).unwrap_err().is_not_found());
    assert_eq!(book.hash().unwrap(), hash);
    assert_eq!(book.asks().num_orders(), 1);
}

/// Moving a resting bid to a new price lets it trade there and only there.
#[test]
fn update_price_moves_order_between_levels() {
    let mut book = create_test_book();
    let bid = book.process_order(limit(Side::Buy, 90, 30), 1).unwrap();
    let bid = bid.order_in_book.unwrap();

    let mut moved = bid.clone();
    moved.price = u(95);
    book.update_order(u(90), moved, 2).unwrap();
    assert_eq!(book.best_bid().unwrap(), Some(u(95)));
    assert_eq!(book.volume_at(Side::Buy, u(90)).unwrap(), U256::zero());
    assert_eq!(book.bids().volume(), u(30));
    assert_eq!(book.bids().num_orders(), 1);

    let result = book.process_order(limit(Side::Sell, 95, 10), 3).unwrap();
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].maker_order_id, bid.id);
    assert_eq!(result.trades[0].price, u(95));

    let maker = book.get_order(Side::Buy, bid.id, u(95)).unwrap().unwrap();
    assert_eq!(maker.quantity, u(20));
    assert_eq!(maker.status, OrderStatus::PartialFilled);
}

/// A cancelled order cannot be moved back onto the book at another price.
#[test]
fn update_price_of_cancelled_order_refused() {
    let mut book = create_test_book();
    let target = book.process_order(limit(Side::Buy, 90, 30), 1).unwrap();
    let target = target.order_in_book.unwrap();
    book.process_order(limit(Side::Buy, 90, 5), 1).unwrap();
    book.cancel_order(&target, 2).unwrap();

    let mut moved = target.clone();
    moved.price = u(95);
    let err = book.update_order(u(90), moved, 3).unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(book.best_bid().unwrap(), Some(u(90)));
    assert_eq!(book.bids().depth_len(), 1);
    assert_eq!(book.bids().volume(), u(5));
    assert!(book.get_order(Side::Buy, target.id, u(95)).unwrap().is_none());
    let record = book.get_order(Side::Buy, target.id, u(90)).unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Cancelled);
}

#[test]
fn dry_run_isolation() {
    let mut store = MemoryStore::memory();
    let keys: Vec<H256> = (1..=4u8).map(H256::repeat_byte).collect();
    for key in &keys {
        store.put(*key, key.as_bytes().to_vec(), false).unwrap();
    }
    store.commit().unwrap();
    let durable = store.backend().entries();

    store.put(keys[0], vec![0xFF], true).unwrap();
    store.delete(&keys[1], true).unwrap();
    store.put(H256::repeat_byte(9), vec![9], true).unwrap();
    assert_eq!(store.get(&keys[0], true).unwrap(), Some(vec![0xFF]));
    assert_eq!(store.get(&keys[1], true).unwrap(), None);

    store.init_dry_run();
    assert_eq!(store.backend().entries(), durable);
    assert_eq!(store.get(&keys[1], true).unwrap(), Some(keys[1].as_bytes().to_vec()));
}

#[test]
fn dry_run_book_leaves_backend() {
    let mut book = OrderBook::open_with(MemoryStore::memory(), BASE, QUOTE, true).unwrap();
    book.process_order(limit(Side::Sell, 10, 5), 1).unwrap();
    book.process_order(limit(Side::Buy, 10, 2), 1).unwrap();
    assert!(book.store().backend().is_empty());

    book.commit().unwrap();
    assert!(!book.store().backend().is_empty());
    assert_eq!(book.store().dry_run_len(), 0);
}

// ============================================================================
// SETTLEMENT SCENARIOS
// ============================================================================

/// The first book scenario again, now moving balances and fees.
#[test]
fn scenario_settled_two_level_sweep() {
    let mut accounts = create_test_accounts(10);
    let mut state: VersionedStore<Order, _> = VersionedStore::new(MemoryStore::memory());
    let mut processor = OrderProcessor::default();

    processor
        .apply_order(&mut state, &mut accounts, signed(Side::Sell, 100, 1_000, ALICE, 0), 1)
        .unwrap();
    processor
        .apply_order(&mut state, &mut accounts, signed(Side::Sell, 99, 1_000, ALICE, 1), 2)
        .unwrap();
    let execution = processor
        .apply_order(&mut state, &mut accounts, signed(Side::Buy, 101, 1_600, BOB, 0), 3)
        .unwrap();

    assert_eq!(execution.order_id, 3);
    assert_eq!(execution.trades.len(), 2);
    assert_eq!(execution.trades[0].maker_order_id, 2);
    assert_eq!(execution.trades[1].maker_order_id, 1);
    assert!(execution.rejects.is_empty());

    // 99_000 and 60_000 of quote, 0.1% fee on each side
    assert_eq!(accounts.balance(BOB, BASE), u(1_600));
    assert_eq!(accounts.balance(BOB, QUOTE), u(1_000_000 - 99_099 - 60_060));
    assert_eq!(accounts.balance(ALICE, BASE), u(400));
    assert_eq!(accounts.balance(ALICE, QUOTE), u(98_901 + 59_940));
    assert_eq!(accounts.balance(OWNER, QUOTE), u(2 * (99 + 60)));
    assert_eq!(accounts.total_supply(QUOTE), u(1_000_000));
    assert_eq!(accounts.nonce(BOB), 1);

    let book = chainbook::orderbook::book_key(BASE, QUOTE);
    let resting = state.get_order(book, 1).unwrap().unwrap();
    assert_eq!(resting.quantity, u(400));
    assert_eq!(state.last_price(book).unwrap(), u(100));
}

/// A stale nonce is rejected without touching the book or the nonce.
#[test]
fn scenario_replayed_order_rejected() {
    let mut accounts = create_test_accounts(0);
    let mut state: VersionedStore<Order, _> = VersionedStore::new(MemoryStore::memory());
    let mut processor = OrderProcessor::default();

    let order = signed(Side::Sell, 100, 10, ALICE, 0);
    processor.apply_order(&mut state, &mut accounts, order.clone(), 1).unwrap();
    let root = state.intermediate_root().unwrap();

    let replay = processor.apply_order(&mut state, &mut accounts, order.clone(), 2).unwrap();
    assert_eq!(replay.rejects.len(), 1);
    assert_eq!(replay.rejects[0].reason, RejectReason::NonceTooLow);
    assert_eq!(accounts.nonce(ALICE), 1);
    assert_eq!(state.intermediate_root().unwrap(), root);
}

/// Validation failures reject the order but still consume the nonce.
#[test]
fn scenario_unfunded_order_consumes_nonce() {
    let mut accounts = create_test_accounts(0);
    let mut state: VersionedStore<Order, _> = VersionedStore::new(MemoryStore::memory());
    let mut processor = OrderProcessor::default();

    let execution = processor
        .apply_order(&mut state, &mut accounts, signed(Side::Sell, 100, 5_000, ALICE, 0), 1)
        .unwrap();
    assert_eq!(execution.rejects[0].reason, RejectReason::InsufficientBalance);
    assert!(execution.order_in_book.is_none());
    assert_eq!(accounts.nonce(ALICE), 1);
    assert_eq!(processor.orders_rejected(), 1);
}
