//! Snapshot and revert behavior of the versioned state.
//!
//! A revert must leave the state bit-identical to the moment the snapshot
//! was taken: same root, and after a commit, the same stored records.
//!
//! ```bash
//! cargo test --test state_revert -- --nocapture
//! ```

use chainbook::error::BookError;
use chainbook::types::{LendingItem, LendingSide};
use chainbook::{MemoryStore, Order, OrderStatus, Side, StateItem, VersionedStore};
use primitive_types::{H256, U256};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const BOOK_A: H256 = H256([0xA1; 32]);
const BOOK_B: H256 = H256([0xB2; 32]);

fn create_test_order(id: u64, side: Side, price: u64, quantity: u64) -> Order {
    let mut order = Order::limit(side, U256::from(price), U256::from(quantity));
    order.id = id;
    order.status = OrderStatus::Open;
    order
}

/// Deterministic starting state on one book.
fn build_prefix(state: &mut VersionedStore<Order, MemoryStore>) {
    for id in 1..=6u64 {
        let side = if id % 2 == 0 { Side::Buy } else { Side::Sell };
        let price = if side == Side::Buy { 90 + id } else { 110 + id };
        state.insert_order(BOOK_A, create_test_order(id, side, price, 10 * id)).unwrap();
    }
    state.set_nonce(BOOK_A, 6).unwrap();
    state.set_last_price(BOOK_A, U256::from(100u64)).unwrap();
}

/// Apply `count` random mutations over both books. Returns how many succeeded.
fn random_mutations(state: &mut VersionedStore<Order, MemoryStore>, seed: u64, count: usize) -> usize {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut next_id = 100u64;
    let mut applied = 0;

    for _ in 0..count {
        let book = if rng.gen_bool(0.7) { BOOK_A } else { BOOK_B };
        let outcome = match rng.gen_range(0..5) {
            0 => {
                next_id += 1;
                let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                let price = rng.gen_range(80..=130u64);
                let quantity = rng.gen_range(1..=50u64);
                state.insert_order(book, create_test_order(next_id, side, price, quantity))
            }
            1 => {
                let id = rng.gen_range(1..=next_id);
                match state.get_order(book, id).unwrap() {
                    Some(order) if order.is_live() => {
                        let amount = rng.gen_range(1..=order.quantity.low_u64());
                        state.sub_amount(book, id, U256::from(amount)).map(|_| ())
                    }
                    _ => continue,
                }
            }
            2 => {
                let id = rng.gen_range(1..=next_id);
                state.cancel_order(book, id).map(|_| ())
            }
            3 => {
                let nonce = state.nonce(book).unwrap();
                state.set_nonce(book, nonce + 1)
            }
            _ => state.set_last_price(book, U256::from(rng.gen_range(80..=130u64))),
        };
        if outcome.is_ok() {
            applied += 1;
        }
    }
    applied
}

// ============================================================================
// ROUND TRIP TESTS
// ============================================================================

/// Revert, commit, and compare byte for byte with a replica that never saw
/// the reverted mutations.
#[test]
fn revert_matches_untouched_replica() {
    for seed in 0..8u64 {
        let mut touched = VersionedStore::new(MemoryStore::memory());
        let mut replica = VersionedStore::new(MemoryStore::memory());
        build_prefix(&mut touched);
        build_prefix(&mut replica);

        let before = touched.intermediate_root().unwrap();
        let revision = touched.snapshot();
        let applied = random_mutations(&mut touched, seed, 60);
        assert!(applied > 0);

        touched.revert_to_snapshot(revision).unwrap();
        assert_eq!(touched.intermediate_root().unwrap(), before, "seed {seed}");

        let root = touched.commit().unwrap();
        assert_eq!(root, replica.commit().unwrap(), "seed {seed}");
        assert_eq!(
            touched.store().backend().entries(),
            replica.store().backend().entries(),
            "seed {seed}"
        );
    }
}

/// A book first touched after the snapshot disappears again on revert.
#[test]
fn revert_forgets_new_book() {
    let mut state = VersionedStore::new(MemoryStore::memory());
    build_prefix(&mut state);
    let before = state.intermediate_root().unwrap();

    let revision = state.snapshot();
    state.insert_order(BOOK_B, create_test_order(1, Side::Buy, 50, 5)).unwrap();
    state.set_nonce(BOOK_B, 1).unwrap();
    state.revert_to_snapshot(revision).unwrap();

    assert_eq!(state.intermediate_root().unwrap(), before);
    assert_eq!(state.nonce(BOOK_B).unwrap(), 0);
    assert!(state.best_order(BOOK_B, Side::Buy).unwrap().is_none());
}

#[test]
fn nested_snapshots() {
    let mut state = VersionedStore::new(MemoryStore::memory());
    build_prefix(&mut state);

    let root0 = state.intermediate_root().unwrap();
    let first = state.snapshot();
    random_mutations(&mut state, 1, 20);

    let root1 = state.intermediate_root().unwrap();
    let second = state.snapshot();
    random_mutations(&mut state, 2, 20);

    state.revert_to_snapshot(second).unwrap();
    assert_eq!(state.intermediate_root().unwrap(), root1);

    state.revert_to_snapshot(first).unwrap();
    assert_eq!(state.intermediate_root().unwrap(), root0);

    // Reverting past a revision invalidates the ones after it
    let err = state.revert_to_snapshot(second).unwrap_err();
    assert!(matches!(err, BookError::RevisionNotFound(id) if id == second));
}

#[test]
fn revert_after_reopen() {
    let mut state = VersionedStore::new(MemoryStore::memory());
    build_prefix(&mut state);
    let root = state.commit().unwrap();

    let mut reopened: VersionedStore<Order, _> = VersionedStore::open(state.into_store(), root).unwrap();
    assert_eq!(reopened.intermediate_root().unwrap(), root);

    let revision = reopened.snapshot();
    random_mutations(&mut reopened, 5, 40);
    reopened.revert_to_snapshot(revision).unwrap();

    assert_eq!(reopened.intermediate_root().unwrap(), root);
    assert_eq!(reopened.commit().unwrap(), root);
    assert_eq!(reopened.nonce(BOOK_A).unwrap(), 6);
}

// ============================================================================
// LENDING ITEMS
// ============================================================================

fn create_test_lending(id: u64, side: LendingSide, interest: u64, quantity: u64) -> LendingItem {
    let mut item = LendingItem::new(side, U256::from(interest), U256::from(quantity), 30);
    item.id = id;
    item.status = OrderStatus::Open;
    item
}

#[test]
fn lending_state_round_trip() {
    let mut state: VersionedStore<LendingItem, _> = VersionedStore::new(MemoryStore::memory());
    state.insert_order(BOOK_A, create_test_lending(1, LendingSide::Invest, 8, 100)).unwrap();
    state.insert_order(BOOK_A, create_test_lending(2, LendingSide::Invest, 6, 50)).unwrap();
    state.insert_order(BOOK_A, create_test_lending(3, LendingSide::Borrow, 5, 70)).unwrap();
    state.set_nonce(BOOK_A, 3).unwrap();

    // Invest offers rest on the ask side, cheapest interest first
    assert_eq!(state.best_price(BOOK_A, Side::Sell).unwrap(), Some(U256::from(6u64)));
    assert_eq!(state.best_order(BOOK_A, Side::Buy).unwrap().unwrap().id, 3);
    let root = state.commit().unwrap();

    let revision = state.snapshot();
    state.sub_amount(BOOK_A, 2, U256::from(50u64)).unwrap();
    state.cancel_order(BOOK_A, 3).unwrap();
    assert_eq!(state.best_price(BOOK_A, Side::Sell).unwrap(), Some(U256::from(8u64)));
    assert!(state.best_order(BOOK_A, Side::Buy).unwrap().is_none());

    state.revert_to_snapshot(revision).unwrap();
    assert_eq!(state.intermediate_root().unwrap(), root);
    assert_eq!(state.get_order(BOOK_A, 2).unwrap().unwrap().quantity, U256::from(50u64));

    let mut reopened: VersionedStore<LendingItem, _> = VersionedStore::open(state.into_store(), root).unwrap();
    assert_eq!(reopened.volume_at(BOOK_A, Side::Sell, U256::from(8u64)).unwrap(), U256::from(100u64));
    assert_eq!(reopened.get_order(BOOK_A, 1).unwrap().unwrap().term, 30);
}
