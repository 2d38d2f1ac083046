//! Versioned, authenticated order state.
//!
//! ## Layout
//!
//! ```text
//! top map:  book key -> hash of ExchangeRecord
//!
//! ExchangeRecord { nonce, last_price, asks_root, bids_root, orders_root }
//!   asks/bids map:  price -> sha256(price ‖ (order id ‖ amount)*)
//!   orders map:     order key -> sha256(item bytes)
//!   item bytes stored content-addressed under their hash
//! ```
//!
//! Exchange objects load lazily on first access from the committed root.
//! Price levels are rebuilt from the live items and checked against the
//! committed ask/bid roots. Only objects touched since the last commit are
//! re-serialized.
//!
//! ## Snapshots
//!
//! Mutations append an undo entry to the [`Journal`] before they apply.
//! [`VersionedStore::revert_to_snapshot`] undoes back to a revision and
//! invalidates every revision taken after it. [`VersionedStore::commit`]
//! writes maps bottom-up (asks, bids, orders, then the top map), commits
//! the store and clears the journal.
//!
//! The store is generic over [`StateItem`], so spot orders and lending
//! items share one implementation.

pub mod item;
pub mod journal;
pub mod merkle;

pub use item::StateItem;
pub use journal::{Journal, JournalEntry, Revision};
pub use merkle::AuthMap;

use std::collections::BTreeMap;

use primitive_types::{H256, U256};
use ssz_rs::prelude::*;
use tracing::{debug, info, trace};

use crate::codec::{self, sha256, u256_to_key, u256_to_word, word_to_u256, Word, EMPTY_KEY};
use crate::error::{BookError, Result};
use crate::orderbook::order_key;
use crate::store::KeyValueStore;
use crate::types::Side;

/// Persisted form of one exchange object
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct ExchangeRecord {
    pub nonce: u64,
    pub last_price: Word,
    pub asks_root: Word,
    pub bids_root: Word,
    pub orders_root: Word,
}

type Levels = BTreeMap<U256, BTreeMap<u64, U256>>;

/// In-memory mirror of one book's state.
#[derive(Debug, Clone)]
struct ExchangeObject<I> {
    nonce: u64,
    last_price: U256,
    bids: Levels,
    asks: Levels,
    orders: BTreeMap<u64, I>,
    dirty: bool,
}

impl<I> Default for ExchangeObject<I> {
    fn default() -> Self {
        Self {
            nonce: 0,
            last_price: U256::zero(),
            bids: Levels::new(),
            asks: Levels::new(),
            orders: BTreeMap::new(),
            dirty: false,
        }
    }
}

/// Serialized object, ready to write
struct Committed {
    record_hash: H256,
    record: Vec<u8>,
    asks: AuthMap,
    bids: AuthMap,
    orders: AuthMap,
    items: Vec<(H256, Vec<u8>)>,
}

fn level_hash(price: U256, level: &BTreeMap<u64, U256>) -> H256 {
    let price_word = u256_to_word(price);
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(level.len() + 1);
    parts.push(price_word.to_vec());
    for (id, amount) in level {
        let mut entry = id.to_be_bytes().to_vec();
        entry.extend_from_slice(&u256_to_word(*amount));
        parts.push(entry);
    }
    let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
    sha256(&refs)
}

fn level_map(levels: &Levels) -> AuthMap {
    let mut map = AuthMap::new();
    for (price, level) in levels {
        map.insert(u256_to_key(*price), level_hash(*price, level));
    }
    map
}

impl<I: StateItem> ExchangeObject<I> {
    fn levels(&self, side: Side) -> &Levels {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Levels {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn rest(&mut self, item: &I) {
        self.levels_mut(item.side())
            .entry(item.price())
            .or_default()
            .insert(item.order_id(), item.quantity());
    }

    fn unrest(&mut self, side: Side, price: U256, order_id: u64) {
        let levels = self.levels_mut(side);
        if let Some(level) = levels.get_mut(&price) {
            level.remove(&order_id);
            if level.is_empty() {
                levels.remove(&price);
            }
        }
    }

    fn best_price(&self, side: Side) -> Option<U256> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    /// Nothing recorded. An empty object is the same as an absent one.
    fn is_empty(&self) -> bool {
        self.nonce == 0 && self.last_price.is_zero() && self.orders.is_empty()
    }

    fn live(&self, order_id: u64) -> Option<&I> {
        self.orders.get(&order_id).filter(|item| item.is_live())
    }

    fn serialize(&self) -> Result<Committed> {
        let asks = level_map(&self.asks);
        let bids = level_map(&self.bids);

        let mut orders = AuthMap::new();
        let mut items = Vec::with_capacity(self.orders.len());
        for (id, item) in &self.orders {
            let bytes = item.encode()?;
            let hash = sha256(&[&bytes]);
            orders.insert(order_key(*id), hash);
            items.push((hash, bytes));
        }

        let record = ExchangeRecord {
            nonce: self.nonce,
            last_price: u256_to_word(self.last_price),
            asks_root: asks.root().0,
            bids_root: bids.root().0,
            orders_root: orders.root().0,
        };
        let record = codec::encode(&record, "exchange record")?;
        Ok(Committed {
            record_hash: sha256(&[&record]),
            record,
            asks,
            bids,
            orders,
            items,
        })
    }
}

/// Journaled, authenticated order state over a [`KeyValueStore`].
#[derive(Debug)]
pub struct VersionedStore<I, S> {
    store: S,
    root: H256,
    top: AuthMap,
    objects: BTreeMap<H256, ExchangeObject<I>>,
    journal: Journal<I>,
}

impl<I: StateItem, S: KeyValueStore> VersionedStore<I, S> {
    /// Empty state
    pub fn new(store: S) -> Self {
        Self {
            store,
            root: EMPTY_KEY,
            top: AuthMap::new(),
            objects: BTreeMap::new(),
            journal: Journal::new(),
        }
    }

    /// State at a committed root. Exchange objects load on first access.
    pub fn open(store: S, root: H256) -> Result<Self> {
        let top = AuthMap::load(&store, &root)?;
        debug!(root = %codec::hash_hex(&root), books = top.len(), "versioned state opened");
        Ok(Self {
            store,
            root,
            top,
            objects: BTreeMap::new(),
            journal: Journal::new(),
        })
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

    /// Root of the last commit
    pub fn root(&self) -> H256 {
        self.root
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    fn load_object(&self, book: &H256) -> Result<ExchangeObject<I>> {
        let record_hash = match self.top.get(book) {
            Some(hash) => hash,
            None => return Ok(ExchangeObject::default()),
        };
        let bytes = self
            .store
            .get(&record_hash, false)?
            .ok_or(BookError::MissingNode(record_hash))?;
        let record: ExchangeRecord = codec::decode(&bytes, "exchange record")?;

        let mut object = ExchangeObject {
            nonce: record.nonce,
            last_price: word_to_u256(&record.last_price),
            ..ExchangeObject::default()
        };
        let orders = AuthMap::load(&self.store, &H256(record.orders_root))?;
        for (_, item_hash) in orders.iter() {
            let bytes = self
                .store
                .get(item_hash, false)?
                .ok_or(BookError::MissingNode(*item_hash))?;
            let item = I::decode(&bytes)?;
            if item.is_live() {
                object.rest(&item);
            }
            object.orders.insert(item.order_id(), item);
        }

        let asks_root = level_map(&object.asks).root();
        if asks_root.0 != record.asks_root {
            return Err(BookError::MissingNode(H256(record.asks_root)));
        }
        let bids_root = level_map(&object.bids).root();
        if bids_root.0 != record.bids_root {
            return Err(BookError::MissingNode(H256(record.bids_root)));
        }
        trace!(book = %codec::hash_hex(book), orders = object.orders.len(), "exchange object loaded");
        Ok(object)
    }

    fn loaded(&mut self, book: H256) -> Result<(&mut ExchangeObject<I>, &mut Journal<I>)> {
        if !self.objects.contains_key(&book) {
            let object = self.load_object(&book)?;
            self.objects.insert(book, object);
        }
        let object = self
            .objects
            .get_mut(&book)
            .ok_or(BookError::OrderBookNotFound(book))?;
        Ok((object, &mut self.journal))
    }

    fn object(&mut self, book: H256) -> Result<&ExchangeObject<I>> {
        Ok(self.loaded(book)?.0)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn nonce(&mut self, book: H256) -> Result<u64> {
        Ok(self.object(book)?.nonce)
    }

    pub fn last_price(&mut self, book: H256) -> Result<U256> {
        Ok(self.object(book)?.last_price)
    }

    /// Any stored item, including cancelled ones
    pub fn get_order(&mut self, book: H256, order_id: u64) -> Result<Option<I>> {
        Ok(self.object(book)?.orders.get(&order_id).cloned())
    }

    pub fn best_price(&mut self, book: H256, side: Side) -> Result<Option<U256>> {
        Ok(self.object(book)?.best_price(side))
    }

    /// Head of the best level on `side`.
    pub fn best_order(&mut self, book: H256, side: Side) -> Result<Option<I>> {
        let object = self.object(book)?;
        let price = match object.best_price(side) {
            Some(price) => price,
            None => return Ok(None),
        };
        let level = object.levels(side).get(&price);
        let head = level.and_then(|level| level.keys().next().copied());
        head.and_then(|id| object.orders.get(&id).cloned())
            .map(Some)
            .ok_or(BookError::EmptyHeadOrder {
                price,
                length: level.map_or(0, |l| l.len() as u64),
            })
    }

    /// Items at one price, oldest first
    pub fn orders_at(&mut self, book: H256, side: Side, price: U256) -> Result<Vec<I>> {
        let object = self.object(book)?;
        let level = match object.levels(side).get(&price) {
            Some(level) => level,
            None => return Ok(Vec::new()),
        };
        level
            .keys()
            .map(|id| {
                object
                    .orders
                    .get(id)
                    .cloned()
                    .ok_or(BookError::OrderNotFound { order_id: *id, price })
            })
            .collect()
    }

    pub fn volume_at(&mut self, book: H256, side: Side, price: U256) -> Result<U256> {
        let object = self.object(book)?;
        Ok(object
            .levels(side)
            .get(&price)
            .map(|level| {
                level
                    .values()
                    .fold(U256::zero(), |acc, amount| acc.saturating_add(*amount))
            })
            .unwrap_or_default())
    }

    /// Prices on `side`, best first
    pub fn prices(&mut self, book: H256, side: Side) -> Result<Vec<U256>> {
        let levels = self.object(book)?.levels(side);
        Ok(match side {
            Side::Buy => levels.keys().rev().copied().collect(),
            Side::Sell => levels.keys().copied().collect(),
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn set_nonce(&mut self, book: H256, nonce: u64) -> Result<()> {
        let (object, journal) = self.loaded(book)?;
        journal.append(JournalEntry::NonceChange {
            book,
            prev: object.nonce,
        });
        object.nonce = nonce;
        object.dirty = true;
        Ok(())
    }

    pub fn set_last_price(&mut self, book: H256, price: U256) -> Result<()> {
        let (object, journal) = self.loaded(book)?;
        journal.append(JournalEntry::PriceChange {
            book,
            prev: object.last_price,
        });
        object.last_price = price;
        object.dirty = true;
        Ok(())
    }

    /// Rest `item` at the tail of its price level.
    pub fn insert_order(&mut self, book: H256, item: I) -> Result<()> {
        let order_id = item.order_id();
        if order_id == 0 {
            return Err(BookError::InvalidOrder("order id not assigned".into()));
        }
        if item.price().is_zero() || item.quantity().is_zero() {
            return Err(BookError::InvalidOrder("zero price or quantity".into()));
        }
        let (object, journal) = self.loaded(book)?;
        if object.orders.contains_key(&order_id) {
            return Err(BookError::InvalidOrder(format!("duplicate order id {order_id}")));
        }

        journal.append(JournalEntry::InsertOrder { book, order_id });
        object.rest(&item);
        object.orders.insert(order_id, item);
        object.dirty = true;
        trace!(order_id, "state order inserted");
        Ok(())
    }

    /// Take a live item off its level. The record stays, marked cancelled.
    pub fn cancel_order(&mut self, book: H256, order_id: u64) -> Result<I> {
        let (object, journal) = self.loaded(book)?;
        let prev = object
            .live(order_id)
            .cloned()
            .ok_or(BookError::OrderNotFound {
                order_id,
                price: U256::zero(),
            })?;

        journal.append(JournalEntry::CancelOrder {
            book,
            prev: prev.clone(),
        });
        object.unrest(prev.side(), prev.price(), order_id);
        let mut cancelled = prev;
        cancelled.mark_cancelled();
        object.orders.insert(order_id, cancelled.clone());
        object.dirty = true;
        debug!(order_id, "state order cancelled");
        Ok(cancelled)
    }

    /// Reduce a live item's quantity. At zero the item leaves the state.
    pub fn sub_amount(&mut self, book: H256, order_id: u64, amount: U256) -> Result<I> {
        let (object, journal) = self.loaded(book)?;
        let prev = object
            .live(order_id)
            .cloned()
            .ok_or(BookError::OrderNotFound {
                order_id,
                price: U256::zero(),
            })?;
        let remaining = prev
            .quantity()
            .checked_sub(amount)
            .ok_or(BookError::Overflow("sub amount exceeds quantity"))?;

        journal.append(JournalEntry::SubAmount {
            book,
            prev: prev.clone(),
            amount,
        });
        let mut updated = prev;
        updated.set_quantity(remaining);
        if remaining.is_zero() {
            object.unrest(updated.side(), updated.price(), order_id);
            object.orders.remove(&order_id);
        } else {
            object.rest(&updated);
            object.orders.insert(order_id, updated.clone());
        }
        object.dirty = true;
        Ok(updated)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot(&mut self) -> usize {
        self.journal.snapshot()
    }

    /// Undo every change since revision `id`.
    pub fn revert_to_snapshot(&mut self, id: usize) -> Result<()> {
        let undone = self.journal.unwind(id).ok_or(BookError::RevisionNotFound(id))?;
        let count = undone.len();
        for entry in undone {
            let book = entry.book();
            let object = self
                .objects
                .get_mut(&book)
                .ok_or(BookError::OrderBookNotFound(book))?;
            match entry {
                JournalEntry::InsertOrder { order_id, .. } => {
                    if let Some(item) = object.orders.remove(&order_id) {
                        object.unrest(item.side(), item.price(), order_id);
                    }
                }
                JournalEntry::CancelOrder { prev, .. } => {
                    object.rest(&prev);
                    object.orders.insert(prev.order_id(), prev);
                }
                JournalEntry::SubAmount { prev, amount, .. } => {
                    trace!(order_id = prev.order_id(), %amount, "undo sub amount");
                    object.rest(&prev);
                    object.orders.insert(prev.order_id(), prev);
                }
                JournalEntry::NonceChange { prev, .. } => object.nonce = prev,
                JournalEntry::PriceChange { prev, .. } => object.last_price = prev,
            }
            object.dirty = true;
        }
        debug!(revision = id, undone = count, "state reverted");
        Ok(())
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Root the next commit would produce, without writing anything.
    pub fn intermediate_root(&self) -> Result<H256> {
        let mut top = self.top.clone();
        for (book, object) in self.objects.iter().filter(|(_, o)| o.dirty) {
            if object.is_empty() {
                top.remove(book);
            } else {
                top.insert(*book, object.serialize()?.record_hash);
            }
        }
        Ok(top.root())
    }

    /// Write touched objects bottom-up and commit the store.
    pub fn commit(&mut self) -> Result<H256> {
        let mut written = 0usize;
        for (book, object) in self.objects.iter_mut().filter(|(_, o)| o.dirty) {
            object.dirty = false;
            if object.is_empty() {
                self.top.remove(book);
                continue;
            }
            let committed = object.serialize()?;
            committed.asks.commit(&mut self.store)?;
            committed.bids.commit(&mut self.store)?;
            for (hash, bytes) in committed.items {
                self.store.put(hash, bytes, false)?;
            }
            committed.orders.commit(&mut self.store)?;
            self.store.put(committed.record_hash, committed.record, false)?;
            self.top.insert(*book, committed.record_hash);
            written += 1;
        }
        self.root = self.top.commit(&mut self.store)?;
        self.store.commit()?;
        self.journal.reset();
        info!(root = %codec::hash_hex(&self.root), books = written, "state committed");
        Ok(self.root)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
