//! Order lists: the FIFO queue of orders at one price.
//!
//! ## Design
//!
//! An `OrderList` is the value stored under its price in the order tree's
//! red-black index. The queue itself is intrusive: each order record
//! carries `next`/`prev` links, and the list item only holds the head,
//! tail, length and aggregate volume.
//!
//! ## Queue Structure
//!
//! ```text
//! head (oldest) <-> order2 <-> order3 <-> tail (newest)
//! ```
//!
//! - New orders are appended at the tail
//! - Matching consumes orders from the head
//! - Any order can be unlinked by id
//!
//! ## Keys
//!
//! Order `id` lives at store key `list_slot + id`, where
//! `list_slot = sha256(tree_key ‖ price)`. Lists of different prices, sides
//! or books never share keys.
//!
//! The list item is not written by these methods. The owning tree persists
//! it after every mutation.

use primitive_types::{H256, U256};
use ssz_rs::prelude::*;
use tracing::trace;

use crate::codec::{self, key_to_u256, slot_key, u256_to_word, word_to_u256, Word, EMPTY_KEY};
use crate::error::{BookError, CodecError, Result};
use crate::orderbook::node::{order_key, OrderNode};
use crate::store::KeyValueStore;
use crate::types::Order;

/// Queue metadata for one price.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderListItem {
    pub head: H256,
    pub tail: H256,
    pub length: u64,
    pub volume: U256,
    pub price: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct OrderListRecord {
    head: Word,
    tail: Word,
    length: u64,
    volume: Word,
    price: Word,
}

impl OrderListItem {
    pub fn new(price: U256) -> Self {
        Self {
            price,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, CodecError> {
        let record = OrderListRecord {
            head: self.head.0,
            tail: self.tail.0,
            length: self.length,
            volume: u256_to_word(self.volume),
            price: u256_to_word(self.price),
        };
        codec::encode(&record, "order list")
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CodecError> {
        let record: OrderListRecord = codec::decode(bytes, "order list")?;
        Ok(Self {
            head: H256(record.head),
            tail: H256(record.tail),
            length: record.length,
            volume: word_to_u256(&record.volume),
            price: word_to_u256(&record.price),
        })
    }
}

/// Orders at a single price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderList {
    pub item: OrderListItem,
    slot: U256,
}

impl OrderList {
    /// Empty list at `price` under the tree record `tree_key`
    pub fn new(tree_key: &H256, price: U256) -> Self {
        Self::from_item(tree_key, OrderListItem::new(price))
    }

    /// Reattach to a persisted list item
    pub fn from_item(tree_key: &H256, item: OrderListItem) -> Self {
        let slot = Self::derive_slot(tree_key, item.price);
        Self { item, slot }
    }

    pub fn derive_slot(tree_key: &H256, price: U256) -> U256 {
        codec::derive_slot(&[tree_key.as_bytes(), &u256_to_word(price)])
    }

    #[inline]
    pub fn price(&self) -> U256 {
        self.item.price
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.item.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.item.length == 0
    }

    #[inline]
    pub fn volume(&self) -> U256 {
        self.item.volume
    }

    /// Store key of an order record in this list
    #[inline]
    pub fn order_store_key(&self, key: &H256) -> H256 {
        slot_key(self.slot, key_to_u256(key))
    }

    // ========================================================================
    // Order records
    // ========================================================================

    pub fn get_node<S: KeyValueStore>(
        &self,
        store: &S,
        key: &H256,
        dry_run: bool,
    ) -> Result<Option<OrderNode>> {
        if key.is_zero() {
            return Ok(None);
        }
        match store.get(&self.order_store_key(key), dry_run)? {
            Some(bytes) => Ok(Some(OrderNode::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_order<S: KeyValueStore>(
        &self,
        store: &S,
        order_id: u64,
        dry_run: bool,
    ) -> Result<Option<Order>> {
        Ok(self
            .get_node(store, &order_key(order_id), dry_run)?
            .map(|node| node.order))
    }

    /// Write a node record as-is
    pub fn save_node<S: KeyValueStore>(&self, store: &mut S, node: &OrderNode, dry_run: bool) -> Result<()> {
        store.put(self.order_store_key(&node.key()), node.encode()?, dry_run)?;
        Ok(())
    }

    /// Drop an order record (full fill)
    pub fn delete_order<S: KeyValueStore>(&self, store: &mut S, order_id: u64, dry_run: bool) -> Result<()> {
        store.delete(&self.order_store_key(&order_key(order_id)), dry_run)?;
        Ok(())
    }

    fn require_node<S: KeyValueStore>(&self, store: &S, key: &H256, dry_run: bool) -> Result<OrderNode> {
        self.get_node(store, key, dry_run)?
            .ok_or(BookError::OrderNotFound {
                order_id: key_to_u256(key).low_u64(),
                price: self.item.price,
            })
    }

    /// Oldest order, `None` if the list is empty.
    pub fn head<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<OrderNode>> {
        if self.item.head.is_zero() {
            return Ok(None);
        }
        self.get_node(store, &self.item.head, dry_run)
    }

    /// Orders from head to tail
    pub fn orders<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Vec<Order>> {
        Ok(self.nodes(store, dry_run)?.into_iter().map(|node| node.order).collect())
    }

    /// Linked order records, head to tail
    pub fn nodes<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Vec<OrderNode>> {
        let mut out = Vec::with_capacity(self.item.length as usize);
        let mut cursor = self.item.head;
        while !cursor.is_zero() {
            let node = self.require_node(store, &cursor, dry_run)?;
            cursor = node.next;
            out.push(node);
        }
        Ok(out)
    }

    // ========================================================================
    // Queue operations
    // ========================================================================

    /// Link `order` after the current tail.
    pub fn append<S: KeyValueStore>(&mut self, store: &mut S, order: Order, dry_run: bool) -> Result<()> {
        let quantity = order.quantity;
        let mut node = OrderNode::new(order);
        let key = node.key();

        if self.item.tail.is_zero() {
            self.item.head = key;
        } else {
            let mut tail = self.require_node(store, &self.item.tail, dry_run)?;
            tail.next = key;
            node.prev = tail.key();
            self.save_node(store, &tail, dry_run)?;
        }
        self.save_node(store, &node, dry_run)?;

        self.item.tail = key;
        self.item.length += 1;
        self.item.volume = self
            .item
            .volume
            .checked_add(quantity)
            .ok_or(BookError::Overflow("order list volume"))?;
        trace!(order_id = node.order.id, price = %self.item.price, "order appended");
        Ok(())
    }

    /// Unlink an order. Its own record is left for the caller to delete or
    /// rewrite. Returns the unlinked node, or `None` if the list is empty or
    /// does not hold the order.
    pub fn remove<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        dry_run: bool,
    ) -> Result<Option<OrderNode>> {
        if self.item.length == 0 {
            return Ok(None);
        }
        let key = order_key(order_id);
        let mut node = match self.get_node(store, &key, dry_run)? {
            Some(node) => node,
            None => return Ok(None),
        };
        // Retained record of an order already unlinked
        if !self.is_linked(&node) {
            return Ok(None);
        }

        if node.prev.is_zero() {
            self.item.head = node.next;
        } else {
            let mut prev = self.require_node(store, &node.prev, dry_run)?;
            prev.next = node.next;
            self.save_node(store, &prev, dry_run)?;
        }
        if node.next.is_zero() {
            self.item.tail = node.prev;
        } else {
            let mut next = self.require_node(store, &node.next, dry_run)?;
            next.prev = node.prev;
            self.save_node(store, &next, dry_run)?;
        }

        self.item.length -= 1;
        self.item.volume = self.item.volume.saturating_sub(node.order.quantity);
        if self.item.length == 0 {
            self.item.head = EMPTY_KEY;
            self.item.tail = EMPTY_KEY;
        }

        node.next = EMPTY_KEY;
        node.prev = EMPTY_KEY;
        Ok(Some(node))
    }

    /// Move an order to the tail, losing its time priority.
    pub fn move_to_tail<S: KeyValueStore>(&mut self, store: &mut S, order_id: u64, dry_run: bool) -> Result<()> {
        let key = order_key(order_id);
        if self.item.tail == key {
            return Ok(());
        }
        let node = self
            .remove(store, order_id, dry_run)?
            .ok_or(BookError::OrderNotFound {
                order_id,
                price: self.item.price,
            })?;
        self.append(store, node.order, dry_run)
    }

    /// Replace an order's quantity in place, adjusting the volume by the delta.
    pub fn set_quantity<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        quantity: U256,
        updated_at: u64,
        dry_run: bool,
    ) -> Result<Order> {
        let mut node = self.require_node(store, &order_key(order_id), dry_run)?;
        self.adjust_volume(node.order.quantity, quantity)?;
        node.order.quantity = quantity;
        node.order.updated_at = updated_at;
        self.save_node(store, &node, dry_run)?;
        Ok(node.order)
    }

    /// Take `amount` off a resting order as a trade fill. The record moves to
    /// `PartialFilled`, or `Filled` once nothing remains.
    pub fn fill<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        amount: U256,
        updated_at: u64,
        dry_run: bool,
    ) -> Result<Order> {
        let mut node = self.require_node(store, &order_key(order_id), dry_run)?;
        let old = node.order.quantity;
        node.order.fill(amount);
        self.adjust_volume(old, node.order.quantity)?;
        node.order.updated_at = updated_at;
        self.save_node(store, &node, dry_run)?;
        Ok(node.order)
    }

    fn adjust_volume(&mut self, old: U256, new: U256) -> Result<()> {
        self.item.volume = if new >= old {
            self.item
                .volume
                .checked_add(new - old)
                .ok_or(BookError::Overflow("order list volume"))?
        } else {
            self.item.volume.saturating_sub(old - new)
        };
        Ok(())
    }

    /// Whether `node` is still linked into this list. Cancelled records keep
    /// their slot but drop out of the chain.
    pub fn is_linked(&self, node: &OrderNode) -> bool {
        !node.prev.is_zero() || self.item.head == node.key()
    }

    /// Hash of the list item followed by every order record, head to tail.
    pub fn hash<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<H256> {
        let mut parts: Vec<Vec<u8>> = vec![self.item.encode()?];
        let mut cursor = self.item.head;
        while !cursor.is_zero() {
            let node = self.require_node(store, &cursor, dry_run)?;
            parts.push(node.hash()?.as_bytes().to_vec());
            cursor = node.next;
        }
        let slices: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        Ok(codec::sha256(&slices))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
