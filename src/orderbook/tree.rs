//! Order trees: one side of a book, price -> order list.
//!
//! ## Design
//!
//! Prices are keys of a [`RedBlackTree`] whose node values are the encoded
//! [`OrderListItem`]s. The tree's own record (aggregate volume, order count,
//! index root and size) lives at `tree_key = sha256(book_key ‖ side)`, and
//! the index nodes at `tree_key + price`.
//!
//! ## Price Ordering
//!
//! - **Bids**: best price is the maximum key
//! - **Asks**: best price is the minimum key
//!
//! Empty lists are removed from the index immediately, so best/worst price
//! lookups never walk empty levels.

use primitive_types::{H256, U256};
use ssz_rs::prelude::*;
use tracing::debug;

use crate::codec::{self, key_to_u256, u256_to_key, u256_to_word, word_to_u256, Word};
use crate::error::{BookError, CodecError, Result};
use crate::orderbook::list::{OrderList, OrderListItem};
use crate::orderbook::node::{order_key, OrderNode};
use crate::rbtree::{RedBlackTree, TreeNode};
use crate::store::KeyValueStore;
use crate::types::{Order, Side};

/// Aggregates for one side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderTreeItem {
    pub volume: U256,
    pub num_orders: u64,
    pub price_tree_root: H256,
    pub price_tree_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct OrderTreeRecord {
    volume: Word,
    num_orders: u64,
    price_tree_root: Word,
    price_tree_size: u64,
}

impl OrderTreeItem {
    pub fn encode(&self) -> std::result::Result<Vec<u8>, CodecError> {
        let record = OrderTreeRecord {
            volume: u256_to_word(self.volume),
            num_orders: self.num_orders,
            price_tree_root: self.price_tree_root.0,
            price_tree_size: self.price_tree_size,
        };
        codec::encode(&record, "order tree")
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CodecError> {
        let record: OrderTreeRecord = codec::decode(bytes, "order tree")?;
        Ok(Self {
            volume: word_to_u256(&record.volume),
            num_orders: record.num_orders,
            price_tree_root: H256(record.price_tree_root),
            price_tree_size: record.price_tree_size,
        })
    }
}

/// One side of an order book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTree {
    key: H256,
    side: Side,
    pub item: OrderTreeItem,
    prices: RedBlackTree,
}

impl OrderTree {
    /// Record key of the `side` tree of book `book_key`
    pub fn key_for(book_key: &H256, side: Side) -> H256 {
        codec::sha256(&[book_key.as_bytes(), &[side.to_u8()]])
    }

    /// Empty tree
    pub fn new(book_key: &H256, side: Side) -> Self {
        let key = Self::key_for(book_key, side);
        Self {
            key,
            side,
            item: OrderTreeItem::default(),
            prices: RedBlackTree::new(key_to_u256(&key)),
        }
    }

    /// Load the persisted tree, or start an empty one.
    pub fn open<S: KeyValueStore>(store: &S, book_key: &H256, side: Side, dry_run: bool) -> Result<Self> {
        let mut tree = Self::new(book_key, side);
        if let Some(bytes) = store.get(&tree.key, dry_run)? {
            tree.item = OrderTreeItem::decode(&bytes)?;
            tree.prices = RedBlackTree::with_root(
                key_to_u256(&tree.key),
                tree.item.price_tree_root,
                tree.item.price_tree_size,
            );
        }
        Ok(tree)
    }

    /// Persist the tree record
    pub fn save<S: KeyValueStore>(&mut self, store: &mut S, dry_run: bool) -> Result<()> {
        self.item.price_tree_root = self.prices.root();
        self.item.price_tree_size = self.prices.size();
        store.put(self.key, self.item.encode()?, dry_run)?;
        Ok(())
    }

    #[inline]
    pub fn key(&self) -> H256 {
        self.key
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn volume(&self) -> U256 {
        self.item.volume
    }

    #[inline]
    pub fn num_orders(&self) -> u64 {
        self.item.num_orders
    }

    /// Number of price levels
    #[inline]
    pub fn depth_len(&self) -> u64 {
        self.prices.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// The price index (read access for invariant checks)
    pub fn price_index(&self) -> &RedBlackTree {
        &self.prices
    }

    fn list_from_node(&self, node: TreeNode) -> Result<OrderList> {
        Ok(OrderList::from_item(&self.key, OrderListItem::decode(&node.value)?))
    }

    // ========================================================================
    // Price queries
    // ========================================================================

    pub fn price_exists<S: KeyValueStore>(&self, store: &S, price: U256, dry_run: bool) -> Result<bool> {
        self.prices.has(store, &u256_to_key(price), dry_run)
    }

    pub fn price_list<S: KeyValueStore>(
        &self,
        store: &S,
        price: U256,
        dry_run: bool,
    ) -> Result<Option<OrderList>> {
        match self.prices.get(store, &u256_to_key(price), dry_run)? {
            Some(bytes) => Ok(Some(OrderList::from_item(
                &self.key,
                OrderListItem::decode(&bytes)?,
            ))),
            None => Ok(None),
        }
    }

    /// Like [`price_list`](Self::price_list) but absence is an error
    pub fn order_list<S: KeyValueStore>(&self, store: &S, price: U256, dry_run: bool) -> Result<OrderList> {
        self.price_list(store, price, dry_run)?
            .ok_or(BookError::OrderListNotFound(price))
    }

    pub fn min_price<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<U256>> {
        Ok(self.prices.minimum(store, dry_run)?.map(|k| key_to_u256(&k)))
    }

    pub fn max_price<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<U256>> {
        Ok(self.prices.maximum(store, dry_run)?.map(|k| key_to_u256(&k)))
    }

    pub fn best_price<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<U256>> {
        match self.side {
            Side::Buy => self.max_price(store, dry_run),
            Side::Sell => self.min_price(store, dry_run),
        }
    }

    pub fn worst_price<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<U256>> {
        match self.side {
            Side::Buy => self.min_price(store, dry_run),
            Side::Sell => self.max_price(store, dry_run),
        }
    }

    /// Best-priced list, fetched in one descent.
    pub fn best_list<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<OrderList>> {
        let node = match self.side {
            Side::Buy => self.prices.right_most(store, dry_run)?,
            Side::Sell => self.prices.left_most(store, dry_run)?,
        };
        node.map(|n| self.list_from_node(n)).transpose()
    }

    /// All lists in ascending price order
    pub fn lists<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Vec<OrderList>> {
        self.prices
            .nodes(store, dry_run)?
            .into_iter()
            .map(|node| self.list_from_node(node))
            .collect()
    }

    pub fn volume_at<S: KeyValueStore>(&self, store: &S, price: U256, dry_run: bool) -> Result<U256> {
        Ok(self
            .price_list(store, price, dry_run)?
            .map(|list| list.volume())
            .unwrap_or_default())
    }

    /// Aggregated `(price, volume)` levels, best first.
    pub fn depth<S: KeyValueStore>(&self, store: &S, levels: usize, dry_run: bool) -> Result<Vec<(U256, U256)>> {
        let mut lists = self.lists(store, dry_run)?;
        if self.side == Side::Buy {
            lists.reverse();
        }
        Ok(lists
            .into_iter()
            .take(levels)
            .map(|list| (list.price(), list.volume()))
            .collect())
    }

    pub fn get_order<S: KeyValueStore>(
        &self,
        store: &S,
        order_id: u64,
        price: U256,
        dry_run: bool,
    ) -> Result<Option<Order>> {
        // Order slots derive from tree key and price alone, so retained
        // records stay readable after their level is gone
        OrderList::new(&self.key, price).get_order(store, order_id, dry_run)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Write a list back into the index; an empty list leaves the index.
    pub fn save_list<S: KeyValueStore>(&mut self, store: &mut S, list: &OrderList, dry_run: bool) -> Result<()> {
        let key = u256_to_key(list.price());
        if list.is_empty() {
            self.prices.remove(store, &key, dry_run)?;
            debug!(side = self.side.as_str(), price = %list.price(), "price level removed");
        } else {
            self.prices.put(store, key, list.item.encode()?, dry_run)?;
        }
        Ok(())
    }

    /// Append a resting order at its price, creating the level if needed.
    pub fn insert_order<S: KeyValueStore>(&mut self, store: &mut S, order: Order, dry_run: bool) -> Result<()> {
        if order.price.is_zero() {
            return Err(BookError::InvalidOrder("resting order needs a non-zero price".into()));
        }
        if order.quantity.is_zero() {
            return Err(BookError::InvalidOrder("resting order needs a non-zero quantity".into()));
        }
        let quantity = order.quantity;
        let mut list = match self.price_list(store, order.price, dry_run)? {
            Some(list) => list,
            None => OrderList::new(&self.key, order.price),
        };
        list.append(store, order, dry_run)?;
        self.save_list(store, &list, dry_run)?;

        self.item.volume = self
            .item
            .volume
            .checked_add(quantity)
            .ok_or(BookError::Overflow("order tree volume"))?;
        self.item.num_orders += 1;
        self.save(store, dry_run)
    }

    /// Unlink an order from its list. The order record stays in place.
    /// Returns `None` if the order does not rest at `price`.
    pub fn remove_order<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        price: U256,
        dry_run: bool,
    ) -> Result<Option<OrderNode>> {
        let mut list = match self.price_list(store, price, dry_run)? {
            Some(list) => list,
            None => return Ok(None),
        };
        let node = match list.remove(store, order_id, dry_run)? {
            Some(node) => node,
            None => return Ok(None),
        };
        self.save_list(store, &list, dry_run)?;

        self.item.volume = self.item.volume.saturating_sub(node.order.quantity);
        self.item.num_orders = self.item.num_orders.saturating_sub(1);
        self.save(store, dry_run)?;
        Ok(Some(node))
    }

    /// Change a resting order's quantity in place (time priority kept).
    pub fn set_quantity<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        price: U256,
        quantity: U256,
        updated_at: u64,
        dry_run: bool,
    ) -> Result<Order> {
        if quantity.is_zero() {
            return Err(BookError::InvalidOrder("quantity update to zero".into()));
        }
        let mut list = self.order_list(store, price, dry_run)?;
        let old_volume = list.volume();
        let order = list.set_quantity(store, order_id, quantity, updated_at, dry_run)?;
        self.save_list(store, &list, dry_run)?;
        self.adjust_volume(old_volume, list.volume())?;
        self.save(store, dry_run)?;
        Ok(order)
    }

    /// Partially fill a resting order; it keeps its place in the queue.
    pub fn fill_order<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        order_id: u64,
        price: U256,
        amount: U256,
        updated_at: u64,
        dry_run: bool,
    ) -> Result<Order> {
        let mut list = self.order_list(store, price, dry_run)?;
        let old_volume = list.volume();
        let order = list.fill(store, order_id, amount, updated_at, dry_run)?;
        self.save_list(store, &list, dry_run)?;
        self.adjust_volume(old_volume, list.volume())?;
        self.save(store, dry_run)?;
        Ok(order)
    }

    fn adjust_volume(&mut self, old: U256, new: U256) -> Result<()> {
        self.item.volume = if new >= old {
            self.item
                .volume
                .checked_add(new - old)
                .ok_or(BookError::Overflow("order tree volume"))?
        } else {
            self.item.volume.saturating_sub(old - new)
        };
        Ok(())
    }

    /// Apply an updated order.
    ///
    /// - Price changed: remove at `old_price`, insert at the new price.
    /// - Quantity grew: update in place, then move to the tail.
    /// - Quantity shrank: update in place, priority kept.
    ///
    /// Only an order still linked at `old_price` in a live status can be
    /// updated. Anything else is `OrderNotFound` and leaves the book as is.
    pub fn update_order<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        old_price: U256,
        order: Order,
        dry_run: bool,
    ) -> Result<()> {
        let not_found = || BookError::OrderNotFound {
            order_id: order.id,
            price: old_price,
        };
        let list = self.price_list(store, old_price, dry_run)?.ok_or_else(not_found)?;
        let current = match list.get_node(store, &order_key(order.id), dry_run)? {
            Some(node) if list.is_linked(&node) && !node.order.status.is_final() => node.order,
            _ => return Err(not_found()),
        };

        if order.price != old_price {
            self.remove_order(store, order.id, old_price, dry_run)?
                .ok_or_else(not_found)?;
            let list = self.order_list_or_empty(store, old_price, dry_run)?;
            list.delete_order(store, order.id, dry_run)?;
            return self.insert_order(store, order, dry_run);
        }

        let grew = order.quantity > current.quantity;
        self.set_quantity(store, order.id, order.price, order.quantity, order.updated_at, dry_run)?;
        if grew {
            let mut list = self.order_list(store, order.price, dry_run)?;
            list.move_to_tail(store, order.id, dry_run)?;
            self.save_list(store, &list, dry_run)?;
        }
        Ok(())
    }

    pub fn order_list_or_empty<S: KeyValueStore>(&self, store: &S, price: U256, dry_run: bool) -> Result<OrderList> {
        Ok(self
            .price_list(store, price, dry_run)?
            .unwrap_or_else(|| OrderList::new(&self.key, price)))
    }

    /// Hash of the tree record followed by every list hash, ascending price.
    pub fn hash<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<H256> {
        let mut item = self.item.clone();
        item.price_tree_root = self.prices.root();
        item.price_tree_size = self.prices.size();
        let mut parts: Vec<Vec<u8>> = vec![item.encode()?];
        for list in self.lists(store, dry_run)? {
            parts.push(list.hash(store, dry_run)?.as_bytes().to_vec());
        }
        let slices: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        Ok(codec::sha256(&slices))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn book_key() -> H256 {
        H256::repeat_byte(0xB0)
    }

    fn create_test_order(id: u64, side: Side, price: u64, quantity: u64) -> Order {
        let mut order = Order::limit(side, U256::from(price), U256::from(quantity));
        order.id = id;
        order
    }

    fn p(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn test_tree_keys_differ_by_side() {
        assert_ne!(
            OrderTree::key_for(&book_key(), Side::Buy),
            OrderTree::key_for(&book_key(), Side::Sell)
        );
    }

    #[test]
    fn test_insert_and_best_prices() {
        let mut store = MemoryStore::memory();
        let mut bids = OrderTree::new(&book_key(), Side::Buy);
        let mut asks = OrderTree::new(&book_key(), Side::Sell);

        for (id, price) in [(1, 100), (2, 102), (3, 101)] {
            bids.insert_order(&mut store, create_test_order(id, Side::Buy, price, 10), false).unwrap();
            asks.insert_order(&mut store, create_test_order(id + 10, Side::Sell, price + 10, 10), false).unwrap();
        }

        assert_eq!(bids.best_price(&store, false).unwrap(), Some(p(102)));
        assert_eq!(bids.worst_price(&store, false).unwrap(), Some(p(100)));
        assert_eq!(asks.best_price(&store, false).unwrap(), Some(p(110)));
        assert_eq!(asks.worst_price(&store, false).unwrap(), Some(p(112)));
        assert_eq!(bids.best_list(&store, false).unwrap().unwrap().price(), p(102));
        assert_eq!(asks.best_list(&store, false).unwrap().unwrap().price(), p(110));
        assert_eq!(bids.volume(), p(30));
        assert_eq!(bids.num_orders(), 3);
    }

    #[test]
    fn test_insert_rejects_zero_price() {
        let mut store = MemoryStore::memory();
        let mut asks = OrderTree::new(&book_key(), Side::Sell);
        let err = asks
            .insert_order(&mut store, create_test_order(1, Side::Sell, 0, 10), false)
            .unwrap_err();
        assert!(matches!(err, BookError::InvalidOrder(_)));
    }

    #[test]
    fn test_remove_last_order_drops_level() {
        let mut store = MemoryStore::memory();
        let mut asks = OrderTree::new(&book_key(), Side::Sell);
        asks.insert_order(&mut store, create_test_order(1, Side::Sell, 100, 10), false).unwrap();
        asks.insert_order(&mut store, create_test_order(2, Side::Sell, 101, 5), false).unwrap();

        let removed = asks.remove_order(&mut store, 1, p(100), false).unwrap().unwrap();
        assert_eq!(removed.order_id(), 1);
        assert!(!asks.price_exists(&store, p(100), false).unwrap());
        assert_eq!(asks.best_price(&store, false).unwrap(), Some(p(101)));
        assert_eq!(asks.volume(), p(5));
        assert_eq!(asks.num_orders(), 1);
        assert_eq!(asks.depth_len(), 1);
    }

    #[test]
    fn test_remove_missing_order() {
        let mut store = MemoryStore::memory();
        let mut asks = OrderTree::new(&book_key(), Side::Sell);
        asks.insert_order(&mut store, create_test_order(1, Side::Sell, 100, 10), false).unwrap();

        assert!(asks.remove_order(&mut store, 9, p(100), false).unwrap().is_none());
        assert!(asks.remove_order(&mut store, 1, p(999), false).unwrap().is_none());
        assert_eq!(asks.volume(), p(10));
    }

    #[test]
    fn test_update_quantity_priority_rules() {
        let mut store = MemoryStore::memory();
        let mut bids = OrderTree::new(&book_key(), Side::Buy);
        for id in 1..=3 {
            bids.insert_order(&mut store, create_test_order(id, Side::Buy, 100, 10), false).unwrap();
        }
        let ids = |tree: &OrderTree, store: &MemoryStore| -> Vec<u64> {
            tree.order_list(store, p(100), false)
                .unwrap()
                .orders(store, false)
                .unwrap()
                .iter()
                .map(|o| o.id)
                .collect()
        };

        // Shrinking keeps the place in line
        bids.update_order(&mut store, p(100), create_test_order(1, Side::Buy, 100, 4), false).unwrap();
        assert_eq!(ids(&bids, &store), vec![1, 2, 3]);
        assert_eq!(bids.volume(), p(24));

        // Growing goes to the back
        bids.update_order(&mut store, p(100), create_test_order(2, Side::Buy, 100, 20), false).unwrap();
        assert_eq!(ids(&bids, &store), vec![1, 3, 2]);
        assert_eq!(bids.volume(), p(34));
        assert_eq!(bids.volume_at(&store, p(100), false).unwrap(), p(34));
    }

    #[test]
    fn test_update_price_moves_level() {
        let mut store = MemoryStore::memory();
        let mut bids = OrderTree::new(&book_key(), Side::Buy);
        bids.insert_order(&mut store, create_test_order(1, Side::Buy, 100, 10), false).unwrap();

        bids.update_order(&mut store, p(100), create_test_order(1, Side::Buy, 105, 10), false).unwrap();

        assert!(!bids.price_exists(&store, p(100), false).unwrap());
        assert_eq!(bids.best_price(&store, false).unwrap(), Some(p(105)));
        assert_eq!(bids.num_orders(), 1);
        assert_eq!(bids.volume(), p(10));
    }

    #[test]
    fn test_depth_best_first() {
        let mut store = MemoryStore::memory();
        let mut bids = OrderTree::new(&book_key(), Side::Buy);
        for (id, price, qty) in [(1, 100, 1), (2, 101, 2), (3, 101, 3), (4, 99, 4)] {
            bids.insert_order(&mut store, create_test_order(id, Side::Buy, price, qty), false).unwrap();
        }

        let depth = bids.depth(&store, 2, false).unwrap();
        assert_eq!(depth, vec![(p(101), p(5)), (p(100), p(1))]);
    }

    #[test]
    fn test_open_reloads_record() {
        let mut store = MemoryStore::memory();
        let mut asks = OrderTree::new(&book_key(), Side::Sell);
        asks.insert_order(&mut store, create_test_order(1, Side::Sell, 100, 10), false).unwrap();
        store.commit().unwrap();

        let reopened = OrderTree::open(&store, &book_key(), Side::Sell, false).unwrap();
        assert_eq!(reopened, asks);
        assert_eq!(reopened.hash(&store, false).unwrap(), asks.hash(&store, false).unwrap());
    }
}
