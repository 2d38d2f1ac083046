//! Red-black tree persisted in a key-value store.
//!
//! ## Design
//!
//! Nodes are records, not heap objects. A node with logical key `k` lives at
//! store key `slot + k`, and its `parent`/`left`/`right` fields hold logical
//! keys. Resolving a link is a store read, like indexing into an arena
//! where the arena is the store.
//!
//! The tree itself only remembers `slot`, `root` and `size`; the owner
//! persists those in its own record.
//!
//! ## Mutations
//!
//! Each `put`/`remove` runs inside a [`Session`]: nodes are read once, edited
//! in memory through rotations and fix-ups, then written back in key order.
//! Nothing survives the call.
//!
//! - Insert: the five classic insert cases.
//! - Remove: a node with two children first swaps places with its in-order
//!   successor, then the node (now with at most one child) is spliced out
//!   after the six delete cases run.
//!
//! Shapes are deterministic, so every replica reaches the same records.

pub mod node;

pub use node::{Color, TreeNode};

use std::collections::{BTreeMap, BTreeSet};

use primitive_types::{H256, U256};
use tracing::trace;

use crate::codec::{key_to_u256, slot_key, EMPTY_KEY};
use crate::error::{BookError, Result};
use crate::store::KeyValueStore;

/// Persistent ordered index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedBlackTree {
    slot: U256,
    root: H256,
    size: u64,
}

/// Result of [`RedBlackTree::check_invariants`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeCheck {
    pub black_height: usize,
    pub node_count: u64,
    pub violations: Vec<String>,
}

impl TreeCheck {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl RedBlackTree {
    /// Empty tree in the given key space
    pub fn new(slot: U256) -> Self {
        Self {
            slot,
            root: EMPTY_KEY,
            size: 0,
        }
    }

    /// Reattach to a tree whose root and size were persisted elsewhere
    pub fn with_root(slot: U256, root: H256, size: u64) -> Self {
        Self { slot, root, size }
    }

    #[inline]
    pub fn slot(&self) -> U256 {
        self.slot
    }

    #[inline]
    pub fn root(&self) -> H256 {
        self.root
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Store key holding the node for `key`
    #[inline]
    pub fn store_key(&self, key: &H256) -> H256 {
        slot_key(self.slot, key_to_u256(key))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_node<S: KeyValueStore>(
        &self,
        store: &S,
        key: &H256,
        dry_run: bool,
    ) -> Result<Option<TreeNode>> {
        if key.is_zero() {
            return Ok(None);
        }
        match store.get(&self.store_key(key), dry_run)? {
            Some(bytes) => Ok(Some(TreeNode::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Value stored under `key`; `None` is a normal outcome.
    pub fn get<S: KeyValueStore>(
        &self,
        store: &S,
        key: &H256,
        dry_run: bool,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.get_node(store, key, dry_run)?.map(|node| node.value))
    }

    pub fn has<S: KeyValueStore>(&self, store: &S, key: &H256, dry_run: bool) -> Result<bool> {
        if key.is_zero() {
            return Ok(false);
        }
        Ok(store.has(&self.store_key(key), dry_run)?)
    }

    fn read_node<S: KeyValueStore>(&self, store: &S, key: &H256, dry_run: bool) -> Result<TreeNode> {
        self.get_node(store, key, dry_run)?
            .ok_or(BookError::MissingNode(*key))
    }

    /// Node with the smallest key (key and value in one descent)
    pub fn left_most<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<TreeNode>> {
        if self.root.is_zero() {
            return Ok(None);
        }
        let mut node = self.read_node(store, &self.root, dry_run)?;
        while !node.left.is_zero() {
            node = self.read_node(store, &node.left, dry_run)?;
        }
        Ok(Some(node))
    }

    /// Node with the largest key
    pub fn right_most<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<TreeNode>> {
        if self.root.is_zero() {
            return Ok(None);
        }
        let mut node = self.read_node(store, &self.root, dry_run)?;
        while !node.right.is_zero() {
            node = self.read_node(store, &node.right, dry_run)?;
        }
        Ok(Some(node))
    }

    pub fn minimum<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<H256>> {
        Ok(self.left_most(store, dry_run)?.map(|node| node.key))
    }

    pub fn maximum<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Option<H256>> {
        Ok(self.right_most(store, dry_run)?.map(|node| node.key))
    }

    /// All nodes in ascending key order.
    pub fn nodes<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Vec<TreeNode>> {
        let mut out = Vec::with_capacity(self.size as usize);
        let mut stack: Vec<TreeNode> = Vec::new();
        let mut cursor = self.root;
        loop {
            while !cursor.is_zero() {
                let node = self.read_node(store, &cursor, dry_run)?;
                cursor = node.left;
                stack.push(node);
            }
            match stack.pop() {
                Some(node) => {
                    cursor = node.right;
                    out.push(node);
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// All keys in ascending order
    pub fn keys<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<Vec<H256>> {
        Ok(self.nodes(store, dry_run)?.into_iter().map(|n| n.key).collect())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or overwrite. Overwriting keeps the tree shape.
    pub fn put<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        key: H256,
        value: Vec<u8>,
        dry_run: bool,
    ) -> Result<()> {
        if key.is_zero() {
            return Err(BookError::InvalidOrder("tree key must be non-zero".into()));
        }
        let mut session = Session::new(store, self.slot, self.root, dry_run);

        if self.root.is_zero() {
            session.insert_node(TreeNode::new(key, value));
            session.root = key;
            session.insert_fixup(key)?;
            self.size += 1;
            self.root = session.flush()?;
            return Ok(());
        }

        let mut cursor = self.root;
        loop {
            let node = session.load(cursor)?;
            match key.cmp(&node.key) {
                std::cmp::Ordering::Equal => {
                    node.value = value;
                    session.touch(cursor);
                    self.root = session.flush()?;
                    return Ok(());
                }
                std::cmp::Ordering::Less => {
                    if node.left.is_zero() {
                        node.left = key;
                        session.touch(cursor);
                        break;
                    }
                    cursor = node.left;
                }
                std::cmp::Ordering::Greater => {
                    if node.right.is_zero() {
                        node.right = key;
                        session.touch(cursor);
                        break;
                    }
                    cursor = node.right;
                }
            }
        }

        let mut inserted = TreeNode::new(key, value);
        inserted.parent = cursor;
        session.insert_node(inserted);
        session.insert_fixup(key)?;
        self.size += 1;
        self.root = session.flush()?;
        trace!(size = self.size, "tree insert");
        Ok(())
    }

    /// Remove `key`. Returns false if it was absent.
    pub fn remove<S: KeyValueStore>(&mut self, store: &mut S, key: &H256, dry_run: bool) -> Result<bool> {
        if !self.has(store, key, dry_run)? {
            return Ok(false);
        }
        let mut session = Session::new(store, self.slot, self.root, dry_run);
        let target = *key;

        if !session.left(target)?.is_zero() && !session.right(target)?.is_zero() {
            let mut successor = session.right(target)?;
            loop {
                let left = session.left(successor)?;
                if left.is_zero() {
                    break;
                }
                successor = left;
            }
            session.swap_with_successor(target, successor)?;
        }

        let left = session.left(target)?;
        let child = if left.is_zero() {
            session.right(target)?
        } else {
            left
        };
        if session.color(target)? == Color::Black {
            let child_color = session.color(child)?;
            session.set_color(target, child_color)?;
            session.delete_fixup(target)?;
        }
        session.replace_node(target, child)?;
        if session.parent(target)?.is_zero() && !child.is_zero() {
            session.set_color(child, Color::Black)?;
        }
        session.drop_node(target);

        self.size -= 1;
        self.root = session.flush()?;
        trace!(size = self.size, "tree remove");
        Ok(true)
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Walk the whole tree and report red-black, ordering and link violations.
    pub fn check_invariants<S: KeyValueStore>(&self, store: &S, dry_run: bool) -> Result<TreeCheck> {
        let mut check = TreeCheck::default();
        if self.root.is_zero() {
            if self.size != 0 {
                check.violations.push(format!("empty root but size {}", self.size));
            }
            return Ok(check);
        }
        let root = self.read_node(store, &self.root, dry_run)?;
        if root.color != Color::Black {
            check.violations.push("root is red".into());
        }
        if !root.parent.is_zero() {
            check.violations.push("root has a parent".into());
        }
        let height = self.check_subtree(store, &root, None, None, dry_run, &mut check)?;
        check.black_height = height;
        if check.node_count != self.size {
            check.violations.push(format!(
                "size {} but {} nodes reachable",
                self.size, check.node_count
            ));
        }
        Ok(check)
    }

    fn check_subtree<S: KeyValueStore>(
        &self,
        store: &S,
        node: &TreeNode,
        lower: Option<H256>,
        upper: Option<H256>,
        dry_run: bool,
        check: &mut TreeCheck,
    ) -> Result<usize> {
        check.node_count += 1;
        if lower.map_or(false, |low| node.key <= low) || upper.map_or(false, |up| node.key >= up) {
            check.violations.push(format!("key {:?} out of order", node.key));
        }

        let mut heights = [0usize; 2];
        for (slot, child_key) in [node.left, node.right].iter().enumerate() {
            if child_key.is_zero() {
                heights[slot] = 1;
                continue;
            }
            let child = self.read_node(store, child_key, dry_run)?;
            if child.parent != node.key {
                check.violations.push(format!("child {:?} has wrong parent", child.key));
            }
            if node.color == Color::Red && child.color == Color::Red {
                check.violations.push(format!("red node {:?} has red child", node.key));
            }
            let (low, up) = if slot == 0 {
                (lower, Some(node.key))
            } else {
                (Some(node.key), upper)
            };
            heights[slot] = self.check_subtree(store, &child, low, up, dry_run, check)?;
        }
        if heights[0] != heights[1] {
            check
                .violations
                .push(format!("black height mismatch under {:?}", node.key));
        }
        Ok(heights[0] + usize::from(node.color == Color::Black))
    }
}

// ============================================================================
// Session: node working set for one mutation
// ============================================================================

struct Session<'a, S: KeyValueStore> {
    store: &'a mut S,
    slot: U256,
    dry_run: bool,
    root: H256,
    nodes: BTreeMap<H256, TreeNode>,
    dirty: BTreeSet<H256>,
    removed: BTreeSet<H256>,
}

impl<'a, S: KeyValueStore> Session<'a, S> {
    fn new(store: &'a mut S, slot: U256, root: H256, dry_run: bool) -> Self {
        Self {
            store,
            slot,
            dry_run,
            root,
            nodes: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    fn load(&mut self, key: H256) -> Result<&mut TreeNode> {
        if key.is_zero() {
            return Err(BookError::MissingNode(key));
        }
        if !self.nodes.contains_key(&key) {
            let store_key = slot_key(self.slot, key_to_u256(&key));
            let bytes = self
                .store
                .get(&store_key, self.dry_run)?
                .ok_or(BookError::MissingNode(key))?;
            self.nodes.insert(key, TreeNode::decode(&bytes)?);
        }
        self.nodes.get_mut(&key).ok_or(BookError::MissingNode(key))
    }

    fn touch(&mut self, key: H256) {
        self.dirty.insert(key);
    }

    fn insert_node(&mut self, node: TreeNode) {
        let key = node.key;
        self.removed.remove(&key);
        self.dirty.insert(key);
        self.nodes.insert(key, node);
    }

    fn drop_node(&mut self, key: H256) {
        self.nodes.remove(&key);
        self.dirty.remove(&key);
        self.removed.insert(key);
    }

    /// Write back every touched node; returns the new root.
    fn flush(self) -> Result<H256> {
        for key in &self.removed {
            let store_key = slot_key(self.slot, key_to_u256(key));
            self.store.delete(&store_key, self.dry_run)?;
        }
        for key in &self.dirty {
            let node = self.nodes.get(key).ok_or(BookError::MissingNode(*key))?;
            let store_key = slot_key(self.slot, key_to_u256(key));
            self.store.put(store_key, node.encode()?, self.dry_run)?;
        }
        Ok(self.root)
    }

    // -- link accessors (zero key reads as a black nil node) --

    fn parent(&mut self, key: H256) -> Result<H256> {
        if key.is_zero() {
            return Ok(EMPTY_KEY);
        }
        Ok(self.load(key)?.parent)
    }

    fn left(&mut self, key: H256) -> Result<H256> {
        if key.is_zero() {
            return Ok(EMPTY_KEY);
        }
        Ok(self.load(key)?.left)
    }

    fn right(&mut self, key: H256) -> Result<H256> {
        if key.is_zero() {
            return Ok(EMPTY_KEY);
        }
        Ok(self.load(key)?.right)
    }

    fn color(&mut self, key: H256) -> Result<Color> {
        if key.is_zero() {
            return Ok(Color::Black);
        }
        Ok(self.load(key)?.color)
    }

    fn set_parent(&mut self, key: H256, parent: H256) -> Result<()> {
        if key.is_zero() {
            return Ok(());
        }
        self.load(key)?.parent = parent;
        self.touch(key);
        Ok(())
    }

    fn set_left(&mut self, key: H256, left: H256) -> Result<()> {
        if key.is_zero() {
            return Ok(());
        }
        self.load(key)?.left = left;
        self.touch(key);
        Ok(())
    }

    fn set_right(&mut self, key: H256, right: H256) -> Result<()> {
        if key.is_zero() {
            return Ok(());
        }
        self.load(key)?.right = right;
        self.touch(key);
        Ok(())
    }

    fn set_color(&mut self, key: H256, color: Color) -> Result<()> {
        if key.is_zero() {
            return Ok(());
        }
        self.load(key)?.color = color;
        self.touch(key);
        Ok(())
    }

    fn uncle(&mut self, key: H256) -> Result<H256> {
        let parent = self.parent(key)?;
        let grandparent = self.parent(parent)?;
        if grandparent.is_zero() {
            return Ok(EMPTY_KEY);
        }
        if parent == self.left(grandparent)? {
            self.right(grandparent)
        } else {
            self.left(grandparent)
        }
    }

    fn sibling(&mut self, key: H256) -> Result<H256> {
        let parent = self.parent(key)?;
        if parent.is_zero() {
            return Ok(EMPTY_KEY);
        }
        if key == self.left(parent)? {
            self.right(parent)
        } else {
            self.left(parent)
        }
    }

    // -- structure --

    fn replace_node(&mut self, old: H256, new: H256) -> Result<()> {
        let parent = self.parent(old)?;
        if parent.is_zero() {
            self.root = new;
        } else if old == self.left(parent)? {
            self.set_left(parent, new)?;
        } else {
            self.set_right(parent, new)?;
        }
        self.set_parent(new, parent)
    }

    fn rotate_left(&mut self, key: H256) -> Result<()> {
        let right = self.right(key)?;
        self.replace_node(key, right)?;
        let right_left = self.left(right)?;
        self.set_right(key, right_left)?;
        self.set_parent(right_left, key)?;
        self.set_left(right, key)?;
        self.set_parent(key, right)
    }

    fn rotate_right(&mut self, key: H256) -> Result<()> {
        let left = self.left(key)?;
        self.replace_node(key, left)?;
        let left_right = self.right(left)?;
        self.set_left(key, left_right)?;
        self.set_parent(left_right, key)?;
        self.set_right(left, key)?;
        self.set_parent(key, left)
    }

    /// Exchange the positions (links and colors) of `target` and its
    /// in-order successor. Keys never move between records.
    fn swap_with_successor(&mut self, target: H256, successor: H256) -> Result<()> {
        let target_parent = self.parent(target)?;
        let target_left = self.left(target)?;
        let target_right = self.right(target)?;
        let target_color = self.color(target)?;
        let successor_parent = self.parent(successor)?;
        let successor_right = self.right(successor)?;
        let successor_color = self.color(successor)?;

        if target_parent.is_zero() {
            self.root = successor;
        } else if self.left(target_parent)? == target {
            self.set_left(target_parent, successor)?;
        } else {
            self.set_right(target_parent, successor)?;
        }
        self.set_parent(successor, target_parent)?;
        self.set_left(successor, target_left)?;
        self.set_parent(target_left, successor)?;

        if successor_parent == target {
            self.set_right(successor, target)?;
            self.set_parent(target, successor)?;
        } else {
            self.set_right(successor, target_right)?;
            self.set_parent(target_right, successor)?;
            self.set_left(successor_parent, target)?;
            self.set_parent(target, successor_parent)?;
        }

        self.set_left(target, EMPTY_KEY)?;
        self.set_right(target, successor_right)?;
        self.set_parent(successor_right, target)?;

        self.set_color(successor, target_color)?;
        self.set_color(target, successor_color)
    }

    // -- insert cases 1-5 --

    fn insert_fixup(&mut self, mut node: H256) -> Result<()> {
        loop {
            // case 1: root
            let parent = self.parent(node)?;
            if parent.is_zero() {
                return self.set_color(node, Color::Black);
            }
            // case 2: black parent
            if self.color(parent)? == Color::Black {
                return Ok(());
            }
            // case 3: red uncle, recolor and move up
            let uncle = self.uncle(node)?;
            if self.color(uncle)? == Color::Red {
                let grandparent = self.parent(parent)?;
                self.set_color(parent, Color::Black)?;
                self.set_color(uncle, Color::Black)?;
                self.set_color(grandparent, Color::Red)?;
                node = grandparent;
                continue;
            }
            // case 4: inner child, rotate to outer
            let grandparent = self.parent(parent)?;
            if node == self.right(parent)? && parent == self.left(grandparent)? {
                self.rotate_left(parent)?;
                node = self.left(node)?;
            } else if node == self.left(parent)? && parent == self.right(grandparent)? {
                self.rotate_right(parent)?;
                node = self.right(node)?;
            }
            // case 5: outer child
            let parent = self.parent(node)?;
            let grandparent = self.parent(parent)?;
            self.set_color(parent, Color::Black)?;
            self.set_color(grandparent, Color::Red)?;
            if node == self.left(parent)? && parent == self.left(grandparent)? {
                self.rotate_right(grandparent)?;
            } else if node == self.right(parent)? && parent == self.right(grandparent)? {
                self.rotate_left(grandparent)?;
            }
            return Ok(());
        }
    }

    // -- delete cases 1-6 --

    fn delete_fixup(&mut self, mut node: H256) -> Result<()> {
        loop {
            // case 1: root
            let parent = self.parent(node)?;
            if parent.is_zero() {
                return Ok(());
            }
            // case 2: red sibling
            let sibling = self.sibling(node)?;
            if self.color(sibling)? == Color::Red {
                self.set_color(parent, Color::Red)?;
                self.set_color(sibling, Color::Black)?;
                if node == self.left(parent)? {
                    self.rotate_left(parent)?;
                } else {
                    self.rotate_right(parent)?;
                }
            }
            // case 3: black parent, black sibling with black children
            let parent = self.parent(node)?;
            let sibling = self.sibling(node)?;
            let sibling_left = self.left(sibling)?;
            let sibling_right = self.right(sibling)?;
            let parent_color = self.color(parent)?;
            let sibling_black = self.color(sibling)? == Color::Black;
            let left_black = self.color(sibling_left)? == Color::Black;
            let right_black = self.color(sibling_right)? == Color::Black;
            if parent_color == Color::Black && sibling_black && left_black && right_black {
                self.set_color(sibling, Color::Red)?;
                node = parent;
                continue;
            }
            // case 4: red parent, black sibling with black children
            if parent_color == Color::Red && sibling_black && left_black && right_black {
                self.set_color(sibling, Color::Red)?;
                return self.set_color(parent, Color::Black);
            }
            // case 5: sibling's inner child is red
            let node_is_left = node == self.left(parent)?;
            if node_is_left && sibling_black && !left_black && right_black {
                self.set_color(sibling, Color::Red)?;
                self.set_color(sibling_left, Color::Black)?;
                self.rotate_right(sibling)?;
            } else if !node_is_left && sibling_black && !right_black && left_black {
                self.set_color(sibling, Color::Red)?;
                self.set_color(sibling_right, Color::Black)?;
                self.rotate_left(sibling)?;
            }
            // case 6: sibling's outer child is red
            let parent = self.parent(node)?;
            let sibling = self.sibling(node)?;
            let parent_color = self.color(parent)?;
            self.set_color(sibling, parent_color)?;
            self.set_color(parent, Color::Black)?;
            let sibling_left = self.left(sibling)?;
            let sibling_right = self.right(sibling)?;
            if node == self.left(parent)? && self.color(sibling_right)? == Color::Red {
                self.set_color(sibling_right, Color::Black)?;
                self.rotate_left(parent)?;
            } else if self.color(sibling_left)? == Color::Red {
                self.set_color(sibling_left, Color::Black)?;
                self.rotate_right(parent)?;
            }
            return Ok(());
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
