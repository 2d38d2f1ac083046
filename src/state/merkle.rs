//! Authenticated map: a sorted key/value set with a Merkle root.
//!
//! ## Root
//!
//! ```text
//! leaf_i = sha256(key_i ‖ value_i)          (keys ascending)
//! level  = pairwise sha256(left ‖ right)     (odd node pairs with itself)
//! root   = last remaining hash, zero for an empty map
//! ```
//!
//! The leaf set is persisted with bincode under `sha256("authmap" ‖ root)`,
//! so a map can be reloaded from nothing but its root.

use std::collections::BTreeMap;

use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::codec::{sha256, EMPTY_KEY};
use crate::error::{BookError, CodecError, Result};
use crate::store::KeyValueStore;

const DOMAIN: &[u8] = b"authmap";

#[derive(Serialize, Deserialize)]
struct Leaves(Vec<([u8; 32], [u8; 32])>);

/// Sorted map with a deterministic Merkle root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthMap {
    entries: BTreeMap<H256, H256>,
}

impl AuthMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &H256) -> Option<H256> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: H256, value: H256) -> Option<H256> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &H256) -> Option<H256> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H256, &H256)> {
        self.entries.iter()
    }

    pub fn root(&self) -> H256 {
        let mut level: Vec<H256> = self
            .entries
            .iter()
            .map(|(k, v)| sha256(&[k.as_bytes(), v.as_bytes()]))
            .collect();
        if level.is_empty() {
            return EMPTY_KEY;
        }
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    sha256(&[pair[0].as_bytes(), right.as_bytes()])
                })
                .collect();
        }
        level[0]
    }

    fn storage_key(root: &H256) -> H256 {
        sha256(&[DOMAIN, root.as_bytes()])
    }

    /// Persist the leaf set and return the root. Empty maps write nothing.
    pub fn commit<S: KeyValueStore>(&self, store: &mut S) -> Result<H256> {
        let root = self.root();
        if root == EMPTY_KEY {
            return Ok(root);
        }
        let leaves = Leaves(self.entries.iter().map(|(k, v)| (k.0, v.0)).collect());
        let bytes = bincode::serialize(&leaves).map_err(CodecError::from)?;
        store.put(Self::storage_key(&root), bytes, false)?;
        Ok(root)
    }

    /// Reload a map by root. The zero root is the empty map.
    pub fn load<S: KeyValueStore>(store: &S, root: &H256) -> Result<Self> {
        if *root == EMPTY_KEY {
            return Ok(Self::new());
        }
        let bytes = store
            .get(&Self::storage_key(root), false)?
            .ok_or(BookError::MissingNode(*root))?;
        let Leaves(leaves) = bincode::deserialize(&bytes).map_err(CodecError::from)?;
        let map = Self {
            entries: leaves.into_iter().map(|(k, v)| (H256(k), H256(v))).collect(),
        };
        if map.root() != *root {
            return Err(BookError::MissingNode(*root));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn h(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(AuthMap::new().root(), EMPTY_KEY);
    }

    #[test]
    fn test_root_independent_of_insert_order() {
        let mut a = AuthMap::new();
        let mut b = AuthMap::new();
        for i in 1..=5u8 {
            a.insert(h(i), h(i + 10));
        }
        for i in (1..=5u8).rev() {
            b.insert(h(i), h(i + 10));
        }
        assert_eq!(a.root(), b.root());

        b.insert(h(3), h(99));
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_single_leaf_root() {
        let mut map = AuthMap::new();
        map.insert(h(1), h(2));
        assert_eq!(map.root(), sha256(&[h(1).as_bytes(), h(2).as_bytes()]));
    }

    #[test]
    fn test_commit_and_load() {
        let mut store = MemoryStore::memory();
        let mut map = AuthMap::new();
        map.insert(h(1), h(2));
        map.insert(h(3), h(4));
        map.insert(h(5), h(6));

        let root = map.commit(&mut store).unwrap();
        let loaded = AuthMap::load(&store, &root).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_load_unknown_root() {
        let store = MemoryStore::memory();
        let err = AuthMap::load(&store, &h(7)).unwrap_err();
        assert!(matches!(err, BookError::MissingNode(_)));
    }
}
