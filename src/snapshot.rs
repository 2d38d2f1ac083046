//! Point-in-time export of order books.
//!
//! A snapshot holds, per book, the raw records reachable from the book:
//! the book record, both tree records, every price-index node and every
//! linked order record. Restoring writes them back byte for byte, so the
//! price index comes back with the exact same shape and the book hash can
//! be checked against the one captured.
//!
//! Snapshots are bincode blobs stored under `sha256("snapshot" ‖ block)`.
//! The blocks that currently hold a snapshot are listed in an index record
//! under `sha256("snapshot" ‖ "index")` so pruning can find all of them.

use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{hash_hex, sha256};
use crate::error::{BookError, CodecError, Result};
use crate::orderbook::{book_key, OrderBook};
use crate::store::{KeyValueStore, MemoryStore};
use crate::types::Side;

const DOMAIN: &[u8] = b"snapshot";
const INDEX: &[u8] = b"index";

/// Records of one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub base_token: H160,
    pub quote_token: H160,

    /// Book hash at capture time
    pub hash: H256,
    pub records: Vec<(H256, Vec<u8>)>,
}

impl BookSnapshot {
    /// Collect every record reachable from the book of a pair.
    pub fn capture<S: KeyValueStore>(store: &mut S, base_token: H160, quote_token: H160) -> Result<Self> {
        let book = OrderBook::load(&mut *store, base_token, quote_token, false)?;
        let mut keys = vec![book.key()];

        for side in [Side::Buy, Side::Sell] {
            let tree = book.tree(side);
            keys.push(tree.key());
            let index = tree.price_index();
            for node in index.nodes(book.store(), false)? {
                keys.push(index.store_key(&node.key));
            }
            for list in tree.lists(book.store(), false)? {
                for node in list.nodes(book.store(), false)? {
                    keys.push(list.order_store_key(&node.key()));
                }
            }
        }

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = book
                .store()
                .get(&key, false)?
                .ok_or(BookError::MissingNode(key))?;
            records.push((key, bytes));
        }

        Ok(Self {
            base_token,
            quote_token,
            hash: book.hash()?,
            records,
        })
    }
}

/// All books at one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub block: u64,
    pub books: Vec<BookSnapshot>,
}

impl Snapshot {
    fn storage_key(block: u64) -> H256 {
        sha256(&[DOMAIN, &block.to_be_bytes()])
    }

    /// Capture the books of `pairs`. Every pair must have a book.
    pub fn capture<S: KeyValueStore>(store: &mut S, block: u64, pairs: &[(H160, H160)]) -> Result<Self> {
        let books = pairs
            .iter()
            .map(|(base, quote)| BookSnapshot::capture(store, *base, *quote))
            .collect::<Result<Vec<_>>>()?;
        debug!(block, books = books.len(), "snapshot captured");
        Ok(Self { block, books })
    }

    pub fn record_count(&self) -> usize {
        self.books.iter().map(|b| b.records.len()).sum()
    }

    /// Store durably under the block number.
    pub fn save<S: KeyValueStore>(&self, store: &mut S) -> Result<()> {
        let bytes = bincode::serialize(self).map_err(CodecError::from)?;
        store.put(Self::storage_key(self.block), bytes, false)?;

        let mut blocks = Self::blocks(store)?;
        if let Err(pos) = blocks.binary_search(&self.block) {
            blocks.insert(pos, self.block);
            Self::put_index(store, &blocks)?;
        }
        store.commit()?;
        info!(block = self.block, records = self.record_count(), "snapshot saved");
        Ok(())
    }

    pub fn load<S: KeyValueStore>(store: &S, block: u64) -> Result<Option<Self>> {
        match store.get(&Self::storage_key(block), false)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(CodecError::from)?)),
            None => Ok(None),
        }
    }

    /// Blocks holding a saved snapshot, ascending.
    pub fn blocks<S: KeyValueStore>(store: &S) -> Result<Vec<u64>> {
        match store.get(&Self::index_key(), false)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes).map_err(CodecError::from)?),
            None => Ok(Vec::new()),
        }
    }

    fn index_key() -> H256 {
        sha256(&[DOMAIN, INDEX])
    }

    fn put_index<S: KeyValueStore>(store: &mut S, blocks: &[u64]) -> Result<()> {
        if blocks.is_empty() {
            store.delete(&Self::index_key(), false)?;
        } else {
            let bytes = bincode::serialize(blocks).map_err(CodecError::from)?;
            store.put(Self::index_key(), bytes, false)?;
        }
        Ok(())
    }

    /// Delete every snapshot at or below `block - keep`.
    pub fn prune<S: KeyValueStore>(store: &mut S, block: u64, keep: u64) -> Result<()> {
        if keep == 0 || block < keep {
            return Ok(());
        }
        let stale = block - keep;
        let mut blocks = Self::blocks(store)?;
        let split = blocks.partition_point(|b| *b <= stale);
        if split == 0 {
            return Ok(());
        }
        let retained = blocks.split_off(split);
        for old in &blocks {
            store.delete(&Self::storage_key(*old), false)?;
        }
        Self::put_index(store, &retained)?;
        store.commit()?;
        debug!(pruned = blocks.len(), up_to = stale, "snapshots pruned");
        Ok(())
    }

    /// Write the records back and verify every book hash.
    ///
    /// The records are first loaded into a scratch store and every book hash
    /// is checked there. Only when all of them match are the records written
    /// durably and committed, so on a mismatch the target store is untouched.
    /// The caller's dry-run overlay is left as it was.
    pub fn restore<S: KeyValueStore>(&self, store: &mut S) -> Result<()> {
        let mut scratch = MemoryStore::memory();
        for book in &self.books {
            for (key, bytes) in &book.records {
                scratch.put(*key, bytes.clone(), false)?;
            }
        }

        for book in &self.books {
            let actual = OrderBook::load(&mut scratch, book.base_token, book.quote_token, false)?.hash()?;
            if actual != book.hash {
                let key = book_key(book.base_token, book.quote_token);
                warn!(book = %hash_hex(&key), "snapshot hash mismatch");
                return Err(BookError::SnapshotHashMismatch {
                    book: key,
                    expected: book.hash,
                    actual,
                });
            }
        }

        for book in &self.books {
            for (key, bytes) in &book.records {
                store.put(*key, bytes.clone(), false)?;
            }
        }
        store.commit()?;
        info!(block = self.block, books = self.books.len(), "snapshot restored");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
