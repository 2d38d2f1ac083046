//! Key-value store abstraction.
//!
//! ## Layers
//!
//! ```text
//! dry-run overlay  (dry_run = true: reads first, writes only)
//!       |
//! pending batch    (durable writes not yet committed)
//!       |
//! Backend          (memory or sled)
//! ```
//!
//! - Non-dry-run writes land in the pending batch and become durable on
//!   [`KeyValueStore::commit`], as one atomic backend batch.
//! - Dry-run writes land only in the overlay. A deletion is an overlay entry
//!   holding `None`. [`KeyValueStore::save_dry_run_result`] replays the overlay
//!   into the backend; [`KeyValueStore::init_dry_run`] discards it.
//!
//! Keys are 32-byte hashes. The all-zero key is the empty sentinel and can
//! never hold a value.

mod memory;
mod sled_backend;

pub use memory::MemoryBackend;
pub use sled_backend::SledBackend;

use std::collections::{BTreeMap, HashMap};

use primitive_types::H256;
use tracing::debug;

use crate::error::StoreError;

/// Store operations used by the book and the versioned state.
pub trait KeyValueStore {
    fn has(&self, key: &H256, dry_run: bool) -> Result<bool, StoreError>;

    fn get(&self, key: &H256, dry_run: bool) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, key: H256, value: Vec<u8>, dry_run: bool) -> Result<(), StoreError>;

    fn delete(&mut self, key: &H256, dry_run: bool) -> Result<(), StoreError>;

    /// Write pending durable changes to the backend.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Drop every dry-run write.
    fn init_dry_run(&mut self);

    /// Flush the dry-run overlay into the backend atomically and clear it.
    fn save_dry_run_result(&mut self) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn has(&self, key: &H256, dry_run: bool) -> Result<bool, StoreError> {
        (**self).has(key, dry_run)
    }

    fn get(&self, key: &H256, dry_run: bool) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key, dry_run)
    }

    fn put(&mut self, key: H256, value: Vec<u8>, dry_run: bool) -> Result<(), StoreError> {
        (**self).put(key, value, dry_run)
    }

    fn delete(&mut self, key: &H256, dry_run: bool) -> Result<(), StoreError> {
        (**self).delete(key, dry_run)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        (**self).commit()
    }

    fn init_dry_run(&mut self) {
        (**self).init_dry_run()
    }

    fn save_dry_run_result(&mut self) -> Result<(), StoreError> {
        (**self).save_dry_run_result()
    }
}

/// Raw durable storage.
///
/// `write_batch` must apply all operations or none. `None` deletes.
pub trait Backend {
    fn read(&self, key: &H256) -> Result<Option<Vec<u8>>, StoreError>;

    fn write_batch(&mut self, ops: Vec<(H256, Option<Vec<u8>>)>) -> Result<(), StoreError>;
}

/// Backend chosen at runtime from configuration.
pub enum AnyBackend {
    Memory(MemoryBackend),
    Sled(SledBackend),
}

impl Backend for AnyBackend {
    fn read(&self, key: &H256) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            AnyBackend::Memory(backend) => backend.read(key),
            AnyBackend::Sled(backend) => backend.read(key),
        }
    }

    fn write_batch(&mut self, ops: Vec<(H256, Option<Vec<u8>>)>) -> Result<(), StoreError> {
        match self {
            AnyBackend::Memory(backend) => backend.write_batch(ops),
            AnyBackend::Sled(backend) => backend.write_batch(ops),
        }
    }
}

/// Store over a configured backend
pub type AnyStore = Store<AnyBackend>;

/// Store with pending batch and dry-run overlay over a [`Backend`].
#[derive(Debug, Default)]
pub struct Store<B> {
    backend: B,
    pending: BTreeMap<H256, Option<Vec<u8>>>,
    dry_run_cache: HashMap<H256, Option<Vec<u8>>>,
}

/// In-memory store
pub type MemoryStore = Store<MemoryBackend>;

/// Sled-backed store
pub type SledStore = Store<SledBackend>;

impl<B: Backend> Store<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pending: BTreeMap::new(),
            dry_run_cache: HashMap::new(),
        }
    }

    /// Access the backend (durable state only).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of uncommitted durable writes
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of dry-run overlay entries
    pub fn dry_run_len(&self) -> usize {
        self.dry_run_cache.len()
    }

    fn read_committed(&self, key: &H256) -> Result<Option<Vec<u8>>, StoreError> {
        match self.pending.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => self.backend.read(key),
        }
    }
}

impl MemoryStore {
    /// Empty in-memory store
    pub fn memory() -> Self {
        Store::new(MemoryBackend::default())
    }
}

impl<B: Backend> KeyValueStore for Store<B> {
    fn has(&self, key: &H256, dry_run: bool) -> Result<bool, StoreError> {
        Ok(self.get(key, dry_run)?.is_some())
    }

    fn get(&self, key: &H256, dry_run: bool) -> Result<Option<Vec<u8>>, StoreError> {
        if key.is_zero() {
            return Ok(None);
        }
        if dry_run {
            if let Some(entry) = self.dry_run_cache.get(key) {
                return Ok(entry.clone());
            }
        }
        self.read_committed(key)
    }

    fn put(&mut self, key: H256, value: Vec<u8>, dry_run: bool) -> Result<(), StoreError> {
        if key.is_zero() {
            return Err(StoreError::ReservedKey);
        }
        if dry_run {
            self.dry_run_cache.insert(key, Some(value));
        } else {
            self.pending.insert(key, Some(value));
        }
        Ok(())
    }

    fn delete(&mut self, key: &H256, dry_run: bool) -> Result<(), StoreError> {
        if key.is_zero() {
            return Ok(());
        }
        if dry_run {
            self.dry_run_cache.insert(*key, None);
        } else {
            self.pending.insert(*key, None);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops: Vec<_> = std::mem::take(&mut self.pending).into_iter().collect();
        debug!(writes = ops.len(), "committing store batch");
        self.backend.write_batch(ops)
    }

    fn init_dry_run(&mut self) {
        self.dry_run_cache.clear();
    }

    fn save_dry_run_result(&mut self) -> Result<(), StoreError> {
        // Pending writes are older than the overlay: flush them first so the
        // overlay wins on conflicting keys.
        self.commit()?;
        let mut ops: Vec<_> = self.dry_run_cache.drain().collect();
        ops.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(writes = ops.len(), "saving dry-run result");
        self.backend.write_batch(ops)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
