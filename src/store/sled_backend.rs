//! Sled-backed durable storage.

use std::path::Path;

use primitive_types::H256;
use tracing::info;

use crate::error::StoreError;
use crate::store::{Backend, Store};

/// Backend over an embedded sled database.
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened sled backend");
        Ok(Self { db })
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl Backend for SledBackend {
    fn read(&self, key: &H256) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn write_batch(&mut self, ops: Vec<(H256, Option<Vec<u8>>)>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in ops {
            match value {
                Some(bytes) => batch.insert(key.as_bytes(), bytes),
                None => batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}

impl Store<SledBackend> {
    pub fn sled<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Store::new(SledBackend::open(path)?))
    }
}
