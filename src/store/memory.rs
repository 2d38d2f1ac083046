//! In-memory backend.

use std::collections::BTreeMap;

use primitive_types::H256;

use crate::error::StoreError;
use crate::store::Backend;

/// Backend holding committed records in a sorted map.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    items: BTreeMap<H256, Vec<u8>>,
}

impl MemoryBackend {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of every committed record, in key order.
    pub fn entries(&self) -> Vec<(H256, Vec<u8>)> {
        self.items
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect()
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &H256) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.items.get(key).cloned())
    }

    fn write_batch(&mut self, ops: Vec<(H256, Option<Vec<u8>>)>) -> Result<(), StoreError> {
        for (key, value) in ops {
            match value {
                Some(bytes) => {
                    self.items.insert(key, bytes);
                }
                None => {
                    self.items.remove(&key);
                }
            }
        }
        Ok(())
    }
}
