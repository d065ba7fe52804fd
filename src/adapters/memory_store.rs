//! In-memory [`StoragePort`] for host builds and tests.
//!
//! Keys are `namespace::key`. An optional byte budget makes writes fail
//! with [`StorageError::Full`] the way a nearly full flash partition would.

use std::collections::HashMap;

use crate::app::ports::{StorageError, StoragePort};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that holds at most `bytes` of values in total.
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: Some(bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .entries
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        // Same as NVS: a short buffer is an error, not a truncated read.
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::IoError)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        if let Some(cap) = self.capacity {
            let replaced = self.entries.get(&composite).map_or(0, Vec::len);
            if self.used_bytes() - replaced + data.len() > cap {
                return Err(StorageError::Full);
            }
        }
        self.entries.insert(composite, data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries.remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&Self::composite_key(namespace, key))
    }
}
