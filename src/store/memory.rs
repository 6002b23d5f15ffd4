use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::store::error::StoreError;
use crate::store::traits::KVStore;

/// MemoryStore keeps everything in a sorted map. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Storage("memory store lock poisoned".to_string())
}

impl KVStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut results = Vec::new();
        for (key, value) in entries.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.clone(), value.clone()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_is_sorted_and_prefix_bounded() {
        let store = MemoryStore::new();
        store.set("b:2", b"2").unwrap();
        store.set("b:1", b"1").unwrap();
        store.set("a:1", b"0").unwrap();
        store.set("c:1", b"3").unwrap();

        let hits = store.scan("b:").unwrap();
        assert_eq!(
            hits,
            vec![("b:1".to_string(), b"1".to_vec()), ("b:2".to_string(), b"2".to_vec())]
        );
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let store = MemoryStore::new();
        store.delete("nope").unwrap();
        assert!(store.is_empty());
    }
}
