// In-memory хранилище для тестов и встраивания

use crate::storage::StorageBackend;
use crate::utils::error::{E2eeError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-memory backend: namespace → (key → bytes)
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Симулировать отказ хранилища (все операции вернут `Storage` ошибку)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(E2eeError::Storage("Storage unavailable".to_string()))
        }
    }

    /// Общее количество записей во всех namespace
    pub fn len(&self) -> usize {
        self.namespaces
            .read()
            .map(|map| map.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> E2eeError {
    E2eeError::Storage("Storage lock poisoned".to_string())
}

impl StorageBackend for MemoryBackend {
    fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_available()?;
        let mut map = self.namespaces.write().map_err(poisoned)?;
        map.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let map = self.namespaces.read().map_err(poisoned)?;
        Ok(map.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.check_available()?;
        let map = self.namespaces.read().map_err(poisoned)?;
        Ok(map
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let mut map = self.namespaces.write().map_err(poisoned)?;
        Ok(map.get_mut(namespace).and_then(|ns| ns.remove(key)))
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.check_available()?;
        let mut map = self.namespaces.write().map_err(poisoned)?;
        map.remove(namespace);
        Ok(())
    }
}
