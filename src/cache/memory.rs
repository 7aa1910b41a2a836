//! In-process cache storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{CacheKey, Response};

type Partitions = Vec<(String, HashMap<CacheKey, Response>)>;

/// Cache storage held in memory. Clones share the same partitions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    partitions: Arc<Mutex<Partitions>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Partitions> {
        // Every write is a single map operation, so a poisoned map is still whole.
        self.partitions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut partitions = self.lock();
        if !partitions.iter().any(|(n, _)| n == name) {
            partitions.push((name.to_string(), HashMap::new()));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.lock().iter().any(|(n, _)| n == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut partitions = self.lock();
        let before = partitions.len();
        partitions.retain(|(n, _)| n != name);
        Ok(partitions.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock().iter().map(|(n, _)| n.clone()).collect())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>> {
        let partitions = self.lock();
        let (_, entries) = partitions
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        let mut keys: Vec<_> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<()> {
        let mut partitions = self.lock();
        let (_, stored) = partitions
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))?;
        stored.extend(entries);
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        Ok(self
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, entries)| entries.get(key).cloned()))
    }
}
