//! In-process store and tag index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::store::{CacheStore, TagIndex};
use crate::Error;
use crate::clock::{SharedClock, expiry_after, system_clock};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory [`CacheStore`].
///
/// Expired entries stay in the map until overwritten, deleted, or purged.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    available: AtomicBool,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self { entries: Mutex::new(HashMap::new()), available: AtomicBool::new(true), clock }
    }

    /// Force the liveness probe result.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of physically present entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Physically remove expired entries and unlink them from `index`.
    ///
    /// The entry lock is held while the index is updated, so a concurrent
    /// write of a purged key registers its tags after the unlink.
    ///
    /// Returns the number of removed entries.
    pub async fn purge_expired(&self, index: &MemoryTagIndex) -> u64 {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut maps = index.maps.lock().await;
        for key in &expired {
            entries.remove(key);
            maps.unlink(key);
        }
        expired.len() as u64
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store marked unavailable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.check_available()?;
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<(), Error> {
        self.check_available()?;
        let expires_at = expiry_after(self.clock.now(), ttl_seconds)?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.check_available()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.check_available()?;
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Default)]
struct TagMaps {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, HashSet<String>>,
}

impl TagMaps {
    fn unlink(&mut self, key: &str) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }
}

/// In-memory [`TagIndex`].
///
/// Both directions live under one lock, so every update is atomic.
#[derive(Debug, Default)]
pub struct MemoryTagIndex {
    maps: Mutex<TagMaps>,
}

impl MemoryTagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags currently associated with `key`, sorted.
    pub async fn tags_for_key(&self, key: &str) -> Vec<String> {
        let maps = self.maps.lock().await;
        let mut tags: Vec<String> = maps.by_key.get(key).into_iter().flatten().cloned().collect();
        tags.sort();
        tags
    }
}

#[async_trait]
impl TagIndex for MemoryTagIndex {
    async fn register(&self, key: &str, tags: &[String]) -> Result<(), Error> {
        let mut maps = self.maps.lock().await;
        maps.unlink(key);
        if tags.is_empty() {
            return Ok(());
        }
        for tag in tags {
            maps.by_tag.entry(tag.clone()).or_default().insert(key.to_string());
        }
        maps.by_key.insert(key.to_string(), tags.iter().cloned().collect());
        Ok(())
    }

    async fn deregister(&self, key: &str) -> Result<(), Error> {
        self.maps.lock().await.unlink(key);
        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, Error> {
        let maps = self.maps.lock().await;
        let mut keys: Vec<String> = maps.by_tag.get(tag).into_iter().flatten().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
