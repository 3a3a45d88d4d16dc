//! Cache invalidation.
//!
//! Removes entries by exact key, by tag sweep, or by literal key prefix.
//! Every operation is idempotent: removing something that is not there
//! succeeds. Failures are logged and reported as [`Error::Invalidation`];
//! nothing is retried here.

use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::cache::{CacheStore, TagIndex, bounded};
use crate::strategy::{CacheStrategyConfig, InvalidationMode};

/// Applies invalidation strategies against a store and its tag index.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    index: Arc<dyn TagIndex>,
    timeout: Duration,
}

impl CacheInvalidator {
    pub fn new(store: Arc<dyn CacheStore>, index: Arc<dyn TagIndex>, timeout: Duration) -> Self {
        Self { store, index, timeout }
    }

    /// Invalidate according to a strategy's mode.
    ///
    /// - `exact`: delete `key`.
    /// - `tag`: sweep every tag of the strategy; falls back to `exact` when
    ///   the strategy carries no tags.
    /// - `pattern`: treat `key` as a literal prefix.
    ///
    /// Returns the number of entries that existed and were removed.
    pub async fn invalidate(&self, key: &str, strategy: &CacheStrategyConfig) -> Result<usize, Error> {
        match strategy.invalidation_mode {
            InvalidationMode::Exact => self.invalidate_key(key).await,
            InvalidationMode::Tag if strategy.tags.is_empty() => self.invalidate_key(key).await,
            InvalidationMode::Tag => {
                let mut removed = 0;
                for tag in &strategy.tags {
                    removed += self.invalidate_by_tag(tag).await?;
                }
                Ok(removed)
            }
            InvalidationMode::Pattern => self.invalidate_prefix(key).await,
        }
    }

    /// Delete one key and its tag associations.
    ///
    /// Returns 1 when an entry was removed and 0 when there was none.
    pub async fn invalidate_key(&self, key: &str) -> Result<usize, Error> {
        let existed = self.remove(key).await.map_err(|e| {
            tracing::warn!(key, error = %e, "cache invalidation failed");
            Error::Invalidation(format!("key {key:?}: {e}"))
        })?;
        tracing::debug!(key, existed, "cache key invalidated");
        Ok(usize::from(existed))
    }

    /// Delete every key currently registered under `tag`.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, Error> {
        let keys = bounded(self.timeout, "keys_for_tag", self.index.keys_for_tag(tag))
            .await
            .map_err(|e| {
                tracing::warn!(tag, error = %e, "tag lookup failed");
                Error::Invalidation(format!("tag {tag:?}: {e}"))
            })?;

        let removed = self.remove_all(&keys, "tag", tag).await?;
        tracing::debug!(tag, removed, "cache tag invalidated");
        Ok(removed)
    }

    /// Delete every key starting with the literal `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when the store cannot enumerate keys.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, Error> {
        if !self.store.supports_enumeration() {
            return Err(Error::Unsupported(format!("prefix invalidation of {prefix:?}")));
        }

        let keys = bounded(self.timeout, "keys_with_prefix", self.store.keys_with_prefix(prefix))
            .await
            .map_err(|e| {
                tracing::warn!(prefix, error = %e, "prefix enumeration failed");
                Error::Invalidation(format!("prefix {prefix:?}: {e}"))
            })?;

        let removed = self.remove_all(&keys, "prefix", prefix).await?;
        tracing::debug!(prefix, removed, "cache prefix invalidated");
        Ok(removed)
    }

    /// Remove each key, continuing past failures. Counts entries that existed.
    async fn remove_all(&self, keys: &[String], kind: &str, selector: &str) -> Result<usize, Error> {
        let mut removed = 0;
        let mut failed = 0;
        for key in keys {
            match self.remove(key).await {
                Ok(existed) => removed += usize::from(existed),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(key, kind, selector, error = %e, "cache invalidation failed");
                }
            }
        }

        if failed > 0 {
            return Err(Error::Invalidation(format!(
                "{kind} {selector:?}: {failed} of {} keys could not be removed",
                keys.len()
            )));
        }
        Ok(removed)
    }

    /// The entry goes first; the tag association is kept until the entry is
    /// gone so a failed delete can still be found by a later sweep.
    async fn remove(&self, key: &str) -> Result<bool, Error> {
        let existed = bounded(self.timeout, "delete", self.store.delete(key)).await?;
        bounded(self.timeout, "deregister", self.index.deregister(key)).await?;
        Ok(existed)
    }
}
