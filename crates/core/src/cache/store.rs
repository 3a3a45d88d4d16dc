//! Store and tag index contracts.
//!
//! A [`CacheStore`] is a plain key/value store with per-entry TTL. It may be
//! remote and may be down; every method is fallible and callers turn failures
//! into misses or no-ops.
//!
//! A [`TagIndex`] is the reverse index (tag → keys) used for tag sweeps.
//! Stores that cannot delete by tag natively get one alongside.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

/// Key/value store with per-entry TTL and lazy expiry.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Get a live value. Entries past their expiry are reported as absent even
    /// if they have not been physically removed.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Write a value, replacing any existing entry for `key`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<(), Error>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// Returns whether an entry, live or expired, was physically removed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Cheap liveness probe.
    async fn is_available(&self) -> bool;

    /// Whether [`CacheStore::keys_with_prefix`] is supported.
    fn supports_enumeration(&self) -> bool {
        false
    }

    /// List keys that start with the literal `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Err(Error::Unsupported(format!("key enumeration (prefix {prefix:?})")))
    }
}

/// Reverse index from tag to the keys written under it.
///
/// Each method must apply atomically per key: a concurrent `register` and
/// `deregister` for the same key never leave a half-updated association.
#[async_trait]
pub trait TagIndex: Send + Sync + std::fmt::Debug {
    /// Associate `key` with exactly `tags`, replacing earlier associations.
    async fn register(&self, key: &str, tags: &[String]) -> Result<(), Error>;

    /// Drop every association of `key`.
    async fn deregister(&self, key: &str) -> Result<(), Error>;

    /// Keys currently associated with `tag`.
    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, Error>;
}

/// Run a store operation under a deadline.
///
/// An elapsed deadline is reported as [`Error::StoreUnavailable`], the same as
/// an unreachable store.
pub async fn bounded<T>(limit: Duration, op: &str, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreUnavailable(format!("{op} timed out after {}ms", limit.as_millis()))),
    }
}
