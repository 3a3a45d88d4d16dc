//! Key/value entry operations.
//!
//! Implements [`CacheStore`] for [`CacheDb`] over the `cache_entries` table.

use super::connection::CacheDb;
use super::store::CacheStore;
use crate::Error;
use crate::clock::{expiry_after, timestamp};
use async_trait::async_trait;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl CacheDb {
    /// Get a live entry value by key.
    ///
    /// Returns None if the key doesn't exist or has expired.
    pub async fn get_entry(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = key.to_string();
        let now = timestamp(self.clock.now());
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let mut stmt = conn.prepare("SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2")?;

                match stmt.query_row(params![key, now], |row| row.get(0)) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry.
    pub async fn put_entry(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<(), Error> {
        let key = key.to_string();
        let now = self.clock.now();
        let created_at = timestamp(now);
        let expires_at = timestamp(expiry_after(now, ttl_seconds)?);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, created_at, expires_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at",
                    params![key, value, created_at, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an entry. Deleting an absent key is a no-op.
    ///
    /// Returns whether a row was removed.
    pub async fn delete_entry(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List keys beginning with the literal `prefix`, including expired ones.
    pub async fn entry_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key FROM cache_entries
                    WHERE substr(key, 1, length(?1)) = ?1
                    ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![prefix], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired entries and their tag associations.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_entries(&self) -> Result<u64, Error> {
        let now = timestamp(self.clock.now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM cache_tags WHERE key IN (
                        SELECT key FROM cache_entries WHERE expires_at <= ?1
                    )",
                    params![now],
                )?;
                let count = tx.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now])?;
                tx.commit()?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl CacheStore for CacheDb {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.get_entry(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<(), Error> {
        self.put_entry(key, value, ttl_seconds).await
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.delete_entry(key).await
    }

    async fn is_available(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "cache database ping failed");
                false
            }
        }
    }

    fn supports_enumeration(&self) -> bool {
        true
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.entry_keys_with_prefix(prefix).await
    }
}
