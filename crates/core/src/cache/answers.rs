//! Answer-cache row operations.
//!
//! Stores synthesized semantic-search answers keyed by content hash. The
//! [`crate::AnswerCache`] wrapper owns normalization and hashing; this module
//! only moves rows.

use super::connection::CacheDb;
use crate::Error;
use crate::clock::{expiry_after, parse_timestamp, timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

const SELECT_RECORD: &str = "SELECT
    query_hash, tenant_id, query_text, answer, confidence_score,
    hit_count, created_at, expires_at
FROM answer_cache WHERE query_hash = ?1";

/// A cached semantic-search answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCacheRecord {
    pub query_hash: String,
    pub tenant_id: String,
    /// Normalized query text the hash was computed from.
    pub query_text: String,
    pub answer: String,
    pub confidence_score: f64,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AnswerCacheRecord {
    /// Whether the record is still servable at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Fields needed to write an answer row.
#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub query_hash: String,
    pub tenant_id: String,
    pub query_text: String,
    pub answer: String,
    pub confidence_score: f64,
    pub ttl_seconds: u64,
}

/// Aggregate counters over answer rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerStats {
    /// Rows physically present, expired or not.
    pub records: u64,
    pub fresh_records: u64,
    pub total_hits: u64,
}

struct RawAnswer {
    query_hash: String,
    tenant_id: String,
    query_text: String,
    answer: String,
    confidence_score: f64,
    hit_count: i64,
    created_at: String,
    expires_at: String,
}

impl RawAnswer {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            query_hash: row.get(0)?,
            tenant_id: row.get(1)?,
            query_text: row.get(2)?,
            answer: row.get(3)?,
            confidence_score: row.get(4)?,
            hit_count: row.get(5)?,
            created_at: row.get(6)?,
            expires_at: row.get(7)?,
        })
    }
}

impl TryFrom<RawAnswer> for AnswerCacheRecord {
    type Error = Error;

    fn try_from(raw: RawAnswer) -> Result<Self, Error> {
        let created_at = parse_timestamp(&raw.created_at)
            .map_err(|e| Error::Serialization(format!("created_at {:?}: {e}", raw.created_at)))?;
        let expires_at = parse_timestamp(&raw.expires_at)
            .map_err(|e| Error::Serialization(format!("expires_at {:?}: {e}", raw.expires_at)))?;

        Ok(Self {
            query_hash: raw.query_hash,
            tenant_id: raw.tenant_id,
            query_text: raw.query_text,
            answer: raw.answer,
            confidence_score: raw.confidence_score,
            hit_count: raw.hit_count.max(0) as u64,
            created_at,
            expires_at,
        })
    }
}

impl CacheDb {
    /// Fetch a fresh answer and count the hit.
    ///
    /// The increment and the read happen in one transaction. Returns None,
    /// without touching the row, if the hash is unknown or expired.
    pub async fn hit_answer(&self, query_hash: &str) -> Result<Option<AnswerCacheRecord>, Error> {
        let query_hash = query_hash.to_string();
        let now = timestamp(self.clock.now());
        self.conn
            .call(move |conn| -> Result<Option<AnswerCacheRecord>, Error> {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE answer_cache SET hit_count = hit_count + 1
                    WHERE query_hash = ?1 AND expires_at > ?2",
                    params![query_hash, now],
                )?;
                if updated == 0 {
                    return Ok(None);
                }

                let raw = tx.query_row(SELECT_RECORD, params![query_hash], RawAnswer::from_row)?;
                tx.commit()?;
                AnswerCacheRecord::try_from(raw).map(Some)
            })
            .await
            .map_err(Error::from)
    }

    /// Read an answer row as stored, expired or not, without counting a hit.
    pub async fn peek_answer(&self, query_hash: &str) -> Result<Option<AnswerCacheRecord>, Error> {
        let query_hash = query_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<AnswerCacheRecord>, Error> {
                match conn.query_row(SELECT_RECORD, params![query_hash], RawAnswer::from_row) {
                    Ok(raw) => AnswerCacheRecord::try_from(raw).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or update an answer row and return it as stored.
    ///
    /// Overwriting a fresh row keeps its `created_at` and `hit_count`.
    /// Overwriting an expired row counts as a new record and resets both.
    pub async fn upsert_answer(&self, answer: NewAnswer) -> Result<AnswerCacheRecord, Error> {
        let now = self.clock.now();
        let created_at = timestamp(now);
        let expires_at = timestamp(expiry_after(now, answer.ttl_seconds)?);

        self.conn
            .call(move |conn| -> Result<AnswerCacheRecord, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO answer_cache (
                        query_hash, tenant_id, query_text, answer, confidence_score,
                        hit_count, created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)
                    ON CONFLICT(query_hash) DO UPDATE SET
                        tenant_id = excluded.tenant_id,
                        query_text = excluded.query_text,
                        answer = excluded.answer,
                        confidence_score = excluded.confidence_score,
                        hit_count = CASE WHEN answer_cache.expires_at > ?6
                            THEN answer_cache.hit_count ELSE 0 END,
                        created_at = CASE WHEN answer_cache.expires_at > ?6
                            THEN answer_cache.created_at ELSE excluded.created_at END,
                        expires_at = excluded.expires_at",
                    params![
                        &answer.query_hash,
                        &answer.tenant_id,
                        &answer.query_text,
                        &answer.answer,
                        answer.confidence_score,
                        created_at,
                        expires_at,
                    ],
                )?;

                let raw = tx.query_row(SELECT_RECORD, params![&answer.query_hash], RawAnswer::from_row)?;
                tx.commit()?;
                AnswerCacheRecord::try_from(raw)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one answer row. Returns whether a row was removed.
    pub async fn delete_answer(&self, query_hash: &str) -> Result<bool, Error> {
        let query_hash = query_hash.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM answer_cache WHERE query_hash = ?1", params![query_hash])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every answer row belonging to a tenant.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_tenant_answers(&self, tenant_id: &str) -> Result<u64, Error> {
        let tenant_id = tenant_id.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM answer_cache WHERE tenant_id = ?1", params![tenant_id])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired answer rows.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_answers(&self) -> Result<u64, Error> {
        let now = timestamp(self.clock.now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM answer_cache WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Count rows, fresh rows, and hits, optionally for one tenant.
    pub async fn answer_stats(&self, tenant_id: Option<&str>) -> Result<AnswerStats, Error> {
        let tenant_id = tenant_id.map(str::to_string);
        let now = timestamp(self.clock.now());
        self.conn
            .call(move |conn| -> Result<AnswerStats, Error> {
                let (records, fresh, hits): (i64, i64, i64) = conn.query_row(
                    "SELECT
                        COUNT(*),
                        COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(hit_count), 0)
                    FROM answer_cache
                    WHERE ?2 IS NULL OR tenant_id = ?2",
                    params![now, tenant_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                Ok(AnswerStats {
                    records: records.max(0) as u64,
                    fresh_records: fresh.max(0) as u64,
                    total_hits: hits.max(0) as u64,
                })
            })
            .await
            .map_err(Error::from)
    }
}
