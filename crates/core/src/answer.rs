//! Content-addressed cache for semantic-search answers.
//!
//! The search feature calls [`AnswerCache::lookup`] first. On a miss it runs
//! its own embedding, vector search and answer synthesis, then hands the
//! answer to [`AnswerCache::store`]. This cache never computes anything.
//!
//! Queries are normalized (trimmed, lowercased, whitespace collapsed) and
//! hashed together with the tenant id, so the same question asked with
//! different casing or spacing maps to one record, and tenants never share
//! records.

use std::time::Duration;

use crate::Error;
use crate::cache::hash::{compute_query_hash, normalize_query};
use crate::cache::{AnswerCacheRecord, AnswerStats, CacheDb, NewAnswer, bounded};
use crate::config::CacheConfig;

/// Answer cache over the `answer_cache` table of a [`CacheDb`].
#[derive(Debug, Clone)]
pub struct AnswerCache {
    db: CacheDb,
    enabled: bool,
    timeout: Duration,
    default_ttl_seconds: u64,
}

impl AnswerCache {
    pub fn new(db: CacheDb, config: &CacheConfig) -> Self {
        Self {
            db,
            enabled: config.enabled,
            timeout: config.store_timeout(),
            default_ttl_seconds: config.answer_ttl_seconds,
        }
    }

    /// TTL configured for answers.
    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }

    /// The record key for a tenant's query.
    pub fn query_hash(tenant_id: &str, query_text: &str) -> String {
        compute_query_hash(tenant_id, &normalize_query(query_text))
    }

    /// Find a fresh answer and count the hit.
    ///
    /// Expired records are treated as absent and left in place. Store failures
    /// are logged and reported as a miss.
    pub async fn lookup(&self, tenant_id: &str, query_text: &str) -> Option<AnswerCacheRecord> {
        if !self.enabled {
            return None;
        }

        let query_hash = Self::query_hash(tenant_id, query_text);
        match bounded(self.timeout, "answer lookup", self.db.hit_answer(&query_hash)).await {
            Ok(Some(record)) => {
                tracing::debug!(tenant_id, query_hash, hit_count = record.hit_count, "answer cache hit");
                Some(record)
            }
            Ok(None) => {
                tracing::debug!(tenant_id, query_hash, "answer cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(tenant_id, query_hash, error = %e, "answer cache lookup failed");
                None
            }
        }
    }

    /// Insert or refresh the answer for a tenant's query.
    ///
    /// A fresh existing record keeps its `created_at` and `hit_count`; an
    /// expired or missing one starts over with `hit_count = 0`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty tenant or query, a confidence
    ///   outside `[0, 1]`, or a TTL of zero or above
    ///   [`MAX_TTL_SECONDS`](crate::clock::MAX_TTL_SECONDS)
    /// - [`Error::StoreUnavailable`] when the cache is disabled or times out
    /// - [`Error::Database`] when the write fails
    pub async fn store(
        &self, tenant_id: &str, query_text: &str, answer: &str, confidence_score: f64, ttl_seconds: u64,
    ) -> Result<AnswerCacheRecord, Error> {
        let normalized = normalize_query(query_text);
        if tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant_id cannot be empty".into()));
        }
        if normalized.is_empty() {
            return Err(Error::InvalidInput("query cannot be empty".into()));
        }
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(Error::InvalidInput(format!("confidence_score {confidence_score} outside [0, 1]")));
        }
        if ttl_seconds == 0 {
            return Err(Error::InvalidInput("ttl_seconds must be greater than 0".into()));
        }
        if !self.enabled {
            return Err(Error::StoreUnavailable("answer cache disabled".into()));
        }

        let record = bounded(
            self.timeout,
            "answer store",
            self.db.upsert_answer(NewAnswer {
                query_hash: compute_query_hash(tenant_id, &normalized),
                tenant_id: tenant_id.to_string(),
                query_text: normalized,
                answer: answer.to_string(),
                confidence_score,
                ttl_seconds,
            }),
        )
        .await?;

        tracing::debug!(tenant_id, query_hash = record.query_hash, "answer cached");
        Ok(record)
    }

    /// [`AnswerCache::store`] with the configured answer TTL.
    pub async fn store_with_default_ttl(
        &self, tenant_id: &str, query_text: &str, answer: &str, confidence_score: f64,
    ) -> Result<AnswerCacheRecord, Error> {
        self.store(tenant_id, query_text, answer, confidence_score, self.default_ttl_seconds).await
    }

    /// Remove the answer for one query. Returns whether a record existed.
    pub async fn invalidate(&self, tenant_id: &str, query_text: &str) -> Result<bool, Error> {
        let query_hash = Self::query_hash(tenant_id, query_text);
        bounded(self.timeout, "answer delete", self.db.delete_answer(&query_hash)).await
    }

    /// Remove every answer of a tenant.
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> Result<u64, Error> {
        let removed = bounded(self.timeout, "answer tenant delete", self.db.delete_tenant_answers(tenant_id)).await?;
        tracing::info!(tenant_id, removed, "tenant answers invalidated");
        Ok(removed)
    }

    /// Physically delete expired answers.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.db.purge_expired_answers().await
    }

    pub async fn stats(&self, tenant_id: Option<&str>) -> Result<AnswerStats, Error> {
        self.db.answer_stats(tenant_id).await
    }
}
