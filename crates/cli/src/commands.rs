//! Command implementations.
//!
//! Each command takes an open [`CacheDb`] and the loaded [`CacheConfig`] and
//! returns a serializable output; `main` only prints it.

use std::sync::Arc;

use qcache_core::{
    AnswerCache, AnswerCacheRecord, AnswerStats, CacheConfig, CacheDb, CacheStrategyConfig, Error, QueryCache,
};
use serde::{Deserialize, Serialize};

/// Output of the invalidation commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateOutput {
    /// Number of entries that existed and were removed.
    pub removed: usize,
}

/// Output of `purge-expired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeOutput {
    pub entries: u64,
    pub answers: u64,
}

/// Output of `answer-lookup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupOutput {
    pub hit: bool,
    pub record: Option<AnswerCacheRecord>,
}

/// Output of `answer-invalidate-tenant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPurgeOutput {
    pub tenant_id: String,
    pub removed: u64,
}

fn query_cache(db: &CacheDb, config: &CacheConfig) -> QueryCache {
    let db = Arc::new(db.clone());
    QueryCache::new(db.clone(), db, config)
}

/// Every configured strategy after resolution, sorted by name, followed by
/// the fallback.
pub fn strategies_impl(db: &CacheDb, config: &CacheConfig) -> Vec<CacheStrategyConfig> {
    let cache = query_cache(db, config);
    let registry = cache.registry();
    let mut strategies: Vec<_> = registry.strategies().into_iter().cloned().collect();
    strategies.push(registry.default_strategy().clone());
    strategies
}

/// Invalidate one key, either exactly or with the mode of `strategy`.
pub async fn invalidate_key_impl(
    db: &CacheDb, config: &CacheConfig, key: &str, strategy: Option<&str>,
) -> Result<InvalidateOutput, Error> {
    let cache = query_cache(db, config);
    let removed = match strategy {
        Some(strategy) => cache.invalidate_with_strategy(key, strategy).await?,
        None => cache.invalidate(key).await?,
    };
    Ok(InvalidateOutput { removed })
}

pub async fn invalidate_tag_impl(db: &CacheDb, config: &CacheConfig, tag: &str) -> Result<InvalidateOutput, Error> {
    let removed = query_cache(db, config).invalidate_by_tag(tag).await?;
    Ok(InvalidateOutput { removed })
}

/// Physically delete expired read-through entries and expired answers.
pub async fn purge_expired_impl(db: &CacheDb, config: &CacheConfig) -> Result<PurgeOutput, Error> {
    let entries = db.purge_expired_entries().await?;
    let answers = AnswerCache::new(db.clone(), config).purge_expired().await?;
    tracing::info!(entries, answers, "expired cache rows purged");
    Ok(PurgeOutput { entries, answers })
}

/// Look up an answer. A hit counts toward the record's `hit_count`.
pub async fn answer_lookup_impl(db: &CacheDb, config: &CacheConfig, tenant_id: &str, query: &str) -> LookupOutput {
    let record = AnswerCache::new(db.clone(), config).lookup(tenant_id, query).await;
    LookupOutput { hit: record.is_some(), record }
}

/// Parameters for `answer-store`.
#[derive(Debug, Clone)]
pub struct AnswerStoreParams {
    pub tenant_id: String,
    pub query: String,
    pub answer: String,
    pub confidence_score: f64,
    /// Falls back to the configured answer TTL.
    pub ttl_seconds: Option<u64>,
}

pub async fn answer_store_impl(
    db: &CacheDb, config: &CacheConfig, params: &AnswerStoreParams,
) -> Result<AnswerCacheRecord, Error> {
    let cache = AnswerCache::new(db.clone(), config);
    match params.ttl_seconds {
        Some(ttl) => {
            cache
                .store(&params.tenant_id, &params.query, &params.answer, params.confidence_score, ttl)
                .await
        }
        None => {
            cache
                .store_with_default_ttl(&params.tenant_id, &params.query, &params.answer, params.confidence_score)
                .await
        }
    }
}

pub async fn answer_stats_impl(
    db: &CacheDb, config: &CacheConfig, tenant_id: Option<&str>,
) -> Result<AnswerStats, Error> {
    AnswerCache::new(db.clone(), config).stats(tenant_id).await
}

pub async fn answer_invalidate_tenant_impl(
    db: &CacheDb, config: &CacheConfig, tenant_id: &str,
) -> Result<TenantPurgeOutput, Error> {
    let removed = AnswerCache::new(db.clone(), config).invalidate_tenant(tenant_id).await?;
    Ok(TenantPurgeOutput { tenant_id: tenant_id.to_string(), removed })
}
