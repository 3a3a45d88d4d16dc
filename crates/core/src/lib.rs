//! Core of the query cache layer.
//!
//! This crate provides:
//! - Read-through caching of expensive async computations ([`QueryCache`])
//! - Deterministic cache key construction ([`CacheKeyBuilder`])
//! - Named caching strategies and invalidation ([`StrategyRegistry`], [`CacheInvalidator`])
//! - A content-addressed, tenant-scoped answer cache ([`AnswerCache`])
//! - In-memory and SQLite cache stores
//! - Layered configuration and unified error types

pub mod answer;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod flight;
pub mod invalidate;
pub mod keys;
pub mod orchestrator;
pub mod strategy;

pub use answer::AnswerCache;
pub use cache::{AnswerCacheRecord, AnswerStats, CacheDb, CacheStore, MemoryStore, MemoryTagIndex, TagIndex};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, StrategySpec};
pub use error::Error;
pub use invalidate::CacheInvalidator;
pub use keys::{CacheKeyBuilder, build_key};
pub use orchestrator::QueryCache;
pub use strategy::{CacheStrategyConfig, DEFAULT_STRATEGY, InvalidationMode, StrategyRegistry};
