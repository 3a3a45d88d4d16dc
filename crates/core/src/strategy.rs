//! Named caching strategies.
//!
//! A strategy tells the read-through cache how long to keep a result and how
//! to invalidate it. Strategies are fixed when the registry is built; an
//! unknown name resolves to the default strategy instead of failing.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, StrategySpec};

/// Name reported by the fallback strategy.
pub const DEFAULT_STRATEGY: &str = "default";

/// How entries written under a strategy are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Delete the single key.
    #[default]
    Exact,
    /// Sweep every key registered under the strategy's tags.
    Tag,
    /// Delete every key sharing a literal prefix. Needs key enumeration.
    Pattern,
}

/// A resolved strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategyConfig {
    pub name: String,
    pub ttl_seconds: u64,
    pub tags: BTreeSet<String>,
    pub invalidation_mode: InvalidationMode,
}

impl CacheStrategyConfig {
    /// The fallback: exact invalidation, no tags.
    pub fn fallback(ttl_seconds: u64) -> Self {
        Self {
            name: DEFAULT_STRATEGY.to_string(),
            ttl_seconds,
            tags: BTreeSet::new(),
            invalidation_mode: InvalidationMode::Exact,
        }
    }

    /// Tags as a sorted list, the shape the tag index takes.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }
}

/// Static lookup table from strategy name to [`CacheStrategyConfig`].
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, CacheStrategyConfig>,
    default: CacheStrategyConfig,
}

impl StrategyRegistry {
    /// Registry with only the fallback strategy.
    pub fn new(default_ttl_seconds: u64) -> Self {
        Self { strategies: HashMap::new(), default: CacheStrategyConfig::fallback(default_ttl_seconds) }
    }

    /// Build the registry from configuration.
    ///
    /// When the store cannot enumerate keys, `pattern` strategies are
    /// downgraded to `exact` so they are never selected.
    pub fn from_config(config: &CacheConfig, supports_enumeration: bool) -> Self {
        let mut registry = Self::new(config.default_ttl_seconds);
        for (name, spec) in &config.strategies {
            registry.insert(name, spec, supports_enumeration);
        }
        registry
    }

    fn insert(&mut self, name: &str, spec: &StrategySpec, supports_enumeration: bool) {
        let mut invalidation_mode = spec.invalidation_mode;
        if invalidation_mode == InvalidationMode::Pattern && !supports_enumeration {
            tracing::warn!(
                strategy = name,
                "store cannot enumerate keys; pattern invalidation downgraded to exact"
            );
            invalidation_mode = InvalidationMode::Exact;
        }

        self.strategies.insert(
            name.to_string(),
            CacheStrategyConfig {
                name: name.to_string(),
                ttl_seconds: spec.ttl_seconds,
                tags: spec.tags.iter().cloned().collect(),
                invalidation_mode,
            },
        );
    }

    /// Look up a strategy, falling back to the default for unknown names.
    pub fn resolve(&self, name: &str) -> &CacheStrategyConfig {
        match self.strategies.get(name) {
            Some(strategy) => strategy,
            None => {
                tracing::debug!(strategy = name, "unknown cache strategy; using default");
                &self.default
            }
        }
    }

    /// Whether `name` is registered explicitly.
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn default_strategy(&self) -> &CacheStrategyConfig {
        &self.default
    }

    /// Registered strategies sorted by name, without the fallback.
    pub fn strategies(&self) -> Vec<&CacheStrategyConfig> {
        let mut all: Vec<_> = self.strategies.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
