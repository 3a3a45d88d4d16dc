//! Deterministic cache key construction.
//!
//! A key is `namespace:part:part:...`. Each segment is escaped so that the
//! delimiter can never appear inside a part, which makes the mapping from a
//! part list to a key injective. Composite parameters are rendered as
//! canonical JSON (object keys sorted), so the result does not depend on the
//! iteration order of the map they came from.

use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::Error;

const DELIMITER: char = ':';

/// Segment for an absent optional part. Escaping turns every `%` into `%25`,
/// so no escaped part can render as this.
const NONE_SEGMENT: &str = "%00";

/// Builder for cache keys.
///
/// ```
/// use qcache_core::CacheKeyBuilder;
///
/// let key = CacheKeyBuilder::new("metrics").part("companyA").part(2026).build();
/// assert_eq!(key, "metrics:companyA:2026");
/// ```
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    key: String,
}

impl CacheKeyBuilder {
    pub fn new(namespace: &str) -> Self {
        Self { key: escape(namespace) }
    }

    /// Append a primitive part.
    pub fn part(mut self, part: impl Display) -> Self {
        self.key.push(DELIMITER);
        self.key.push_str(&escape(&part.to_string()));
        self
    }

    /// Append an optional part; `None` renders as `%00`, distinct from any
    /// present part including the empty string.
    pub fn opt_part(mut self, part: Option<impl Display>) -> Self {
        match part {
            Some(part) => self.part(part),
            None => {
                self.key.push(DELIMITER);
                self.key.push_str(NONE_SEGMENT);
                self
            }
        }
    }

    /// Append a composite part as canonical JSON.
    pub fn json_part(self, part: &impl Serialize) -> Result<Self, Error> {
        let value = canonical(serde_json::to_value(part)?);
        Ok(self.part(value))
    }

    pub fn build(self) -> String {
        self.key
    }
}

/// Build a key from a namespace and primitive parts.
pub fn build_key<I>(namespace: &str, parts: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    parts
        .into_iter()
        .fold(CacheKeyBuilder::new(namespace), |builder, part| builder.part(part))
        .build()
}

/// Rebuild objects with keys inserted in sorted order, whatever map type
/// serde_json was compiled with.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonical(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}
