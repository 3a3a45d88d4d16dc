//! Cache stores.
//!
//! This module provides the [`CacheStore`] and [`TagIndex`] contracts and two
//! implementations of each:
//!
//! - [`MemoryStore`] / [`MemoryTagIndex`] for in-process use and tests
//! - [`CacheDb`], a SQLite database accessed through tokio-rusqlite, which
//!   also holds the content-addressed answer table
//!
//! Expiry is lazy everywhere: reads treat entries past `expires_at` as absent,
//! and purge operations remove them physically.

pub mod answers;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod store;
pub mod tags;

pub use crate::Error;

pub use answers::{AnswerCacheRecord, AnswerStats, NewAnswer};
pub use connection::CacheDb;
pub use memory::{MemoryStore, MemoryTagIndex};
pub use store::{CacheStore, TagIndex, bounded};
