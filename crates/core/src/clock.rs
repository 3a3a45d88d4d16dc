//! Time source abstraction.
//!
//! Expiry is decided against an injected [`Clock`] so that tests can move
//! time forward without sleeping.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};

use crate::Error;

/// Longest accepted TTL: 100 years.
pub const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Source of the current instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The default clock for production use.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Format an instant as a fixed-width RFC 3339 UTC string.
///
/// Fixed width keeps lexical order equal to chronological order in SQL.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The instant `ttl_seconds` after `now`.
///
/// # Errors
///
/// [`Error::InvalidInput`] when the TTL exceeds [`MAX_TTL_SECONDS`] or the
/// result falls outside four-digit years, where [`timestamp`] would lose its
/// fixed width.
pub fn expiry_after(now: DateTime<Utc>, ttl_seconds: u64) -> Result<DateTime<Utc>, Error> {
    if ttl_seconds > MAX_TTL_SECONDS {
        return Err(Error::InvalidInput(format!("ttl {ttl_seconds}s exceeds {MAX_TTL_SECONDS}s")));
    }

    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .filter(|at| at.year() <= 9999)
        .ok_or_else(|| Error::InvalidInput(format!("ttl {ttl_seconds}s overflows expiry from {now}")))
}

/// Parse a timestamp written by [`timestamp`].
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
