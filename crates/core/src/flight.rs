//! In-flight computation registry.
//!
//! The first caller to miss on a key becomes the leader and computes; callers
//! that miss on the same key while the leader runs become followers and wait
//! for the leader's serialized result. A leader that fails or is dropped
//! publishes nothing, and its followers compute for themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

/// What a leader hands to its followers: the encoded value, or `None` when
/// the computation failed.
pub type Flight = Option<Arc<[u8]>>;

type Calls = Arc<Mutex<HashMap<String, broadcast::Sender<Flight>>>>;

/// Outcome of joining a key.
pub enum Join {
    Leader(FlightGuard),
    Follower(broadcast::Receiver<Flight>),
}

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    calls: Calls,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, or subscribe to the current leader.
    pub fn join(&self, key: &str) -> Join {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(leader) = calls.get(key) {
            return Join::Follower(leader.subscribe());
        }

        let (tx, _) = broadcast::channel(1);
        calls.insert(key.to_string(), tx.clone());
        Join::Leader(FlightGuard { key: key.to_string(), calls: self.calls.clone(), tx: Some(tx) })
    }

    /// Number of keys with a leader in progress.
    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by the leader. Dropping it without [`FlightGuard::complete`] releases
/// the key and closes the channel, which followers observe as a failure.
pub struct FlightGuard {
    key: String,
    calls: Calls,
    tx: Option<broadcast::Sender<Flight>>,
}

impl FlightGuard {
    /// Release the key and publish the result to every follower.
    pub fn complete(mut self, result: Flight) {
        self.release();
        if let Some(tx) = self.tx.take() {
            // No receivers is fine: nobody joined while we computed.
            let _ = tx.send(result);
        }
    }

    fn release(&mut self) {
        if self.tx.is_some() {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wait for a leader's result. `None` means the follower must compute.
pub async fn wait(mut rx: broadcast::Receiver<Flight>) -> Flight {
    rx.recv().await.unwrap_or_default()
}
