//! The keyed work-queue substrate shared by C3, C4, and C5's worker pools
//! (`spec.md` §5). Generalized from the teacher's per-cluster
//! `last_action` map (`storage_operator::clusters::reconcile::
//! ContextData::last_action`) into a single generic queue with in-flight
//! deduplication and single-flight coalescing.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};

use catalog_common::wait::{TokenBucket, backoff_full_jitter};

/// A channel-backed work queue keyed by `K`, guaranteeing that no two
/// workers process the same key concurrently: enqueueing a key already
/// in flight marks it "dirty" instead of sending a duplicate, and the
/// dirty flag is redrained once the in-flight handler finishes
/// (`spec.md` §5 "per-key single-flight semantics").
pub struct KeyQueue<K: Eq + Hash + Clone + Send + Sync + 'static> {
    tx: mpsc::UnboundedSender<K>,
    rx: Mutex<mpsc::UnboundedReceiver<K>>,
    in_flight: Mutex<HashSet<K>>,
    dirty: Mutex<HashSet<K>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> KeyQueue<K> {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            in_flight: Mutex::new(HashSet::new()),
            dirty: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    /// Enqueues `key`. If a handler for `key` is already running, the key
    /// is marked dirty instead of being sent again.
    pub async fn enqueue(&self, key: K) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(&key) {
            self.dirty.lock().await.insert(key);
            return;
        }
        in_flight.insert(key.clone());
        drop(in_flight);
        let _ = self.tx.send(key);
    }

    /// Pulls the next key, blocking until one is available or the channel
    /// is closed.
    pub async fn take(&self) -> Option<K> {
        self.rx.lock().await.recv().await
    }

    /// Marks `key`'s handler as finished. If the key went dirty while the
    /// handler ran, re-enqueues it immediately (coalesced single re-run,
    /// not one re-run per event).
    pub async fn done(&self, key: K) {
        self.in_flight.lock().await.remove(&key);
        if self.dirty.lock().await.remove(&key) {
            self.enqueue(key).await;
        }
        self.notify.notify_waiters();
    }

    pub async fn depth(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Default for Arc<KeyQueue<K>> {
    fn default() -> Self {
        KeyQueue::new()
    }
}

/// Composes per-key exponential backoff (min 1s, max 1000s, 5x base
/// multiplier) with a token-bucket throttle (1 token/s, 100-token burst)
/// for the resolve queue's overall throughput (`spec.md` §5 last
/// paragraph).
pub struct RateLimiter {
    base: Duration,
    cap: Duration,
    attempts: Mutex<std::collections::HashMap<String, usize>>,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(1000),
            attempts: Mutex::new(std::collections::HashMap::new()),
            bucket: Mutex::new(TokenBucket::new(1.0, 100.0)),
        }
    }

    /// Per-key exponential backoff; `5x base multiplier` is realized by
    /// scaling the attempt exponent's base by 5 rather than doubling.
    pub async fn backoff_for(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().await;
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let duration = backoff_full_jitter(self.base * 5u32.pow((*attempt).min(8) as u32), self.cap, 0);
        *attempt += 1;
        duration.min(self.cap)
    }

    pub async fn clear(&self, key: &str) {
        self.attempts.lock().await.remove(key);
    }

    /// Blocks until a token-bucket slot is available for general resolve
    /// throughput, independent of per-key backoff.
    pub async fn wait_for_token(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.try_take() {
                    return;
                }
                bucket.next_available_in()
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_enqueue_while_in_flight_coalesces() {
        let queue: Arc<KeyQueue<String>> = KeyQueue::new();
        queue.enqueue("ns-a".to_string()).await;
        queue.enqueue("ns-a".to_string()).await; // should mark dirty, not double-send
        let first = queue.take().await.unwrap();
        assert_eq!(first, "ns-a");

        // While the handler is "running" (in_flight still set), a further
        // enqueue also coalesces.
        queue.enqueue("ns-a".to_string()).await;

        queue.done("ns-a".to_string()).await;
        // The dirty mark re-enqueued exactly one more key.
        let second = queue.take().await.unwrap();
        assert_eq!(second, "ns-a");
    }

    #[tokio::test]
    async fn backoff_increases_then_clears() {
        let limiter = RateLimiter::new();
        let first = limiter.backoff_for("k").await;
        let second = limiter.backoff_for("k").await;
        assert!(second >= first || second == limiter.cap);
        limiter.clear("k").await;
    }
}
