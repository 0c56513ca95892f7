//! C1 Source Store (`spec.md` §4.1): tracks one live RPC client per
//! `CatalogSource`, reconnecting with backoff and broadcasting connection
//! state transitions. Grounded on `common::wait_registry::
//! DirectWaitRegistry`'s `Arc<Mutex<HashMap<...>>>` live-connection
//! registry, upgraded to a `tokio::sync::RwLock` per §5's "guarded by a
//! reader/writer lock" requirement, and on the teacher's
//! `backoff_full_jitter` reconnect loop shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use catalog_registry_client::{RegistryClient, SourceQuerier};
use catalog_types::ConnectionState;

use catalog_common::wait::backoff_full_jitter;

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceKey {
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Snapshot returned by `add`/`getMeta` (`spec.md` §4.1).
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub key: SourceKey,
    pub address: String,
    pub state: ConnectionState,
    pub last_connect: Option<DateTime<Utc>>,
}

/// Pushed to subscribers on every ready/transient-failure transition
/// (`spec.md` §4.1 contract paragraph).
#[derive(Debug, Clone)]
pub struct SourceStateEvent {
    pub key: SourceKey,
    pub state: ConnectionState,
    pub address: String,
    pub last_connect: Option<DateTime<Utc>>,
}

struct SourceEntry {
    address: String,
    state: ConnectionState,
    last_connect: Option<DateTime<Utc>>,
    client: Option<Arc<dyn SourceQuerier>>,
    reconnect_task: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Process-wide map from `(namespace, name)` to a live registry-server
/// connection. Never a global singleton (`spec.md` §9 "Global mutable
/// state"): callers hold an `Arc<SourceStore>` handed to them at
/// construction.
pub struct SourceStore {
    entries: RwLock<HashMap<SourceKey, SourceEntry>>,
    events: broadcast::Sender<SourceStateEvent>,
    backoff_ceiling: Duration,
}

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

impl SourceStore {
    pub fn new(backoff_ceiling: Duration) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        Arc::new(Self { entries: RwLock::new(HashMap::new()), events, backoff_ceiling })
    }

    /// Registers `key` against `address` and spawns its reconnect task.
    /// Returns immediately; the connection attempt never blocks the
    /// caller (`spec.md` §4.1 "Failure").
    pub async fn add(self: &Arc<Self>, key: SourceKey, address: String) -> SourceMeta {
        self.remove(&key).await;

        let cancel = CancellationToken::new();
        let meta = SourceMeta { key: key.clone(), address: address.clone(), state: ConnectionState::Connecting, last_connect: None };

        {
            let mut entries = self.entries.write().await;
            let store = Arc::clone(self);
            let task_key = key.clone();
            let task_address = address.clone();
            let task_cancel = cancel.clone();
            let reconnect_task = tokio::spawn(async move {
                store.reconnect_loop(task_key, task_address, task_cancel).await;
            });
            entries.insert(
                key,
                SourceEntry {
                    address,
                    state: ConnectionState::Connecting,
                    last_connect: None,
                    client: None,
                    reconnect_task,
                    cancel,
                },
            );
        }

        meta
    }

    /// Cancels the reconnect task and drops the entry. A no-op if `key`
    /// is not present.
    pub async fn remove(&self, key: &SourceKey) {
        let removed = self.entries.write().await.remove(key);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            entry.reconnect_task.abort();
        }
    }

    pub async fn get_meta(&self, key: &SourceKey) -> Option<SourceMeta> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| SourceMeta {
            key: key.clone(),
            address: e.address.clone(),
            state: e.state,
            last_connect: e.last_connect,
        })
    }

    /// Ordered queriers for a resolve over `declared` (the Subscription's
    /// own `CatalogSource`), then every other ready source in
    /// `subscription_namespace`, then every ready source in
    /// `global_namespace` (`spec.md` §4.1 ordering contract).
    pub async fn as_clients(
        &self,
        declared: Option<&SourceKey>,
        subscription_namespace: &str,
        global_namespace: &str,
    ) -> Vec<Arc<dyn SourceQuerier>> {
        let entries = self.entries.read().await;
        let mut declared_bucket = Vec::new();
        let mut local_bucket = Vec::new();
        let mut global_bucket = Vec::new();

        for (key, entry) in entries.iter() {
            if entry.state != ConnectionState::Ready {
                continue;
            }
            let Some(client) = entry.client.clone() else { continue };
            if declared.is_some_and(|d| d == key) {
                declared_bucket.push(client);
            } else if key.namespace == subscription_namespace {
                local_bucket.push(client);
            } else if key.namespace == global_namespace {
                global_bucket.push(client);
            }
        }

        declared_bucket.into_iter().chain(local_bucket).chain(global_bucket).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceStateEvent> {
        self.events.subscribe()
    }

    async fn set_state(&self, key: &SourceKey, state: ConnectionState, client: Option<Arc<dyn SourceQuerier>>, address: &str) {
        let last_connect = if state == ConnectionState::Ready { Some(Utc::now()) } else { None };
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(key) {
                entry.state = state;
                if let Some(client) = client.clone() {
                    entry.client = Some(client);
                }
                if last_connect.is_some() {
                    entry.last_connect = last_connect;
                }
            } else {
                return; // removed while reconnecting
            }
        }
        if matches!(state, ConnectionState::Ready | ConnectionState::TransientFailure) {
            let _ = self.events.send(SourceStateEvent {
                key: key.clone(),
                state,
                address: address.to_string(),
                last_connect,
            });
        }
    }

    /// Connects, then periodically health-checks; on any failure, falls
    /// back to a fresh connect attempt with exponential backoff bounded
    /// by `backoff_ceiling`.
    async fn reconnect_loop(self: Arc<Self>, key: SourceKey, address: String, cancel: CancellationToken) {
        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match RegistryClient::connect(address.clone()).await {
                Ok(client) => {
                    attempt = 0;
                    let client: Arc<dyn SourceQuerier> = Arc::new(client);
                    self.set_state(&key, ConnectionState::Ready, Some(client.clone()), &address).await;
                    debug!(%key, %address, "registry connection established");

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {}
                        }
                        match client.health().await {
                            Ok(true) => continue,
                            Ok(false) | Err(_) => {
                                warn!(%key, %address, "registry health check failed, reconnecting");
                                self.set_state(&key, ConnectionState::TransientFailure, None, &address).await;
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%key, %address, error = %err, "registry connect failed");
                    self.set_state(&key, ConnectionState::TransientFailure, None, &address).await;
                }
            }

            let delay = backoff_full_jitter(BACKOFF_BASE, self.backoff_ceiling, attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_meta_is_none_before_add() {
        let store = SourceStore::new(Duration::from_secs(30));
        assert!(store.get_meta(&SourceKey::new("ns", "src")).await.is_none());
    }

    #[tokio::test]
    async fn remove_before_add_is_a_noop() {
        let store = SourceStore::new(Duration::from_secs(30));
        store.remove(&SourceKey::new("ns", "missing")).await;
    }

    #[tokio::test]
    async fn as_clients_is_empty_when_nothing_is_ready() {
        let store = SourceStore::new(Duration::from_secs(30));
        let clients = store.as_clients(None, "ns", "olm").await;
        assert!(clients.is_empty());
    }

    #[tokio::test]
    async fn add_registers_a_connecting_entry_immediately() {
        let store = SourceStore::new(Duration::from_secs(30));
        let meta = store.add(SourceKey::new("ns", "src"), "127.0.0.1:1".to_string()).await;
        assert_eq!(meta.state, ConnectionState::Connecting);
        let fetched = store.get_meta(&SourceKey::new("ns", "src")).await.unwrap();
        assert_eq!(fetched.address, "127.0.0.1:1");
        store.remove(&SourceKey::new("ns", "src")).await;
    }
}
