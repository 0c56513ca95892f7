//! C4 Resolution Coordinator (`spec.md` §4.4): not a `kube::runtime::
//! Controller` loop like C2/C3/C5, since its unit of work is a namespace
//! rather than one CRD instance touched by several kinds of watched
//! events. Instead it drains a namespace-keyed [`KeyQueue`] fed by
//! watchers on Subscription/CatalogSource/InstallPlan plus the dependent
//! kinds a resolved plan can touch, the same `KeyQueue`+`RateLimiter`
//! substrate C3/C5 share (`spec.md` §5).

pub mod pipeline;

use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::core::{ApiResource, GroupVersionKind as KubeGvk};
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use catalog_types::{CatalogSource, InstallPlan, Subscription};

use crate::queue::{KeyQueue, RateLimiter};

pub use pipeline::Context;

/// Dependent kinds a resolved InstallPlan's steps can touch (`spec.md`
/// §4.4 "a change to any dependent kind re-triggers resolution"). Cluster-
/// scoped kinds (CRDs, ClusterRoles) are out of scope here — C3 owns
/// CRD-readiness requeues on the plan itself.
const DEPENDENT_KINDS: &[(&str, &str, &str)] = &[
    (catalog_types::constants::CSV_GROUP, catalog_types::constants::CSV_VERSION, catalog_types::constants::CSV_KIND),
    ("rbac.authorization.k8s.io", "v1", "Role"),
    ("rbac.authorization.k8s.io", "v1", "RoleBinding"),
    ("", "v1", "ServiceAccount"),
    ("", "v1", "Service"),
    ("", "v1", "ConfigMap"),
];

pub async fn run(client: Client, ctx: Arc<Context>, queue: Arc<KeyQueue<String>>, worker_count: usize, shutdown: CancellationToken) {
    spawn_watchers(client, queue.clone(), shutdown.clone());

    let limiter = Arc::new(RateLimiter::new());
    let mut workers = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
        let queue = queue.clone();
        let ctx = ctx.clone();
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move { worker_loop(worker, queue, ctx, limiter, shutdown).await }));
    }
    for worker in workers {
        let _ = worker.await;
    }
}

async fn worker_loop(worker: usize, queue: Arc<KeyQueue<String>>, ctx: Arc<Context>, limiter: Arc<RateLimiter>, shutdown: CancellationToken) {
    loop {
        let namespace = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = queue.take() => match next {
                Some(namespace) => namespace,
                None => return,
            },
        };

        limiter.wait_for_token().await;
        match pipeline::resolve_namespace(&ctx, &namespace).await {
            Ok(()) => limiter.clear(&namespace).await,
            Err(err) => {
                warn!(worker, %namespace, error = %err, "resolve sync failed");
                let delay = limiter.backoff_for(&namespace).await;
                let requeue = queue.clone();
                let key = namespace.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    requeue.enqueue(key).await;
                });
            }
        }
        queue.done(namespace).await;
    }
}

fn spawn_watchers(client: Client, queue: Arc<KeyQueue<String>>, shutdown: CancellationToken) {
    watch_typed::<Subscription>(client.clone(), queue.clone(), shutdown.clone());
    watch_typed::<InstallPlan>(client.clone(), queue.clone(), shutdown.clone());
    watch_typed::<CatalogSource>(client.clone(), queue.clone(), shutdown.clone());
    for (group, version, kind) in DEPENDENT_KINDS {
        watch_dependent_kind(client.clone(), queue.clone(), shutdown.clone(), group, version, kind);
    }
}

fn watch_typed<K>(client: Client, queue: Arc<KeyQueue<String>>, shutdown: CancellationToken)
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope> + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    tokio::spawn(async move {
        let api: Api<K> = Api::all(client);
        let stream = watcher::watcher(api, watcher::Config::default()).applied_objects();
        tokio::pin!(stream);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = stream.next() => match next {
                    Some(Ok(obj)) => {
                        if let Some(namespace) = obj.meta().namespace.clone() {
                            queue.enqueue(namespace).await;
                        }
                    }
                    Some(Err(err)) => warn!(error = %err, "resolve watch stream error"),
                    None => return,
                },
            }
        }
    });
}

fn watch_dependent_kind(
    client: Client,
    queue: Arc<KeyQueue<String>>,
    shutdown: CancellationToken,
    group: &'static str,
    version: &'static str,
    kind: &'static str,
) {
    tokio::spawn(async move {
        let gvk = KubeGvk::gvk(group, version, kind);
        let api_resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::all_with(client, &api_resource);
        let stream = watcher::watcher(api, watcher::Config::default()).applied_objects();
        tokio::pin!(stream);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = stream.next() => match next {
                    Some(Ok(obj)) => {
                        if let Some(namespace) = obj.metadata.namespace.clone() {
                            queue.enqueue(namespace).await;
                        }
                    }
                    Some(Err(err)) => warn!(%kind, error = %err, "resolve dependent-kind watch stream error"),
                    None => return,
                },
            }
        }
    });
}
