//! C5 CatalogSource Reconciler Coordinator (`spec.md` §4.5): a second
//! `kube::runtime::Controller<CatalogSource>` loop generalized from the
//! teacher's `storage_operator::clusters::reconcile::run`, composing the
//! three-function sync chain in [`sync`] with early-return on
//! `continue_chain == false`.

pub mod backing;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{info, warn};

use catalog_types::{CatalogSource, ConnectionState, Subscription};

use crate::queue::KeyQueue;
use crate::source_store::{SourceKey, SourceStore};
use crate::util::{Error, ErrorKind, PROBE_INTERVAL};

pub struct Context {
    pub client: Client,
    pub source_store: Arc<SourceStore>,
    pub resolve_queue: Arc<KeyQueue<String>>,
    pub unpacker_image: String,
}

pub async fn run(client: Client, ctx: Arc<Context>) {
    let api: Api<CatalogSource> = Api::all(client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, on_error, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => info!(catalogsource = %obj.name, "catalogsource synced"),
                Err(err) => warn!(error = %err, "catalogsource reconcile failed"),
            }
        })
        .await;
}

fn on_error(_source: Arc<CatalogSource>, err: &Error, _ctx: Arc<Context>) -> Action {
    match err.kind() {
        ErrorKind::TransientApi => Action::requeue(Duration::from_secs(5)),
        _ => Action::requeue(Duration::from_secs(15)),
    }
}

async fn reconcile(source: Arc<CatalogSource>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = source.meta().namespace.clone().ok_or_else(|| Error::Invariant("CatalogSource missing namespace".into()))?;
    let name = source.name_any();
    let key = SourceKey::new(namespace.clone(), name.clone());
    let previous_state = source.status.as_ref().map(|s| s.connection_state).unwrap_or_default();

    let (source, outcome) = sync::sync_config_map(ctx.client.clone(), &source).await?;
    if !outcome.continue_chain {
        return Ok(Action::requeue(Duration::ZERO));
    }

    let (address, outcome) = sync::sync_registry_server(ctx.client.clone(), &ctx.source_store, &key, &source, &ctx.unpacker_image).await?;
    if !outcome.continue_chain {
        return Ok(Action::requeue(Duration::from_secs(2)));
    }

    let (source, _outcome) = sync::sync_connection(ctx.client.clone(), &ctx.source_store, key, &source, address).await?;

    let new_state = source.status.as_ref().map(|s| s.connection_state).unwrap_or_default();
    if new_state != previous_state {
        if new_state == ConnectionState::Ready {
            requeue_affected_namespaces(&ctx, &namespace, &name).await;
        } else {
            ctx.resolve_queue.enqueue(namespace.clone()).await;
        }
    }

    Ok(Action::requeue(PROBE_INTERVAL))
}

/// `spec.md` §4.5 "on transition to ready": enqueue the CatalogSource's
/// own namespace plus every namespace with a Subscription referencing it.
/// Built fresh from a full list rather than a maintained index keyed by
/// `(catalogName, catalogNamespace)`, since no watch-backed cache layer
/// exists anywhere else in this operator either (`installplan::mod`
/// builds its CSV/CRD indices the same way, per sync).
async fn requeue_affected_namespaces(ctx: &Context, catalog_namespace: &str, catalog_name: &str) {
    ctx.resolve_queue.enqueue(catalog_namespace.to_string()).await;

    let api: Api<Subscription> = Api::all(ctx.client.clone());
    let Ok(subs) = api.list(&ListParams::default()).await else { return };
    for namespace in affected_namespaces(&subs.items, catalog_namespace, catalog_name) {
        ctx.resolve_queue.enqueue(namespace).await;
    }
}

fn affected_namespaces(subscriptions: &[Subscription], catalog_namespace: &str, catalog_name: &str) -> Vec<String> {
    subscriptions
        .iter()
        .filter(|s| s.spec.catalog_source == catalog_name && s.spec.catalog_source_namespace == catalog_namespace)
        .filter_map(|s| s.metadata.namespace.clone())
        .collect()
}

/// Deletion handler (`spec.md` §4.5): this operator registers no
/// finalizer on `CatalogSource` (owner references already cascade the
/// registry-server backing's cleanup), so the controller's watch stream
/// reports deletions as plain `Deleted` events; the binary's startup
/// wiring subscribes to those to drop the matching `SourceStore` entry.
pub async fn handle_deleted(source_store: &SourceStore, key: &SourceKey) {
    source_store.remove(key).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_types::SubscriptionSpec;

    fn sub(namespace: &str, catalog_name: &str, catalog_namespace: &str) -> Subscription {
        Subscription {
            metadata: kube::api::ObjectMeta { namespace: Some(namespace.to_string()), ..Default::default() },
            spec: SubscriptionSpec {
                catalog_source: catalog_name.to_string(),
                catalog_source_namespace: catalog_namespace.to_string(),
                package: "p".into(),
                channel: "c".into(),
                approval: Default::default(),
                starting_csv: None,
            },
            status: None,
        }
    }

    #[test]
    fn affected_namespaces_filters_by_catalog_reference() {
        let subs = vec![sub("ns-a", "src", "olm"), sub("ns-b", "other", "olm"), sub("ns-c", "src", "olm")];
        let mut namespaces = affected_namespaces(&subs, "olm", "src");
        namespaces.sort();
        assert_eq!(namespaces, vec!["ns-a".to_string(), "ns-c".to_string()]);
    }

    #[test]
    fn affected_namespaces_is_empty_when_no_subscription_matches() {
        let subs = vec![sub("ns-a", "other", "olm")];
        assert!(affected_namespaces(&subs, "olm", "src").is_empty());
    }
}
