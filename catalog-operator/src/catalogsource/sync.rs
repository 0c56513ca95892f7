//! The three-function sync chain (`spec.md` §4.5): `sync_config_map`,
//! `sync_registry_server`, `sync_connection`, each returning a
//! [`ChainOutcome`] so `catalogsource::reconcile` can stop early exactly
//! as specced, instead of the teacher's single `determine_action` match.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};

use catalog_types::{CatalogSource, CatalogSourceStatus, ConnectionState, SourceType};

use crate::source_store::{SourceKey, SourceStore};
use crate::util::patch::{MANAGER_NAME, patch_status};
use crate::util::{Error, hash_spec};

use super::backing::RegistryBacking;

pub struct ChainOutcome {
    pub continue_chain: bool,
}

fn keep_going() -> ChainOutcome {
    ChainOutcome { continue_chain: true }
}

fn stop() -> ChainOutcome {
    ChainOutcome { continue_chain: false }
}

/// `spec.md` §4.5 step 1: only applies to `internal`/`configMap` sources;
/// `grpc` sources pass straight through. On a changed digest, patches
/// status and stops the chain for this sync.
pub async fn sync_config_map(client: Client, source: &CatalogSource) -> Result<(CatalogSource, ChainOutcome), Error> {
    if !matches!(source.spec.source_type, SourceType::Internal | SourceType::ConfigMap) {
        return Ok((source.clone(), keep_going()));
    }
    let Some(config_map_name) = source.spec.config_map.clone() else {
        return Err(Error::UserInput("configMap sourceType requires spec.configMap".into()));
    };
    let namespace = source.meta().namespace.clone().ok_or_else(|| Error::Invariant("CatalogSource missing namespace".into()))?;

    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let config_map = cm_api.get(&config_map_name).await?;
    adopt_config_map(client.clone(), &namespace, &config_map_name, source).await?;

    let digest = hash_spec(&config_map.data);
    let previous = source.status.as_ref().and_then(|s| s.config_map_digest.clone());
    if previous.as_deref() == Some(digest.as_str()) {
        return Ok((source.clone(), keep_going()));
    }

    let updated = patch_status::<CatalogSourceStatus, CatalogSource>(client, source, |s| {
        s.config_map_digest = Some(digest.clone());
    })
    .await?;
    Ok((updated, stop()))
}

/// Owns the backing `ConfigMap` via the blocking controller owner
/// reference so it's cleaned up with the `CatalogSource`
/// (`spec.md` §4.5 step 1 "adopt it via an owner reference").
async fn adopt_config_map(client: Client, namespace: &str, name: &str, source: &CatalogSource) -> Result<(), Error> {
    let Some(owner_ref) = source.controller_owner_ref(&()) else { return Ok(()) };
    let cm_api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let current = cm_api.get(name).await?;
    if current.metadata.owner_references.as_ref().is_some_and(|refs| refs.iter().any(|r| r.uid == owner_ref.uid)) {
        return Ok(());
    }
    let patch = serde_json::json!({ "metadata": { "ownerReferences": [owner_ref] } });
    cm_api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(patch)).await?;
    Ok(())
}

/// `spec.md` §4.5 step 2: ensure a registry-server backing exists and is
/// healthy, returning its address once ready.
pub async fn sync_registry_server(
    client: Client,
    source_store: &SourceStore,
    key: &SourceKey,
    source: &CatalogSource,
    unpacker_image: &str,
) -> Result<(Option<String>, ChainOutcome), Error> {
    let backing = match source.spec.source_type {
        SourceType::Internal | SourceType::ConfigMap => RegistryBacking::ConfigMapUnpacker {
            unpacker_image: unpacker_image.to_string(),
            config_map: source.spec.config_map.clone().unwrap_or_default(),
        },
        SourceType::Grpc => RegistryBacking::Grpc { image: source.spec.address.clone().unwrap_or_default() },
    };

    let status = backing.ensure(client.clone(), source).await?;
    if !status.ready {
        return Ok((None, keep_going()));
    }

    let previous_address = source_store.get_meta(key).await.map(|meta| meta.address);
    if previous_address.as_deref() != status.address.as_deref() {
        // A new backing replaces the old one: drop the stale client so
        // `sync_connection` reconnects to the fresh address
        // (`spec.md` §4.5 step 2, last sentence).
        source_store.remove(key).await;
    }
    Ok((status.address, keep_going()))
}

/// `spec.md` §4.5 step 3: ensure C1 has a client for the current address
/// and mirror its observed connection state back onto status.
pub async fn sync_connection(
    client: Client,
    source_store: &Arc<SourceStore>,
    key: SourceKey,
    source: &CatalogSource,
    address: Option<String>,
) -> Result<(CatalogSource, ChainOutcome), Error> {
    let Some(address) = address else {
        let updated = patch_status::<CatalogSourceStatus, CatalogSource>(client, source, |s| {
            s.connection_state = ConnectionState::Connecting;
        })
        .await?;
        return Ok((updated, stop()));
    };

    if source_store.get_meta(&key).await.is_none() {
        source_store.add(key.clone(), address.clone()).await;
    }

    let meta = source_store.get_meta(&key).await;
    let (state, last_connect) = meta.map(|m| (m.state, m.last_connect)).unwrap_or((ConnectionState::Connecting, None));

    let updated = patch_status::<CatalogSourceStatus, CatalogSource>(client, source, |s| {
        s.connection_state = state;
        s.registry_service = Some(address.clone());
        if let Some(last_connect) = last_connect {
            s.last_connect = Some(Time(last_connect));
        }
    })
    .await?;
    Ok((updated, keep_going()))
}
