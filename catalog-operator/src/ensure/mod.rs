//! C2 Step Ensurer (`spec.md` §4.2): one file per kind family, each
//! exposing `ensure_<kind>(client, namespace, object, ...) ->
//! Result<StepStatus, Error>` built on the shared create-then-get-then-merge
//! algorithm below.

pub mod crd;
pub mod csv_subscription;
pub mod rbac;
pub mod secret;
pub mod service_account;
pub mod unstructured;
pub mod workload;

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Api,
    api::{PostParams, Resource},
};
use serde::{Serialize, de::DeserializeOwned};

use catalog_types::StepStatus;

use crate::util::{Error, is_already_exists, is_update_conflict};

/// The create-then-get-then-merge algorithm common to every mutable kind
/// (`spec.md` §4.2 "Common semantics"). `merge` receives the live object
/// and the desired object and returns what should be written back; if the
/// result is value-equal to `current`, the update is skipped and `Present`
/// is returned without an API call.
pub async fn create_or_update<K>(
    api: &Api<K>,
    name: &str,
    desired: &K,
    merge: impl FnOnce(&K, &K) -> K,
) -> Result<StepStatus, Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static,
{
    match api.create(&PostParams::default(), desired).await {
        Ok(_) => Ok(StepStatus::Created),
        Err(err) if is_already_exists(&err) => {
            let current = api.get(name).await?;
            let mut merged = merge(&current, desired);
            // `desired` carries none of the server-assigned metadata
            // `current` does (resourceVersion, uid, creationTimestamp,
            // managedFields, generation); copy it across before comparing so
            // the equality check only sees the managed subset (`spec.md`
            // §4.2 step 3c's DeepDerivative) instead of always differing.
            copy_server_assigned_metadata(&mut merged, &current);
            if serde_json::to_value(&merged)? == serde_json::to_value(&current)? {
                return Ok(StepStatus::Present);
            }
            match api.replace(name, &PostParams::default(), &merged).await {
                Ok(_) => Ok(StepStatus::Present),
                // Optimistic-concurrency conflict: drop this attempt, the
                // next sync re-reads and converges (`spec.md` §3, §5).
                Err(err) if is_update_conflict(&err) => Ok(StepStatus::NotPresent),
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Copies the metadata fields the apiserver assigns (never supplied by a
/// catalog manifest) from `current` onto `merged`, so a converged object
/// compares equal instead of differing only on server-stamped bookkeeping.
fn copy_server_assigned_metadata<K: Resource>(merged: &mut K, current: &K) {
    let current_meta = current.meta().clone();
    let meta = merged.meta_mut();
    meta.resource_version = current_meta.resource_version;
    meta.uid = current_meta.uid;
    meta.creation_timestamp = current_meta.creation_timestamp;
    meta.managed_fields = current_meta.managed_fields;
    meta.generation = current_meta.generation;
}

/// Create-only semantics for kinds with their own controller
/// (ClusterServiceVersion, Subscription — `spec.md` §4.2 last bullet).
pub async fn create_only<K>(api: &Api<K>, desired: &K) -> Result<StepStatus, Error>
where
    K: Resource + Serialize + Debug + Send + Sync + 'static,
{
    match api.create(&PostParams::default(), desired).await {
        Ok(_) => Ok(StepStatus::Created),
        Err(err) if is_already_exists(&err) => Ok(StepStatus::Present),
        Err(err) => Err(err.into()),
    }
}

/// `spec.md` §4.2 ServiceAccount bullet: "union annotations (existing wins
/// only where new has no value)" — new values take the matching key, keys
/// only present in `existing` survive untouched.
pub fn union_annotations(existing: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = existing.clone();
    merged.extend(new.clone());
    merged
}

/// Sets the `owner` label ClusterRole/ClusterRoleBinding carry back to the
/// CSV that declared them (`spec.md` §4.2 ClusterRole bullet).
pub fn set_owner_label(meta: &mut ObjectMeta, resolving: &str) {
    meta.labels.get_or_insert_with(BTreeMap::new).insert("owner".to_string(), resolving.to_string());
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;

    use super::*;

    #[test]
    fn copy_server_assigned_metadata_makes_converged_objects_compare_equal() {
        let current = ConfigMap {
            metadata: ObjectMeta {
                name: Some("cfg".to_string()),
                resource_version: Some("42".to_string()),
                uid: Some("abc-123".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        };
        // `desired` (what a catalog manifest declares) has none of the
        // server-assigned fields `current` carries.
        let mut merged = ConfigMap {
            metadata: ObjectMeta { name: Some("cfg".to_string()), ..Default::default() },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        };

        assert_ne!(serde_json::to_value(&merged).unwrap(), serde_json::to_value(&current).unwrap());
        copy_server_assigned_metadata(&mut merged, &current);
        assert_eq!(serde_json::to_value(&merged).unwrap(), serde_json::to_value(&current).unwrap());
    }

    #[test]
    fn union_annotations_prefers_new_value_on_conflict() {
        let existing = BTreeMap::from([("a".to_string(), "x".to_string()), ("b".to_string(), "y".to_string())]);
        let new = BTreeMap::from([("b".to_string(), "z".to_string()), ("c".to_string(), "w".to_string())]);
        let merged = union_annotations(&existing, &new);
        assert_eq!(merged.get("a").unwrap(), "x");
        assert_eq!(merged.get("b").unwrap(), "z");
        assert_eq!(merged.get("c").unwrap(), "w");
    }

    #[test]
    fn set_owner_label_replaces_prior_value() {
        let mut meta = ObjectMeta::default();
        set_owner_label(&mut meta, "csv.v1");
        set_owner_label(&mut meta, "csv.v2");
        assert_eq!(meta.labels.unwrap().get("owner").unwrap(), "csv.v2");
    }
}
