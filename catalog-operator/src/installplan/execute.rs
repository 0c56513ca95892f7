//! `ExecutePlan` (`spec.md` §4.3): a free function, not a method, so it is
//! independently unit-testable against an in-memory fake `StepEnsurer`
//! trait object without a live cluster (`SPEC_FULL.md` §4.3,
//! `spec.md` §8 "Idempotence of ExecutePlan").

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use kube::Client;
use kube::api::DynamicObject;
use kube::core::{ApiResource, GroupVersionKind as KubeGvk};
use serde_json::Value;

use catalog_types::{Step, StepStatus, constants::is_deprecated_group_version};

use crate::ensure::{self, unstructured::GroupVersionKind};
use crate::util::Error;

/// Abstraction over C2's kind dispatch (`spec.md` §4.2): given a decoded
/// step targeting `namespace`, creates-or-updates the single object it
/// describes and reports its resulting status.
#[async_trait]
pub trait StepEnsurer: Send + Sync {
    async fn ensure(&self, namespace: &str, step: &Step) -> Result<StepStatus, Error>;
}

/// Dispatches to the real `ensure::*` functions by the step's declared
/// kind (`spec.md` §9 "Dynamic dispatch on Kind": an enumerated sum type
/// per supported kind plus an allowlisted unstructured arm).
pub struct ClusterStepEnsurer {
    pub client: Client,
    pub allowlist: HashSet<GroupVersionKind>,
}

#[async_trait]
impl StepEnsurer for ClusterStepEnsurer {
    async fn ensure(&self, namespace: &str, step: &Step) -> Result<StepStatus, Error> {
        let resource = &step.resource;
        let manifest: Value = serde_json::from_str(&resource.manifest)?;

        match resource.kind.as_str() {
            "ServiceAccount" => {
                ensure::service_account::ensure_service_account(self.client.clone(), namespace, serde_json::from_value(manifest)?).await
            }
            "Role" => ensure::rbac::ensure_role(self.client.clone(), namespace, serde_json::from_value(manifest)?).await,
            "RoleBinding" => ensure::rbac::ensure_role_binding(self.client.clone(), namespace, serde_json::from_value(manifest)?).await,
            "ClusterRole" => {
                ensure::rbac::ensure_cluster_role(self.client.clone(), &step.resolving, serde_json::from_value(manifest)?).await
            }
            "ClusterRoleBinding" => {
                ensure::rbac::ensure_cluster_role_binding(self.client.clone(), &step.resolving, serde_json::from_value(manifest)?).await
            }
            "Service" => ensure::workload::ensure_service(self.client.clone(), namespace, serde_json::from_value(manifest)?).await,
            "ConfigMap" => ensure::workload::ensure_config_map(self.client.clone(), namespace, serde_json::from_value(manifest)?).await,
            "Secret" => ensure::secret::ensure_secret(self.client.clone(), namespace, serde_json::from_value(manifest)?).await,
            "CustomResourceDefinition" => {
                ensure::crd::ensure_custom_resource_definition(self.client.clone(), serde_json::from_value(manifest)?).await
            }
            "Subscription" => {
                ensure::csv_subscription::ensure_subscription(self.client.clone(), namespace, serde_json::from_value(manifest)?).await
            }
            "ClusterServiceVersion" => {
                let gvk = KubeGvk::gvk(&resource.group, &resource.version, &resource.kind);
                let api_resource = ApiResource::from_gvk_with_plural(&gvk, "clusterserviceversions");
                let object: DynamicObject = serde_json::from_value(manifest)?;
                ensure::csv_subscription::ensure_cluster_service_version(self.client.clone(), namespace, &api_resource, object).await
            }
            kind => {
                let gvk = KubeGvk::gvk(&resource.group, &resource.version, kind);
                let api_resource = ApiResource::from_gvk(&gvk);
                let gvk_key = GroupVersionKind::new(resource.group.clone(), resource.version.clone(), kind.to_string());
                let object: DynamicObject = serde_json::from_value(manifest)?;
                ensure::unstructured::ensure_unstructured(self.client.clone(), namespace, &gvk_key, &api_resource, &self.allowlist, object)
                    .await
            }
        }
    }
}

/// Applies each step in `{unknown, not-present}` via `ensurer`, in index
/// order. `csv_uids` maps a live ClusterServiceVersion's name to its
/// current UID (for owner-reference rewriting); `competing_crd_owners`
/// maps a CRD name already present in the cluster to the CSV that owns it
/// (for the competing-owner check); `crd_established` reports whether a
/// CRD awaiting `waiting-for-api` has become `Established`+
/// `NamesAccepted`. All three are precomputed by the caller so this
/// function stays a plain data transform plus the `ensurer` call.
pub async fn execute_plan(
    namespace: &str,
    plan_csv_names: &HashSet<String>,
    steps: &mut [Step],
    csv_uids: &HashMap<String, String>,
    competing_crd_owners: &HashMap<String, String>,
    crd_established: &HashMap<String, bool>,
    ensurer: &dyn StepEnsurer,
) -> Result<(), Error> {
    for step in steps.iter_mut() {
        if step.status.is_converged() {
            continue;
        }

        if step.status == StepStatus::WaitingForApi {
            if crd_established.get(&step.resource.name).copied().unwrap_or(false) {
                step.status = StepStatus::Created;
            }
            continue;
        }

        if !step.status.needs_action() {
            continue;
        }

        if is_deprecated_group_version(&step.resource.api_version()) {
            return Err(Error::DeprecatedGroupVersion { gv: step.resource.api_version() });
        }

        if step.resource.kind == "CustomResourceDefinition" {
            if let Some(existing_owner) = competing_crd_owners.get(&step.resource.name) {
                if !plan_csv_names.contains(existing_owner) {
                    return Err(Error::CompetingCrdOwner {
                        crd: step.resource.name.clone(),
                        existing_owner: existing_owner.clone(),
                        new_owner: step.resolving.clone(),
                    });
                }
            }
        }

        let mut patched = step.clone();
        rewrite_csv_owner_uids(&mut patched.resource.manifest, csv_uids)?;
        set_manifest_namespace(&mut patched.resource.manifest, namespace)?;

        step.status = ensurer.ensure(namespace, &patched).await?;
    }
    Ok(())
}

/// Rewrites every owner reference of kind `ClusterServiceVersion` in the
/// manifest to carry the current UID from `csv_uids` (`spec.md` §4.3
/// "ExecutePlan", §8 "Ownership closure").
fn rewrite_csv_owner_uids(manifest: &mut String, csv_uids: &HashMap<String, String>) -> Result<(), Error> {
    let mut value: Value = serde_json::from_str(manifest)?;
    if let Some(owners) = value.pointer_mut("/metadata/ownerReferences").and_then(|v| v.as_array_mut()) {
        for owner in owners.iter_mut() {
            let is_csv = owner.get("kind").and_then(|k| k.as_str()) == Some("ClusterServiceVersion");
            let name = owner.get("name").and_then(|n| n.as_str()).map(str::to_string);
            if is_csv {
                if let Some(uid) = name.and_then(|n| csv_uids.get(&n).cloned()) {
                    owner["uid"] = Value::String(uid);
                }
            }
        }
    }
    *manifest = serde_json::to_string(&value)?;
    Ok(())
}

fn set_manifest_namespace(manifest: &mut String, namespace: &str) -> Result<(), Error> {
    let mut value: Value = serde_json::from_str(manifest)?;
    if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
    }
    *manifest = serde_json::to_string(&value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use catalog_types::StepResource;

    use super::*;

    struct RecordingEnsurer {
        calls: Mutex<Vec<String>>,
        result: StepStatus,
    }

    #[async_trait]
    impl StepEnsurer for RecordingEnsurer {
        async fn ensure(&self, _namespace: &str, step: &Step) -> Result<StepStatus, Error> {
            self.calls.lock().unwrap().push(step.resource.name.clone());
            Ok(self.result)
        }
    }

    fn step(kind: &str, name: &str, status: StepStatus) -> Step {
        Step {
            resolving: "csv.v1".into(),
            resource: StepResource {
                group: String::new(),
                version: "v1".into(),
                kind: kind.into(),
                name: name.into(),
                manifest: serde_json::json!({ "metadata": { "name": name } }).to_string(),
                catalog_source: "src".into(),
                catalog_source_namespace: "ns".into(),
            },
            status,
        }
    }

    #[tokio::test]
    async fn unknown_steps_are_applied_and_marked_created() {
        let mut steps = vec![step("ConfigMap", "cfg", StepStatus::Unknown)];
        let ensurer = RecordingEnsurer { calls: Mutex::new(Vec::new()), result: StepStatus::Created };
        execute_plan(
            "ns",
            &HashSet::from(["csv.v1".to_string()]),
            &mut steps,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
            &ensurer,
        )
        .await
        .unwrap();
        assert_eq!(steps[0].status, StepStatus::Created);
        assert_eq!(ensurer.calls.lock().unwrap().as_slice(), ["cfg"]);
    }

    #[tokio::test]
    async fn converged_steps_are_skipped() {
        let mut steps = vec![step("ConfigMap", "cfg", StepStatus::Present)];
        let ensurer = RecordingEnsurer { calls: Mutex::new(Vec::new()), result: StepStatus::Created };
        execute_plan(
            "ns",
            &HashSet::new(),
            &mut steps,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
            &ensurer,
        )
        .await
        .unwrap();
        assert!(ensurer.calls.lock().unwrap().is_empty());
        assert_eq!(steps[0].status, StepStatus::Present);
    }

    #[tokio::test]
    async fn deprecated_group_version_fails_without_calling_ensurer() {
        let mut steps = vec![Step {
            resolving: "csv.v1".into(),
            resource: StepResource {
                group: "rbac.authorization.k8s.io".into(),
                version: "v1beta1".into(),
                kind: "Role".into(),
                name: "r".into(),
                manifest: "{}".into(),
                catalog_source: "src".into(),
                catalog_source_namespace: "ns".into(),
            },
            status: StepStatus::Unknown,
        }];
        let ensurer = RecordingEnsurer { calls: Mutex::new(Vec::new()), result: StepStatus::Created };
        let err = execute_plan(
            "ns",
            &HashSet::new(),
            &mut steps,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
            &ensurer,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DeprecatedGroupVersion { .. }));
        assert!(ensurer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn competing_crd_owner_outside_plan_fails() {
        let mut steps = vec![step("CustomResourceDefinition", "feathers.example.com", StepStatus::Unknown)];
        let competing = HashMap::from([("feathers.example.com".to_string(), "turkey".to_string())]);
        let ensurer = RecordingEnsurer { calls: Mutex::new(Vec::new()), result: StepStatus::Created };
        let err = execute_plan("ns", &HashSet::from(["seagull".to_string()]), &mut steps, &HashMap::new(), &competing, &HashMap::new(), &ensurer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompetingCrdOwner { .. }));
    }

    #[tokio::test]
    async fn waiting_for_api_promotes_to_created_once_established() {
        let mut steps = vec![step("CustomResourceDefinition", "widgets.example.com", StepStatus::WaitingForApi)];
        let established = HashMap::from([("widgets.example.com".to_string(), true)]);
        let ensurer = RecordingEnsurer { calls: Mutex::new(Vec::new()), result: StepStatus::Created };
        execute_plan("ns", &HashSet::new(), &mut steps, &HashMap::new(), &HashMap::new(), &established, &ensurer).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Created);
        assert!(ensurer.calls.lock().unwrap().is_empty());
    }
}
