//! `EnsureUnstructured` (`spec.md` §4.2): the allowlisted "everything else"
//! kind family — PrometheusRule, ServiceMonitor, PodDisruptionBudget,
//! PriorityClass, VerticalPodAutoscaler, and a small set of console
//! resources. The allowlist is a runtime `HashSet`, not a hard-coded
//! match, so adding a kind is a one-line change (`spec.md` §9 "Dynamic
//! dispatch on Kind").

use std::collections::HashSet;

use kube::api::DynamicObject;
use kube::core::ApiResource;
use kube::{Api, Client};

use catalog_types::StepStatus;

use crate::util::Error;

use super::create_or_update;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }
}

/// The default allowlist named in `spec.md` §4.2. `OperatorConfig` (C3's
/// config, not modeled as a separate type here) may extend this set at
/// startup; this function is the seed, not the ceiling.
pub fn default_allowlist() -> HashSet<GroupVersionKind> {
    HashSet::from([
        GroupVersionKind::new("monitoring.coreos.com", "v1", "PrometheusRule"),
        GroupVersionKind::new("monitoring.coreos.com", "v1", "ServiceMonitor"),
        GroupVersionKind::new("policy", "v1", "PodDisruptionBudget"),
        GroupVersionKind::new("scheduling.k8s.io", "v1", "PriorityClass"),
        GroupVersionKind::new("autoscaling.k8s.io", "v1", "VerticalPodAutoscaler"),
        GroupVersionKind::new("console.openshift.io", "v1", "ConsoleYAMLSample"),
        GroupVersionKind::new("console.openshift.io", "v1", "ConsoleLink"),
    ])
}

/// Full-overwrite create-or-update for any kind on `allowlist`; rejects
/// anything else with `Error::UnsupportedKind` so the caller can fail the
/// step with `StepStatus::UnsupportedResource` (`spec.md` §7 last row).
pub async fn ensure_unstructured(
    client: Client,
    namespace: &str,
    gvk: &GroupVersionKind,
    api_resource: &ApiResource,
    allowlist: &HashSet<GroupVersionKind>,
    desired: DynamicObject,
) -> Result<StepStatus, Error> {
    if !allowlist.contains(gvk) {
        return Err(Error::UnsupportedKind {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        });
    }
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("manifest missing metadata.name".into()))?;
    let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, api_resource);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowlist_contains_prometheus_rule() {
        let allowlist = default_allowlist();
        assert!(allowlist.contains(&GroupVersionKind::new("monitoring.coreos.com", "v1", "PrometheusRule")));
        assert!(!allowlist.contains(&GroupVersionKind::new("example.com", "v1", "Widget")));
    }
}
