use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::ANNOTATION_EXCLUDE_GLOBAL_RESOLUTION;

/// Scopes a set of namespaces an operator installed via this group is
/// entitled to watch; C3 reads this only to build the attenuated service
/// account reference it stamps onto `InstallPlanStatus` (`spec.md` §3,
/// §4.3 step 6). Role/binding synthesis from `targetNamespaces` is out of
/// scope (`spec.md` §1 Non-goals).
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operators.example",
    version = "v1alpha1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    shortname = "og",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    #[serde(default)]
    pub target_namespaces: Vec<String>,

    /// Name of the `ServiceAccount` InstallPlans in this group's
    /// namespace should run their step execution as, instead of the
    /// operator's own identity.
    pub service_account_name: Option<String>,
}

/// True when `annotations[olm.operatorframework.io/exclude-global-namespace-resolution]`
/// is exactly `"true"` (`spec.md` §4.4 step 2, §6).
pub fn excludes_global_resolution(annotations: &std::collections::BTreeMap<String, String>) -> bool {
    annotations
        .get(ANNOTATION_EXCLUDE_GLOBAL_RESOLUTION)
        .is_some_and(|v| v == "true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn excludes_global_resolution_requires_exact_true_string() {
        let mut annotations = BTreeMap::new();
        assert!(!excludes_global_resolution(&annotations));
        annotations.insert(ANNOTATION_EXCLUDE_GLOBAL_RESOLUTION.to_string(), "yes".to_string());
        assert!(!excludes_global_resolution(&annotations));
        annotations.insert(ANNOTATION_EXCLUDE_GLOBAL_RESOLUTION.to_string(), "true".to_string());
        assert!(excludes_global_resolution(&annotations));
    }
}
