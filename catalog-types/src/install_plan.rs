use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::subscription::Approval;

/// Stable string contract, `spec.md` §6: `{None, Planning, RequiresApproval,
/// Installing, Complete, Failed}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum InstallPlanPhase {
    #[default]
    None,
    Planning,
    RequiresApproval,
    Installing,
    Complete,
    Failed,
}

impl InstallPlanPhase {
    /// True once the transitioner has stopped touching this plan on its
    /// own (a terminal phase for the current attempt, `spec.md` §4.3).
    pub fn is_terminal(self) -> bool {
        matches!(self, InstallPlanPhase::Complete | InstallPlanPhase::Failed)
    }
}

/// Stable string contract, `spec.md` §6: `{Unknown, NotPresent, Present,
/// Created, WaitingForAPI, UnsupportedResource}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum StepStatus {
    #[default]
    Unknown,
    NotPresent,
    Present,
    Created,
    WaitingForApi,
    UnsupportedResource,
}

impl StepStatus {
    /// A step in one of these statuses still needs `ExecutePlan` to act on
    /// it; everything else is either converged or terminal.
    pub fn needs_action(self) -> bool {
        matches!(self, StepStatus::Unknown | StepStatus::NotPresent)
    }

    /// A step the plan considers satisfied (`spec.md` §8 "Idempotence of
    /// ExecutePlan": final statuses are `{present, created}`).
    pub fn is_converged(self) -> bool {
        matches!(self, StepStatus::Present | StepStatus::Created)
    }
}

/// The resource a `Step` applies, carried alongside the raw manifest so
/// steps can be compared/deduplicated without re-parsing it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,

    /// The object to create/update, serialized as a JSON string (a
    /// `kube::core::DynamicObject` round-tripped through `serde_json`) or,
    /// for steps still pending unpack, a bundle reference string.
    pub manifest: String,

    pub catalog_source: String,
    pub catalog_source_namespace: String,
}

impl StepResource {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Name of the ClusterServiceVersion this step's resource belongs to.
    pub resolving: String,
    pub resource: StepResource,

    #[serde(default)]
    pub status: StepStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleLookup {
    /// Image reference or `ConfigMap` name the unpack job reads from.
    pub source: String,
    pub identifier: String,

    /// Opaque property blob forwarded to/from the external unpacker;
    /// the core never interprets its contents.
    #[serde(default)]
    pub properties: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttenuatedServiceAccountRef {
    pub name: String,
    pub namespace: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operators.example",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    shortname = "ip",
    derive = "PartialEq",
    status = "InstallPlanStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\"}")]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    pub cluster_service_version_names: Vec<String>,

    #[serde(default)]
    pub approval: Approval,

    /// Never flipped by the transitioner itself (`spec.md` §3 "Approval
    /// gate"); only a user (or the creating Subscription, for Automatic
    /// approval) sets this.
    #[serde(default)]
    pub approved: bool,

    /// Strictly greater than any prior generation for the owning
    /// Subscription(s) (`spec.md` §3 "Generation monotonicity").
    #[serde(default)]
    pub generation: i64,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanStatus {
    #[serde(default)]
    pub phase: InstallPlanPhase,

    #[serde(default)]
    pub plan: Vec<Step>,

    #[serde(default)]
    pub bundle_lookups: Vec<BundleLookup>,

    #[serde(default)]
    pub catalog_sources: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    pub attenuated_service_account_ref: Option<AttenuatedServiceAccountRef>,
}

impl InstallPlanStatus {
    /// `spec.md` §4.3 step 1: "Empty plan guard".
    pub fn is_empty_plan(&self) -> bool {
        self.plan.is_empty() && self.bundle_lookups.is_empty()
    }

    /// `spec.md` §8 "Idempotence of ExecutePlan": the plan is done once
    /// every step is `{present, created}`.
    pub fn all_steps_converged(&self) -> bool {
        !self.plan.is_empty() && self.plan.iter().all(|s| s.status.is_converged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_wire_values_match_stable_contract() {
        for (phase, expected) in [
            (InstallPlanPhase::None, "\"None\""),
            (InstallPlanPhase::Planning, "\"Planning\""),
            (InstallPlanPhase::RequiresApproval, "\"RequiresApproval\""),
            (InstallPlanPhase::Installing, "\"Installing\""),
            (InstallPlanPhase::Complete, "\"Complete\""),
            (InstallPlanPhase::Failed, "\"Failed\""),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), expected);
        }
    }

    #[test]
    fn step_status_wire_values_match_stable_contract() {
        for (status, expected) in [
            (StepStatus::Unknown, "\"Unknown\""),
            (StepStatus::NotPresent, "\"NotPresent\""),
            (StepStatus::Present, "\"Present\""),
            (StepStatus::Created, "\"Created\""),
            (StepStatus::WaitingForApi, "\"WaitingForApi\""),
            (StepStatus::UnsupportedResource, "\"UnsupportedResource\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }

    #[test]
    fn empty_plan_guard_true_only_when_both_lists_empty() {
        let status = InstallPlanStatus::default();
        assert!(status.is_empty_plan());
    }

    #[test]
    fn all_steps_converged_false_on_empty_plan() {
        assert!(!InstallPlanStatus::default().all_steps_converged());
    }

    #[test]
    fn all_steps_converged_true_when_every_step_present_or_created() {
        let mut status = InstallPlanStatus::default();
        status.plan.push(Step {
            status: StepStatus::Present,
            ..Default::default()
        });
        status.plan.push(Step {
            status: StepStatus::Created,
            ..Default::default()
        });
        assert!(status.all_steps_converged());
        status.plan.push(Step {
            status: StepStatus::Unknown,
            ..Default::default()
        });
        assert!(!status.all_steps_converged());
    }
}
