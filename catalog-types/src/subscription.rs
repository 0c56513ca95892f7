use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum Approval {
    #[default]
    Automatic,
    Manual,
}

/// Stable string contract, `spec.md` §6: `SubscriptionState{None,
/// UpgradeAvailable, UpgradePending, AtLatest}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum SubscriptionState {
    #[default]
    None,
    UpgradeAvailable,
    UpgradePending,
    AtLatest,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceRef {
    pub name: String,
    pub namespace: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operators.example",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    shortname = "sub",
    derive = "PartialEq",
    status = "SubscriptionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.package\", \"name\": \"PACKAGE\", \"type\": \"string\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".status.state\", \"name\": \"STATE\", \"type\": \"string\"}")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    pub package: String,
    pub channel: String,

    #[serde(default)]
    pub approval: Approval,

    /// Pins the initial install to an exact CSV rather than "whatever the
    /// channel head is"; subsequent upgrades still follow the channel.
    #[serde(default)]
    pub starting_csv: Option<String>,
}

impl SubscriptionSpec {
    pub fn catalog_source_ref(&self) -> CatalogSourceRef {
        CatalogSourceRef {
            name: self.catalog_source.clone(),
            namespace: self.catalog_source_namespace.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub current_csv: Option<String>,

    #[serde(default)]
    pub state: SubscriptionState,

    /// `namespace/name` of the most recently created/adopted InstallPlan.
    /// Per `spec.md` §3 "at most one current plan", this is always the
    /// latest plan created for this subscription.
    pub install_plan_ref: Option<String>,

    /// Monotonically increasing per subscription (`spec.md` §8 "Monotone
    /// generation").
    #[serde(default)]
    pub install_plan_generation: i64,

    pub last_updated: Option<Time>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_wire_values_match_stable_contract() {
        assert_eq!(serde_json::to_string(&Approval::Automatic).unwrap(), "\"Automatic\"");
        assert_eq!(serde_json::to_string(&Approval::Manual).unwrap(), "\"Manual\"");
    }

    #[test]
    fn subscription_state_wire_values_match_stable_contract() {
        for (state, expected) in [
            (SubscriptionState::None, "\"None\""),
            (SubscriptionState::UpgradeAvailable, "\"UpgradeAvailable\""),
            (SubscriptionState::UpgradePending, "\"UpgradePending\""),
            (SubscriptionState::AtLatest, "\"AtLatest\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), expected);
        }
    }
}
