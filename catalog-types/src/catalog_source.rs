use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where a `CatalogSource`'s bundle metadata comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SourceType {
    /// Content baked into the operator's own image; served from an
    /// in-process registry server.
    Internal,
    /// Content embedded in a `ConfigMap` in the same namespace.
    #[default]
    ConfigMap,
    /// A standalone registry server reachable over gRPC at `spec.address`.
    Grpc,
}

/// Connection state of C1's client for one `CatalogSource` (`spec.md` §3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operators.example",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    shortname = "catsrc",
    derive = "PartialEq",
    status = "CatalogSourceStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.sourceType\", \"name\": \"TYPE\", \"type\": \"string\"}")]
#[kube(printcolumn = "{\"jsonPath\": \".status.connectionState\", \"name\": \"STATE\", \"type\": \"string\"}")]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    pub source_type: SourceType,

    /// Name of the backing `ConfigMap`, required when `sourceType` is
    /// `internal` or `configMap`.
    pub config_map: Option<String>,

    /// Network address (`host:port`) or image reference of the registry
    /// server, required when `sourceType` is `grpc`.
    pub address: Option<String>,

    /// How often to poll the backing `ConfigMap`/image for updates.
    #[serde(default)]
    pub update_strategy_poll_interval_minutes: Option<u32>,

    /// Relative priority used when multiple catalogs are reachable from a
    /// namespace; higher wins in the resolver's own tie-breaking (out of
    /// scope here, forwarded as-is).
    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Display name surfaced to users; purely cosmetic.
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    /// `namespace/name` of the `Service` fronting the registry server, once
    /// one has been reconciled into existence by C5.
    pub registry_service: Option<String>,

    #[serde(default)]
    pub connection_state: ConnectionState,

    pub last_connect: Option<Time>,
    pub last_observed_state: Option<Time>,

    /// Digest of the backing `ConfigMap`'s `data`, used to detect content
    /// changes without relying on `resourceVersion` churn from unrelated
    /// metadata edits.
    pub config_map_digest: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl CatalogSourceStatus {
    pub fn is_ready(&self) -> bool {
        self.connection_state == ConnectionState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_through_serde() {
        let json = serde_json::to_string(&SourceType::Grpc).unwrap();
        assert_eq!(json, "\"grpc\"");
        let back: SourceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceType::Grpc);
    }

    #[test]
    fn default_source_type_is_config_map() {
        assert_eq!(SourceType::default(), SourceType::ConfigMap);
    }
}
