//! Registry-server backing reconciler (`spec.md` §4.5 step 2). Flattened
//! to one enum with a single `ensure` dispatch rather than a trait per
//! backing kind (`spec.md` §9 "Deep inheritance of reconciler types").
//! `pod_resource` is grounded on the teacher's `shards::actions::
//! pod_resource`: owned via `controller_owner_ref`, one container, no
//! volumes since the unpacker pulls its content over the Kubernetes API
//! rather than a mounted hostPath.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod, PodSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};

use catalog_types::CatalogSource;

use crate::util::Error;

const REGISTRY_GRPC_PORT: i32 = 50051;

/// One registry-server backing per `CatalogSource.spec.sourceType`: a pod
/// running the configmap-unpacker image for `internal`/`configMap`
/// sources, or a pod+service pair fronting a `grpc` source's image
/// (`spec.md` §4.5 step 2: "pod + service for grpc; pod for
/// configmap-unpacker").
#[derive(Debug, Clone)]
pub enum RegistryBacking {
    ConfigMapUnpacker { unpacker_image: String, config_map: String },
    Grpc { image: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackingStatus {
    pub ready: bool,
    pub address: Option<String>,
}

impl RegistryBacking {
    pub fn pod_name(&self, catalog_source_name: &str) -> String {
        format!("{catalog_source_name}-registry-server")
    }

    fn service_name(&self, catalog_source_name: &str) -> String {
        format!("{catalog_source_name}-registry-server")
    }

    fn labels(&self, catalog_source_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("olm.catalogSource".to_string(), catalog_source_name.to_string()),
            ("olm.registryBacking".to_string(), "true".to_string()),
        ])
    }

    fn image(&self) -> &str {
        match self {
            RegistryBacking::ConfigMapUnpacker { unpacker_image, .. } => unpacker_image,
            RegistryBacking::Grpc { image } => image,
        }
    }

    fn pod_resource(&self, source: &CatalogSource) -> Result<Pod, Error> {
        let name = source.name_any();
        let namespace = source.meta().namespace.clone().ok_or_else(|| Error::Invariant("CatalogSource missing namespace".into()))?;

        let mut env = Vec::new();
        if let RegistryBacking::ConfigMapUnpacker { config_map, .. } = self {
            env.push(EnvVar { name: "CATALOG_CONFIG_MAP".to_string(), value: Some(config_map.clone()), ..Default::default() });
        }

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(self.pod_name(&name)),
                namespace: Some(namespace),
                labels: Some(self.labels(&name)),
                owner_references: source.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "registry-server".to_string(),
                    image: Some(self.image().to_string()),
                    env: Some(env),
                    ports: Some(vec![ContainerPort { container_port: REGISTRY_GRPC_PORT, ..Default::default() }]),
                    ..Default::default()
                }],
                restart_policy: Some("Always".to_string()),
                ..Default::default()
            }),
            status: None,
        })
    }

    fn service_resource(&self, source: &CatalogSource) -> Result<Service, Error> {
        let name = source.name_any();
        let namespace = source.meta().namespace.clone().ok_or_else(|| Error::Invariant("CatalogSource missing namespace".into()))?;

        Ok(Service {
            metadata: ObjectMeta {
                name: Some(self.service_name(&name)),
                namespace: Some(namespace),
                labels: Some(self.labels(&name)),
                owner_references: source.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.labels(&name)),
                ports: Some(vec![ServicePort {
                    port: REGISTRY_GRPC_PORT,
                    target_port: Some(IntOrString::Int(REGISTRY_GRPC_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        })
    }

    /// `spec.md` §4.5 step 2: create the backing if it's missing, else
    /// report whether it's ready and, if so, its current address. Once
    /// created, this function never touches the pod/service again — C5's
    /// deletion handler via owner references is the only other writer.
    pub async fn ensure(&self, client: Client, source: &CatalogSource) -> Result<BackingStatus, Error> {
        let namespace = source.meta().namespace.clone().ok_or_else(|| Error::Invariant("CatalogSource missing namespace".into()))?;
        let name = source.name_any();
        let pod_name = self.pod_name(&name);

        let pod_api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let existing_pod = match pod_api.get_opt(&pod_name).await? {
            Some(pod) => pod,
            None => {
                pod_api.create(&PostParams::default(), &self.pod_resource(source)?).await?;
                return Ok(BackingStatus::default());
            }
        };

        if let RegistryBacking::Grpc { .. } = self {
            let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);
            let svc_name = self.service_name(&name);
            if svc_api.get_opt(&svc_name).await?.is_none() {
                svc_api.create(&PostParams::default(), &self.service_resource(source)?).await?;
                return Ok(BackingStatus::default());
            }
            let ready = pod_is_ready(&existing_pod);
            return Ok(BackingStatus { ready, address: ready.then(|| format!("{svc_name}.{namespace}.svc:{REGISTRY_GRPC_PORT}")) });
        }

        let ready = pod_is_ready(&existing_pod);
        let address = if ready { existing_pod.status.as_ref().and_then(|s| s.pod_ip.clone()).map(|ip| format!("{ip}:{REGISTRY_GRPC_PORT}")) } else { None };
        Ok(BackingStatus { ready, address })
    }
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_name_is_derived_from_catalog_source_name() {
        let backing = RegistryBacking::Grpc { image: "quay.io/example/registry:latest".into() };
        assert_eq!(backing.pod_name("my-source"), "my-source-registry-server");
    }

    #[test]
    fn pod_is_ready_requires_a_true_ready_condition() {
        use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

        let mut pod = Pod::default();
        assert!(!pod_is_ready(&pod));

        pod.status = Some(PodStatus {
            conditions: Some(vec![PodCondition { type_: "Ready".into(), status: "False".into(), ..Default::default() }]),
            ..Default::default()
        });
        assert!(!pod_is_ready(&pod));

        pod.status = Some(PodStatus {
            conditions: Some(vec![PodCondition { type_: "Ready".into(), status: "True".into(), ..Default::default() }]),
            ..Default::default()
        });
        assert!(pod_is_ready(&pod));
    }
}
