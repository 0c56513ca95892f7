use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Api, Client};

use catalog_types::StepStatus;

use crate::util::Error;

use super::create_or_update;

/// `spec.md` §4.2: "Role / RoleBinding / Service / ConfigMap: full
/// overwrite with current resource-version."
pub async fn ensure_service(client: Client, namespace: &str, desired: Service) -> Result<StepStatus, Error> {
    let name = desired.metadata.name.clone().ok_or_else(|| Error::UserInput("Service manifest missing metadata.name".into()))?;
    let api: Api<Service> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

pub async fn ensure_config_map(client: Client, namespace: &str, desired: ConfigMap) -> Result<StepStatus, Error> {
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("ConfigMap manifest missing metadata.name".into()))?;
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}
