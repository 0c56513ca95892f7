use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::{Api, Client};

use catalog_types::StepStatus;

use crate::util::Error;

use super::{create_or_update, set_owner_label};

/// `spec.md` §4.2: "Role / RoleBinding ...: full overwrite with current
/// resource-version" — `create_or_update` already stamps the current
/// resource version, so the merge closure just takes the desired object.
pub async fn ensure_role(client: Client, namespace: &str, desired: Role) -> Result<StepStatus, Error> {
    let name = desired.metadata.name.clone().ok_or_else(|| Error::UserInput("Role manifest missing metadata.name".into()))?;
    let api: Api<Role> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

pub async fn ensure_role_binding(client: Client, namespace: &str, desired: RoleBinding) -> Result<StepStatus, Error> {
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("RoleBinding manifest missing metadata.name".into()))?;
    let api: Api<RoleBinding> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

/// `spec.md` §4.2: "ClusterRole / ClusterRoleBinding: overwrite
/// rules/subjects; set the `owner` label to `step.resolving`."
pub async fn ensure_cluster_role(client: Client, resolving: &str, mut desired: ClusterRole) -> Result<StepStatus, Error> {
    set_owner_label(&mut desired.metadata, resolving);
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("ClusterRole manifest missing metadata.name".into()))?;
    let api: Api<ClusterRole> = Api::all(client);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

pub async fn ensure_cluster_role_binding(
    client: Client,
    resolving: &str,
    mut desired: ClusterRoleBinding,
) -> Result<StepStatus, Error> {
    set_owner_label(&mut desired.metadata, resolving);
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("ClusterRoleBinding manifest missing metadata.name".into()))?;
    let api: Api<ClusterRoleBinding> = Api::all(client);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}
