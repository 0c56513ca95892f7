use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use catalog_types::StepStatus;

use crate::util::Error;

use super::create_or_update;

/// `spec.md` §4.2: standard create-or-update, full overwrite.
pub async fn ensure_secret(client: Client, namespace: &str, desired: Secret) -> Result<StepStatus, Error> {
    let name = desired.metadata.name.clone().ok_or_else(|| Error::UserInput("Secret manifest missing metadata.name".into()))?;
    let api: Api<Secret> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |_current, desired| desired.clone()).await
}

/// `spec.md` §4.2 "Secret (copy-from-global)": read `source_name` from the
/// operator's global namespace, copy `data`/`type` into a new secret named
/// `target_name` in `namespace`, then apply the standard algorithm.
pub async fn ensure_global_secret_copy(
    client: Client,
    global_namespace: &str,
    source_name: &str,
    namespace: &str,
    target_name: &str,
) -> Result<StepStatus, Error> {
    let source_api: Api<Secret> = Api::namespaced(client.clone(), global_namespace);
    let source = source_api.get(source_name).await?;

    let desired = Secret {
        metadata: kube::api::ObjectMeta { name: Some(target_name.to_string()), ..Default::default() },
        data: source.data,
        string_data: None,
        type_: source.type_,
        ..Default::default()
    };

    ensure_secret(client, namespace, desired).await
}
