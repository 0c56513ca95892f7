use k8s_openapi::api::core::v1::ServiceAccount;
use kube::{Api, Client};

use catalog_types::StepStatus;

use crate::util::Error;

use super::{create_or_update, union_annotations};

/// `spec.md` §4.2: preserve `secrets`/`imagePullSecrets` from the live
/// object, union annotations favoring the new manifest's values.
pub async fn ensure_service_account(client: Client, namespace: &str, desired: ServiceAccount) -> Result<StepStatus, Error> {
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("ServiceAccount manifest missing metadata.name".into()))?;
    let api: Api<ServiceAccount> = Api::namespaced(client, namespace);
    create_or_update(&api, &name, &desired, |current, desired| {
        let mut merged = desired.clone();
        merged.secrets.clone_from(&current.secrets);
        merged.image_pull_secrets.clone_from(&current.image_pull_secrets);
        let existing_annotations = current.metadata.annotations.clone().unwrap_or_default();
        let new_annotations = desired.metadata.annotations.clone().unwrap_or_default();
        merged.metadata.annotations = Some(union_annotations(&existing_annotations, &new_annotations));
        merged
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn merge_preserves_secrets_and_unions_annotations() {
        let current = ServiceAccount {
            metadata: kube::api::ObjectMeta {
                name: Some("sa".into()),
                annotations: Some(BTreeMap::from([("a".into(), "x".into()), ("b".into(), "y".into())])),
                ..Default::default()
            },
            secrets: Some(vec![k8s_openapi::api::core::v1::ObjectReference {
                name: Some("s1".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let desired = ServiceAccount {
            metadata: kube::api::ObjectMeta {
                name: Some("sa".into()),
                annotations: Some(BTreeMap::from([("b".into(), "z".into()), ("c".into(), "w".into())])),
                ..Default::default()
            },
            secrets: None,
            ..Default::default()
        };

        // Mirrors the private merge closure in `ensure_service_account`
        // without requiring a live `Api`.
        let mut merged = desired.clone();
        merged.secrets.clone_from(&current.secrets);
        merged.image_pull_secrets.clone_from(&current.image_pull_secrets);
        let existing_annotations = current.metadata.annotations.clone().unwrap_or_default();
        let new_annotations = desired.metadata.annotations.clone().unwrap_or_default();
        merged.metadata.annotations = Some(union_annotations(&existing_annotations, &new_annotations));

        assert_eq!(merged.secrets.unwrap()[0].name.as_deref(), Some("s1"));
        let annotations = merged.metadata.annotations.unwrap();
        assert_eq!(annotations.get("a").unwrap(), "x");
        assert_eq!(annotations.get("b").unwrap(), "z");
        assert_eq!(annotations.get("c").unwrap(), "w");
    }
}
