//! Owner-reference helpers. `spec.md` §3 "Plan ownership" requires an
//! InstallPlan to be owned *non-blocking* by every Subscription that
//! caused it (1-to-many over an object's lifetime), unlike the teacher's
//! single blocking `controller_owner_ref` (`storage_operator::shards::
//! actions::pod_resource`) used for exactly-one-controller ownership
//! (Pod owned by its Cluster).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, api::ObjectMeta};

/// Builds a non-blocking owner reference: multiple objects may hold one
/// of these against the same owned object without either being "the"
/// controller, and deleting the owned object is never gated on any of
/// them finishing first.
pub fn non_blocking_owner_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let meta = owner.meta();
    Some(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: Some(false),
        block_owner_deletion: Some(false),
    })
}

/// Adds `owner_ref` to `meta.owner_references` unless an owner reference
/// with the same `(kind, name)` is already present.
pub fn add_owner_if_missing(meta: &mut ObjectMeta, owner_ref: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    let already_owner = refs.iter().any(|r| r.kind == owner_ref.kind && r.name == owner_ref.name);
    if !already_owner {
        refs.push(owner_ref);
    }
}

/// True when `meta.owner_references` contains a reference of the given
/// kind and name.
pub fn has_owner(meta: &ObjectMeta, kind: &str, name: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == kind && r.name == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_owner_if_missing_is_idempotent() {
        let mut meta = ObjectMeta::default();
        let owner_ref = OwnerReference {
            api_version: "operators.example/v1alpha1".into(),
            kind: "Subscription".into(),
            name: "my-sub".into(),
            uid: "uid-1".into(),
            controller: Some(false),
            block_owner_deletion: Some(false),
        };
        add_owner_if_missing(&mut meta, owner_ref.clone());
        add_owner_if_missing(&mut meta, owner_ref);
        assert_eq!(meta.owner_references.unwrap().len(), 1);
    }

    #[test]
    fn has_owner_checks_kind_and_name() {
        let mut meta = ObjectMeta::default();
        assert!(!has_owner(&meta, "Subscription", "my-sub"));
        add_owner_if_missing(
            &mut meta,
            OwnerReference {
                api_version: "operators.example/v1alpha1".into(),
                kind: "Subscription".into(),
                name: "my-sub".into(),
                uid: "uid-1".into(),
                controller: Some(false),
                block_owner_deletion: Some(false),
            },
        );
        assert!(has_owner(&meta, "Subscription", "my-sub"));
        assert!(!has_owner(&meta, "Subscription", "other-sub"));
    }
}
