//! Optimistic-concurrency status patching, generalized from the teacher's
//! single `Cluster`/`ClusterStatus` pair (`storage_operator::util::patch`)
//! to the three CRDs in `catalog-types` via a small `Status`/`Object`
//! trait pair (`SPEC_FULL.md` §3).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, Client, Error,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

use catalog_types::{CatalogSource, CatalogSourceStatus, InstallPlan, InstallPlanStatus, Subscription, SubscriptionStatus};

pub const MANAGER_NAME: &str = "catalog-operator";

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing it
    /// with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    /// Records that the status was just rewritten. A no-op for CRDs that
    /// don't carry their own timestamp field (`InstallPlanStatus`).
    fn touch(&mut self, _now: Time) {}
}

impl Object<CatalogSourceStatus> for CatalogSource {
    fn mut_status(&mut self) -> &mut CatalogSourceStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Status for CatalogSourceStatus {
    fn touch(&mut self, now: Time) {
        self.last_observed_state = Some(now);
    }
}

impl Object<SubscriptionStatus> for Subscription {
    fn mut_status(&mut self) -> &mut SubscriptionStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Status for SubscriptionStatus {
    fn touch(&mut self, now: Time) {
        self.last_updated = Some(now);
    }
}

impl Object<InstallPlanStatus> for InstallPlan {
    fn mut_status(&mut self) -> &mut InstallPlanStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Status for InstallPlanStatus {}

/// Patches the resource's status object with the provided function via a
/// JSON merge-patch diff (`kube`'s server-side-apply `Patch::Json`,
/// applied under a stable field manager). On a 409 conflict, the caller is
/// expected to drop the attempt and let the next sync converge
/// (`spec.md` §3, §5) — this function surfaces the `kube::Error` as-is so
/// callers can match on it with [`super::error::is_update_conflict`].
pub async fn patch_status<S: Status, T>(client: Client, instance: &T, f: impl FnOnce(&mut S)) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource + Object<S> + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        status.touch(Time(k8s_openapi::chrono::Utc::now()));
        json_patch::diff(
            &serde_json::to_value(instance).expect("resource always serializes"),
            &serde_json::to_value(&modified).expect("resource always serializes"),
        )
    });
    let name = instance.meta().name.as_deref().expect("resource has a name");
    let namespace = instance.meta().namespace.as_deref().expect("resource is namespaced");
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch).await
}
