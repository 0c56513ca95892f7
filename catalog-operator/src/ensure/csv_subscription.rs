use kube::api::DynamicObject;
use kube::core::ApiResource;
use kube::{Api, Client};

use catalog_types::{StepStatus, Subscription};

use crate::util::Error;

use super::create_only;

/// `spec.md` §4.2: "ClusterServiceVersion, Subscription: create-only; if
/// present, report Present without mutation (their own controllers manage
/// updates)." The CSV kind is an external CRD this operator never defines,
/// so it travels as a `DynamicObject` keyed by the step's own
/// `group`/`version`/`kind`.
pub async fn ensure_cluster_service_version(
    client: Client,
    namespace: &str,
    api_resource: &ApiResource,
    desired: DynamicObject,
) -> Result<StepStatus, Error> {
    let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, api_resource);
    create_only(&api, &desired).await
}

/// A Step may itself create a Subscription (e.g. a dependency resolved
/// into a separate package-level subscription); it is annotated
/// `olm.generated-by` so C4 can adopt its resulting InstallPlan
/// (`spec.md` §6, §4.4 step 2).
pub async fn ensure_subscription(client: Client, namespace: &str, desired: Subscription) -> Result<StepStatus, Error> {
    let api: Api<Subscription> = Api::namespaced(client, namespace);
    create_only(&api, &desired).await
}
