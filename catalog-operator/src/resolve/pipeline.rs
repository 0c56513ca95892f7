//! The six free functions of `spec.md` §4.4's resolution pipeline, called
//! in order by [`super::resolve_namespace`]. Kept as plain
//! `kube::Api`-calling functions rather than behind a trait, mirroring
//! `installplan::actions`'s untested-at-unit-level convention — only the
//! pure helpers below (`manifest_fingerprint`, `should_short_circuit`) are
//! independently testable without a live cluster.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};

use catalog_registry_client::{Bundle, SourceQuerier};
use catalog_types::constants::{ANNOTATION_GENERATED_BY, CSV_GROUP, CSV_KIND, CSV_VERSION};
use catalog_types::{
    Approval, InstallPlan, InstallPlanPhase, InstallPlanSpec, InstallPlanStatus, OperatorGroup, Step, Subscription,
    SubscriptionState, SubscriptionStatus, operator_group::excludes_global_resolution,
};
use kube::api::DynamicObject;
use kube::core::{ApiResource, GroupVersionKind as KubeGvk};

use crate::resolver::{ResolveOutcome, Resolver};
use crate::source_store::SourceStore;
use crate::util::owner::non_blocking_owner_ref;
use crate::util::patch::{MANAGER_NAME, patch_status};
use crate::util::{Error, hash_spec};

pub struct Context {
    pub client: Client,
    pub global_namespace: String,
    pub source_store: Arc<SourceStore>,
    pub resolver: Arc<dyn Resolver>,
}

/// Runs steps 1-6 of `spec.md` §4.4 for one namespace. Returning `Ok(())`
/// early (no subscriptions, a short circuit, or a subscription status
/// change) is the normal "nothing more to do this sync" outcome, not an
/// error.
pub async fn resolve_namespace(ctx: &Context, namespace: &str) -> Result<(), Error> {
    let sub_api: Api<Subscription> = Api::namespaced(ctx.client.clone(), namespace);
    let mut subscriptions = sub_api.list(&ListParams::default()).await?.items;
    if subscriptions.is_empty() {
        return Ok(());
    }

    let queriers = enumerate_sources(ctx, namespace).await?;

    if reconcile_subscription_statuses(ctx, namespace, &mut subscriptions, &queriers).await? {
        return Ok(());
    }

    if should_short_circuit(&subscriptions) {
        return Ok(());
    }

    let outcome = match ctx.resolver.resolve(namespace, &queriers).await {
        Ok(outcome) => outcome,
        Err(Error::Unsatisfiable(reason)) => {
            mark_unsatisfiable(ctx, namespace, &subscriptions, &reason).await?;
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    if outcome.steps.is_empty() && outcome.bundle_lookups.is_empty() {
        return Ok(());
    }

    let subscription_names: Vec<String> = subscriptions.iter().filter_map(|s| s.metadata.name.clone()).collect();
    let manual = subscriptions.iter().any(|s| s.spec.approval == Approval::Manual);

    let (plan_ref, generation) = create_or_reuse_install_plan(ctx, namespace, &subscription_names, &outcome, manual).await?;
    stamp_subscriptions(ctx, namespace, &subscriptions, &outcome, &plan_ref, generation).await?;
    Ok(())
}

/// `spec.md` §4.4 step 1: the namespace's own OperatorGroup decides
/// whether resolution is scoped to the namespace alone (exclude-global)
/// or also draws from the global catalog namespace. Zero or multiple
/// OperatorGroups surfaces as an error here rather than crashing the
/// worker loop; the caller's retry/backoff is the "do not crash the
/// namespace sync" guarantee (`spec.md` §7).
async fn enumerate_sources(ctx: &Context, namespace: &str) -> Result<Vec<Arc<dyn SourceQuerier>>, Error> {
    let og_api: Api<OperatorGroup> = Api::namespaced(ctx.client.clone(), namespace);
    let groups = og_api.list(&ListParams::default()).await?;
    let exclude_global = match groups.items.as_slice() {
        [single] => excludes_global_resolution(&single.meta().annotations.clone().unwrap_or_default()),
        [] => return Err(Error::NoOperatorGroup { namespace: namespace.to_string() }),
        many => {
            return Err(Error::MultipleOperatorGroups {
                namespace: namespace.to_string(),
                names: many.iter().filter_map(|g| g.metadata.name.clone()).collect(),
            });
        }
    };

    let global_namespace = if exclude_global { namespace.to_string() } else { ctx.global_namespace.clone() };
    Ok(ctx.source_store.as_clients(None, namespace, &global_namespace).await)
}

/// `spec.md` §4.4 step 2: for each Subscription, adopt a generated
/// InstallPlan it doesn't yet reference, and refresh `currentCsv`'s
/// replacement-available state. Returns `true` if any Subscription's
/// status changed, signaling the caller to abort this iteration.
async fn reconcile_subscription_statuses(
    ctx: &Context,
    namespace: &str,
    subscriptions: &mut [Subscription],
    _queriers: &[Arc<dyn SourceQuerier>],
) -> Result<bool, Error> {
    let plan_api: Api<InstallPlan> = Api::namespaced(ctx.client.clone(), namespace);
    let mut any_changed = false;

    for sub in subscriptions.iter_mut() {
        let Some(name) = sub.metadata.name.clone() else { continue };
        let before = sub.status.clone().unwrap_or_default();
        let mut status = before.clone();

        if status.install_plan_ref.is_none() {
            if let Some(generated_by) = sub.meta().annotations.as_ref().and_then(|a| a.get(ANNOTATION_GENERATED_BY)) {
                if let Ok(plan) = plan_api.get(generated_by).await {
                    status.install_plan_ref = Some(format!("{namespace}/{generated_by}"));
                    status.install_plan_generation = plan.spec.generation;
                    status.state = SubscriptionState::UpgradePending;
                }
            }
        }

        if let Some(current_csv) = status.current_csv.clone() {
            match csv_api(ctx.client.clone(), namespace).get_opt(&current_csv).await {
                Ok(None) => status.state = SubscriptionState::UpgradePending,
                Ok(Some(_)) => {
                    let replacement_queriers = replacement_queriers(ctx, sub).await;
                    let replacement = find_replacement(&replacement_queriers, &current_csv, &sub.spec.package, &sub.spec.channel).await?;
                    status.state = if replacement.is_some() { SubscriptionState::UpgradeAvailable } else { SubscriptionState::AtLatest };
                }
                Err(err) => return Err(err.into()),
            }
        }

        if status != before {
            let current = Api::<Subscription>::namespaced(ctx.client.clone(), namespace).get(&name).await?;
            let patched = patch_status::<SubscriptionStatus, Subscription>(ctx.client.clone(), &current, |s| *s = status.clone()).await?;
            *sub = patched;
            any_changed = true;
        }
    }
    Ok(any_changed)
}

/// Queriers ordered with the Subscription's own declared `CatalogSource`
/// first (`spec.md` §4.1 ordering contract), used for the step-2
/// replacement check where one specific catalog is authoritative.
async fn replacement_queriers(ctx: &Context, sub: &Subscription) -> Vec<Arc<dyn SourceQuerier>> {
    let declared = crate::source_store::SourceKey::new(sub.spec.catalog_source_namespace.clone(), sub.spec.catalog_source.clone());
    let namespace = sub.metadata.namespace.clone().unwrap_or_default();
    ctx.source_store.as_clients(Some(&declared), &namespace, &ctx.global_namespace).await
}

async fn find_replacement(
    queriers: &[Arc<dyn SourceQuerier>],
    current_csv: &str,
    package: &str,
    channel: &str,
) -> Result<Option<Bundle>, Error> {
    for querier in queriers {
        match querier.get_replacement_bundle_in_package_channel(current_csv, package, channel).await {
            Ok(Some(bundle)) => return Ok(Some(bundle)),
            Ok(None) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

/// `spec.md` §4.4 step 3: short-circuit once every Subscription already
/// has a plan pending, or every Subscription is at-latest. The "no new
/// catalog update since last sync" half of the at-latest clause is
/// approximated by the per-Subscription state alone (`DESIGN.md` open
/// question: no separate catalog-update-epoch is tracked).
fn should_short_circuit(subscriptions: &[Subscription]) -> bool {
    let all_pending_with_plan = subscriptions.iter().all(|s| {
        s.status.as_ref().is_some_and(|status| status.install_plan_ref.is_some() && status.state == SubscriptionState::UpgradePending)
    });
    let all_at_latest = subscriptions.iter().all(|s| s.status.as_ref().is_some_and(|status| status.state == SubscriptionState::AtLatest));
    all_pending_with_plan || all_at_latest
}

async fn mark_unsatisfiable(ctx: &Context, namespace: &str, subscriptions: &[Subscription], reason: &str) -> Result<(), Error> {
    let sub_api: Api<Subscription> = Api::namespaced(ctx.client.clone(), namespace);
    for sub in subscriptions {
        let Some(name) = sub.metadata.name.clone() else { continue };
        let current = sub_api.get(&name).await?;
        patch_status::<SubscriptionStatus, Subscription>(ctx.client.clone(), &current, |s| {
            catalog_types::conditions::set_condition(&mut s.conditions, "Resolved", false, "ResolutionFailed", reason.to_string());
        })
        .await?;
    }
    Ok(())
}

/// `spec.md` §4.4 step 5: reuse an owned InstallPlan whose step set
/// fingerprints the same as the freshly resolved one (adding any missing
/// Subscription owners), else create a new one at `max(generation) + 1`.
/// Returns the plan's `namespace/name` reference and its generation.
async fn create_or_reuse_install_plan(
    ctx: &Context,
    namespace: &str,
    subscription_names: &[String],
    outcome: &ResolveOutcome,
    manual: bool,
) -> Result<(String, i64), Error> {
    let plan_api: Api<InstallPlan> = Api::namespaced(ctx.client.clone(), namespace);
    let sub_api: Api<Subscription> = Api::namespaced(ctx.client.clone(), namespace);

    let owned: Vec<InstallPlan> = plan_api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|plan| owned_by_any(plan, subscription_names))
        .collect();

    let new_fingerprint = manifest_fingerprint(&outcome.steps);
    let phase = if manual { InstallPlanPhase::RequiresApproval } else { InstallPlanPhase::Installing };

    if let Some(matched) = owned.iter().find(|plan| manifest_fingerprint(&plan.status.clone().unwrap_or_default().plan) == new_fingerprint) {
        for sub_name in subscription_names {
            if crate::util::owner::has_owner(&matched.metadata, "Subscription", sub_name) {
                continue;
            }
            if let Ok(sub) = sub_api.get(sub_name).await {
                if let Some(owner_ref) = non_blocking_owner_ref(&sub) {
                    add_owner_reference(ctx.client.clone(), matched, owner_ref).await?;
                }
            }
        }
        patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), matched, |s| {
            for step in s.plan.iter_mut() {
                step.status = catalog_types::StepStatus::Unknown;
            }
            s.phase = phase;
        })
        .await?;
        let name = matched.metadata.name.clone().expect("listed plan has a name");
        return Ok((format!("{namespace}/{name}"), matched.spec.generation));
    }

    let max_generation = owned.iter().map(|plan| plan.spec.generation).max().unwrap_or(0);
    let generation = max_generation + 1;
    let name = format!("install-{namespace}-{generation}");

    let mut owner_refs = Vec::new();
    for sub_name in subscription_names {
        if let Ok(sub) = sub_api.get(sub_name).await {
            if let Some(owner_ref) = non_blocking_owner_ref(&sub) {
                owner_refs.push(owner_ref);
            }
        }
    }

    let csv_names: Vec<String> = outcome.steps.iter().map(|s| s.resolving.clone()).collect::<HashSet<_>>().into_iter().collect();
    let catalog_sources: Vec<String> = outcome.steps.iter().map(|s| s.resource.catalog_source.clone()).collect::<HashSet<_>>().into_iter().collect();

    let plan = InstallPlan {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(owner_refs),
            ..Default::default()
        },
        spec: InstallPlanSpec {
            cluster_service_version_names: csv_names,
            approval: if manual { Approval::Manual } else { Approval::Automatic },
            approved: !manual,
            generation,
        },
        status: None,
    };
    let created = plan_api.create(&PostParams::default(), &plan).await?;
    patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &created, |s| {
        s.phase = phase;
        s.plan = outcome.steps.clone();
        s.bundle_lookups = outcome.bundle_lookups.clone();
        s.catalog_sources = catalog_sources.clone();
    })
    .await?;
    Ok((format!("{namespace}/{name}"), generation))
}

fn owned_by_any(plan: &InstallPlan, subscription_names: &[String]) -> bool {
    plan.metadata.owner_references.as_ref().is_some_and(|refs| refs.iter().any(|r| subscription_names.contains(&r.name)))
}

fn manifest_fingerprint(steps: &[Step]) -> BTreeSet<(String, String)> {
    steps.iter().map(|s| (s.resolving.clone(), hash_spec(&s.resource.manifest))).collect()
}

async fn add_owner_reference(client: Client, plan: &InstallPlan, owner_ref: k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference) -> Result<(), Error> {
    let namespace = plan.meta().namespace.clone().ok_or_else(|| Error::Invariant("InstallPlan missing namespace".into()))?;
    let name = plan.meta().name.clone().ok_or_else(|| Error::Invariant("InstallPlan missing name".into()))?;
    let mut refs = plan.metadata.owner_references.clone().unwrap_or_default();
    if refs.iter().any(|r| r.uid == owner_ref.uid) {
        return Ok(());
    }
    refs.push(owner_ref);
    let patch = serde_json::json!({ "metadata": { "ownerReferences": refs } });
    let api: Api<InstallPlan> = Api::namespaced(client, &namespace);
    api.patch(&name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(patch)).await?;
    Ok(())
}

/// `spec.md` §4.4 step 6: stamp every touched Subscription's status with
/// the plan reference, generation, and upgrade-pending state, layering in
/// whatever the resolver itself updated (e.g. `currentCsv`).
async fn stamp_subscriptions(
    ctx: &Context,
    namespace: &str,
    subscriptions: &[Subscription],
    outcome: &ResolveOutcome,
    plan_ref: &str,
    generation: i64,
) -> Result<(), Error> {
    let sub_api: Api<Subscription> = Api::namespaced(ctx.client.clone(), namespace);
    for sub in subscriptions {
        let Some(name) = sub.metadata.name.clone() else { continue };
        let resolver_update = outcome.updated_subscriptions.iter().find(|u| u.metadata.name.as_deref() == Some(name.as_str()));
        let current = sub_api.get(&name).await?;
        patch_status::<SubscriptionStatus, Subscription>(ctx.client.clone(), &current, |s| {
            if let Some(updated_status) = resolver_update.and_then(|u| u.status.clone()) {
                if let Some(csv) = updated_status.current_csv {
                    s.current_csv = Some(csv);
                }
            }
            s.install_plan_ref = Some(plan_ref.to_string());
            s.install_plan_generation = generation;
            s.state = SubscriptionState::UpgradePending;
        })
        .await?;
    }
    Ok(())
}

fn csv_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    let gvk = KubeGvk::gvk(CSV_GROUP, CSV_VERSION, CSV_KIND);
    let api_resource = ApiResource::from_gvk_with_plural(&gvk, "clusterserviceversions");
    Api::namespaced_with(client, namespace, &api_resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_types::{StepResource, SubscriptionSpec};

    fn sub_with(status: Option<SubscriptionStatus>) -> Subscription {
        Subscription {
            metadata: Default::default(),
            spec: SubscriptionSpec {
                catalog_source: "src".into(),
                catalog_source_namespace: "olm".into(),
                package: "p".into(),
                channel: "c".into(),
                approval: Default::default(),
                starting_csv: None,
            },
            status,
        }
    }

    #[test]
    fn short_circuit_when_every_subscription_is_pending_with_a_plan() {
        let subs = vec![sub_with(Some(SubscriptionStatus {
            install_plan_ref: Some("ns/plan".into()),
            state: SubscriptionState::UpgradePending,
            ..Default::default()
        }))];
        assert!(should_short_circuit(&subs));
    }

    #[test]
    fn short_circuit_when_every_subscription_is_at_latest() {
        let subs = vec![sub_with(Some(SubscriptionStatus { state: SubscriptionState::AtLatest, ..Default::default() }))];
        assert!(should_short_circuit(&subs));
    }

    #[test]
    fn no_short_circuit_when_a_subscription_has_no_status_yet() {
        let subs = vec![sub_with(None)];
        assert!(!should_short_circuit(&subs));
    }

    #[test]
    fn no_short_circuit_on_mixed_states() {
        let subs = vec![
            sub_with(Some(SubscriptionStatus { state: SubscriptionState::AtLatest, ..Default::default() })),
            sub_with(Some(SubscriptionStatus { state: SubscriptionState::UpgradeAvailable, ..Default::default() })),
        ];
        assert!(!should_short_circuit(&subs));
    }

    fn step(csv: &str, manifest: &str) -> Step {
        Step {
            resolving: csv.into(),
            resource: StepResource { manifest: manifest.into(), ..Default::default() },
            status: Default::default(),
        }
    }

    #[test]
    fn manifest_fingerprint_is_order_independent() {
        let a = vec![step("csv.v1", "{}"), step("csv.v2", "{\"x\":1}")];
        let b = vec![step("csv.v2", "{\"x\":1}"), step("csv.v1", "{}")];
        assert_eq!(manifest_fingerprint(&a), manifest_fingerprint(&b));
    }

    #[test]
    fn manifest_fingerprint_differs_on_manifest_change() {
        let a = vec![step("csv.v1", "{}")];
        let b = vec![step("csv.v1", "{\"x\":1}")];
        assert_ne!(manifest_fingerprint(&a), manifest_fingerprint(&b));
    }
}
