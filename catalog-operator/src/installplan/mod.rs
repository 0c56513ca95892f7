//! C3 InstallPlan Transitioner (`spec.md` §4.3): a `kube::runtime::
//! Controller<InstallPlan>` loop generalized from the teacher's
//! `storage_operator::clusters::reconcile::run`. Per-sync steps map onto
//! `plan_action::decide` (pure decision) dispatched to `actions`/
//! `execute` (the single cluster write each action implies).

pub mod actions;
pub mod execute;
pub mod plan_action;
pub mod unpacker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DynamicObject, ListParams};
use kube::core::{ApiResource, GroupVersionKind as KubeGvk};
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::{Api, Client};
use tracing::{info, warn};

use catalog_types::constants::{CSV_GROUP, CSV_KIND, CSV_VERSION};
use catalog_types::{InstallPlan, InstallPlanPhase, InstallPlanStatus};

use crate::ensure::unstructured::GroupVersionKind;
use crate::util::patch::patch_status;
use crate::util::{Error, PROBE_INTERVAL, SHORT_REQUEUE};

use execute::{ClusterStepEnsurer, StepEnsurer, execute_plan};
use plan_action::{InstallPlanAction, decide};
use unpacker::{BundleUnpacker, NullUnpacker, unpack_bundles};

pub struct Context {
    pub client: Client,
    pub retention_cap: usize,
    pub ensurer: Arc<dyn StepEnsurer>,
    pub unpacker: Arc<dyn BundleUnpacker>,
}

pub async fn run(client: Client, retention_cap: usize, allowlist: HashSet<GroupVersionKind>) {
    let ctx = Arc::new(Context {
        client: client.clone(),
        retention_cap,
        ensurer: Arc::new(ClusterStepEnsurer { client: client.clone(), allowlist }),
        unpacker: Arc::new(NullUnpacker),
    });

    let api: Api<InstallPlan> = Api::all(client);
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, on_error, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => info!(installplan = %obj.name, "installplan synced"),
                Err(err) => warn!(error = %err, "installplan reconcile failed"),
            }
        })
        .await;
}

fn on_error(_plan: Arc<InstallPlan>, err: &Error, _ctx: Arc<Context>) -> Action {
    use crate::util::ErrorKind;
    match err.kind() {
        ErrorKind::TransientApi => Action::requeue(Duration::from_secs(5)),
        ErrorKind::Unsatisfiable | ErrorKind::Deprecated | ErrorKind::CompetingOwner => Action::requeue(PROBE_INTERVAL),
        _ => Action::requeue(Duration::from_secs(15)),
    }
}

async fn reconcile(plan: Arc<InstallPlan>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = plan.metadata.namespace.clone().ok_or_else(|| Error::Invariant("InstallPlan missing namespace".into()))?;
    let wants_sa = actions::operator_group_wants_service_account(ctx.client.clone(), &namespace).await;

    match decide(&plan, wants_sa) {
        InstallPlanAction::WaitForResolution | InstallPlanAction::Noop | InstallPlanAction::AwaitApproval => {
            Ok(Action::requeue(PROBE_INTERVAL))
        }
        InstallPlanAction::UnpackBundles => unpack(ctx, plan).await,
        InstallPlanAction::ResolveAttenuatedServiceAccount => resolve_sa(ctx, plan, &namespace).await,
        InstallPlanAction::ApproveAndTransition => {
            patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &plan, |s| s.phase = InstallPlanPhase::Installing).await?;
            enforce_retention(&ctx, &plan, &namespace).await;
            Ok(Action::requeue(Duration::ZERO))
        }
        InstallPlanAction::Execute => execute(ctx, plan, &namespace).await,
    }
}

async fn unpack(ctx: Arc<Context>, plan: Arc<InstallPlan>) -> Result<Action, Error> {
    let status = plan.status.clone().unwrap_or_default();
    let (remaining, unpacked) = unpack_bundles(ctx.unpacker.as_ref(), status.bundle_lookups).await?;
    let all_done = remaining.is_empty();
    patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &plan, |s| {
        s.bundle_lookups = remaining.clone();
        s.plan.extend(unpacked.clone());
    })
    .await?;
    Ok(if all_done { Action::requeue(Duration::ZERO) } else { Action::requeue(SHORT_REQUEUE) })
}

async fn resolve_sa(ctx: Arc<Context>, plan: Arc<InstallPlan>, namespace: &str) -> Result<Action, Error> {
    let sa_ref = actions::resolve_attenuated_service_account(ctx.client.clone(), namespace).await?;
    patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &plan, |s| s.attenuated_service_account_ref = sa_ref.clone()).await?;
    Ok(Action::requeue(Duration::ZERO))
}

async fn execute(ctx: Arc<Context>, plan: Arc<InstallPlan>, namespace: &str) -> Result<Action, Error> {
    let status = plan.status.clone().unwrap_or_default();
    let mut steps = status.plan.clone();
    let plan_csv_names: HashSet<String> = plan.spec.cluster_service_version_names.iter().cloned().collect();

    let csv_uids = build_csv_uid_index(ctx.client.clone(), namespace).await;
    let competing_crd_owners = build_competing_crd_owners(ctx.client.clone(), namespace).await;
    let crd_established = build_crd_established_index(ctx.client.clone()).await;

    match execute_plan(namespace, &plan_csv_names, &mut steps, &csv_uids, &competing_crd_owners, &crd_established, ctx.ensurer.as_ref()).await {
        Ok(()) => {
            let all_converged = !steps.is_empty() && steps.iter().all(|s| s.status.is_converged());
            patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &plan, |s| {
                s.plan = steps.clone();
                if all_converged {
                    s.phase = InstallPlanPhase::Complete;
                    catalog_types::conditions::set_condition(&mut s.conditions, "Installed", true, "InstallSucceeded", "all steps converged");
                }
            })
            .await?;
            if all_converged {
                enforce_retention(&ctx, &plan, namespace).await;
                Ok(Action::requeue(PROBE_INTERVAL))
            } else {
                Ok(Action::requeue(SHORT_REQUEUE))
            }
        }
        Err(err) => {
            let message = err.to_string();
            // Status write for a failure is best effort (`spec.md` §7):
            // if it also fails, the original error still requeues.
            let _ = patch_status::<InstallPlanStatus, InstallPlan>(ctx.client.clone(), &plan, |s| {
                s.plan = steps.clone();
                s.phase = InstallPlanPhase::Failed;
                catalog_types::conditions::set_condition(&mut s.conditions, "Installed", false, "InstallComponentFailed", message.clone());
            })
            .await;
            Ok(Action::requeue(PROBE_INTERVAL))
        }
    }
}

async fn enforce_retention(ctx: &Arc<Context>, plan: &InstallPlan, namespace: &str) {
    let owned_by: Vec<String> = plan
        .metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().map(|r| r.name.clone()).collect())
        .unwrap_or_default();
    if owned_by.is_empty() {
        return;
    }
    if let Err(err) = actions::enforce_retention(ctx.client.clone(), namespace, &owned_by, ctx.retention_cap).await {
        warn!(%namespace, error = %err, "installplan retention enforcement failed");
    }
}

fn csv_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    let gvk = KubeGvk::gvk(CSV_GROUP, CSV_VERSION, CSV_KIND);
    let api_resource = ApiResource::from_gvk_with_plural(&gvk, "clusterserviceversions");
    Api::namespaced_with(client, namespace, &api_resource)
}

async fn build_csv_uid_index(client: Client, namespace: &str) -> HashMap<String, String> {
    match csv_api(client, namespace).list(&ListParams::default()).await {
        Ok(list) => list.items.into_iter().filter_map(|csv| Some((csv.metadata.name?, csv.metadata.uid?))).collect(),
        Err(_) => HashMap::new(),
    }
}

/// `spec.md` §3 "CSV ownership for CRDs": maps a CRD name already present
/// in the namespace to the CSV that currently owns it, read from each
/// CSV's `spec.customresourcedefinitions.owned` list.
async fn build_competing_crd_owners(client: Client, namespace: &str) -> HashMap<String, String> {
    let mut owners = HashMap::new();
    let Ok(list) = csv_api(client, namespace).list(&ListParams::default()).await else { return owners };
    for csv in list.items {
        let Some(name) = csv.metadata.name.clone() else { continue };
        let owned = csv.data.pointer("/spec/customresourcedefinitions/owned").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        for crd in owned {
            if let Some(crd_name) = crd.get("name").and_then(|n| n.as_str()) {
                owners.entry(crd_name.to_string()).or_insert_with(|| name.clone());
            }
        }
    }
    owners
}

async fn build_crd_established_index(client: Client) -> HashMap<String, bool> {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    match api.list(&ListParams::default()).await {
        Ok(list) => list
            .items
            .into_iter()
            .filter_map(|crd| {
                let name = crd.metadata.name.clone()?;
                let conditions = crd.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
                let established = conditions.iter().flatten().any(|c| c.type_ == "Established" && c.status == "True");
                let names_accepted = conditions.iter().flatten().any(|c| c.type_ == "NamesAccepted" && c.status == "True");
                Some((name, established && names_accepted))
            })
            .collect(),
        Err(_) => HashMap::new(),
    }
}
