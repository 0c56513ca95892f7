//! Cluster-write actions for each `InstallPlanAction` (`spec.md` §4.3
//! steps 3, 4, and the retention policy), mirroring the teacher's
//! `clusters::actions` split: one function per action, each performing
//! the single cluster write it implies.

use kube::api::ListParams;
use kube::{Api, Client};

use catalog_types::{AttenuatedServiceAccountRef, InstallPlan, InstallPlanPhase, OperatorGroup};

use crate::util::Error;

/// `spec.md` §4.3 step 3: resolve the namespace's OperatorGroup and pin
/// its designated service account (if any) into the plan.
pub async fn resolve_attenuated_service_account(
    client: Client,
    namespace: &str,
) -> Result<Option<AttenuatedServiceAccountRef>, Error> {
    let api: Api<OperatorGroup> = Api::namespaced(client, namespace);
    let groups = api.list(&ListParams::default()).await?;
    match groups.items.as_slice() {
        [] => Err(Error::NoOperatorGroup { namespace: namespace.to_string() }),
        [single] => Ok(single
            .spec
            .service_account_name
            .clone()
            .map(|name| AttenuatedServiceAccountRef { name, namespace: namespace.to_string() })),
        many => Err(Error::MultipleOperatorGroups {
            namespace: namespace.to_string(),
            names: many.iter().filter_map(|g| g.metadata.name.clone()).collect(),
        }),
    }
}

/// True when the namespace's OperatorGroup designates a service account,
/// used by `plan_action::decide` to decide whether step 3 still applies.
/// A missing/ambiguous OperatorGroup is treated as "no SA to resolve" here
/// — the dependent error still surfaces once `resolve_attenuated_service_account`
/// is actually invoked for a plan reaching that branch.
pub async fn operator_group_wants_service_account(client: Client, namespace: &str) -> bool {
    let api: Api<OperatorGroup> = Api::namespaced(client, namespace);
    match api.list(&ListParams::default()).await {
        Ok(groups) => match groups.items.as_slice() {
            [single] => single.spec.service_account_name.is_some(),
            _ => false,
        },
        Err(_) => false,
    }
}

/// `spec.md` §4.3 "Retention policy": delete the oldest completed/failed
/// plans owned by the same Subscription set once the count exceeds `cap`,
/// always preserving the plan with the highest `spec.generation`.
pub async fn enforce_retention(client: Client, namespace: &str, owned_by: &[String], cap: usize) -> Result<(), Error> {
    let api: Api<InstallPlan> = Api::namespaced(client, namespace);
    let all = api.list(&ListParams::default()).await?;

    let mut candidates: Vec<InstallPlan> = all
        .items
        .into_iter()
        .filter(|plan| {
            plan.status.as_ref().is_some_and(|s| s.phase.is_terminal())
                && plan
                    .metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|refs| refs.iter().any(|r| owned_by.contains(&r.name)))
        })
        .collect();

    if candidates.len() <= cap {
        return Ok(());
    }

    candidates.sort_by_key(|p| p.spec.generation);
    let max_generation = candidates.iter().map(|p| p.spec.generation).max().unwrap_or_default();
    let to_delete = candidates.len() - cap;

    let mut deleted = 0;
    for plan in candidates {
        if deleted >= to_delete {
            break;
        }
        if plan.spec.generation == max_generation {
            continue;
        }
        let Some(name) = plan.metadata.name.clone() else { continue };
        api.delete(&name, &Default::default()).await?;
        deleted += 1;
    }
    Ok(())
}

pub fn requires_approval_phase(approval_is_manual: bool) -> InstallPlanPhase {
    if approval_is_manual { InstallPlanPhase::RequiresApproval } else { InstallPlanPhase::Installing }
}
