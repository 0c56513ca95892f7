//! The pure decision function for one InstallPlan sync, mirroring the
//! teacher's `clusters::planner::determine_action` split: a
//! `decide`/`ClusterAction`-style function with no I/O, dispatched by
//! `installplan::mod::reconcile` to the matching `actions`/`execute`
//! function (`spec.md` §4.3, `SPEC_FULL.md` §4.3).

use catalog_types::{InstallPlan, InstallPlanPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPlanAction {
    /// Step 1: `status.plan` and `status.bundleLookups` are both empty but
    /// the phase has already moved past `none` — the resolution loop
    /// hasn't populated this plan yet.
    WaitForResolution,
    /// Step 2: at least one `BundleLookup` is still outstanding.
    UnpackBundles,
    /// Step 3: the namespace's OperatorGroup designates a service account
    /// this plan hasn't pinned into status yet.
    ResolveAttenuatedServiceAccount,
    /// Step 4, `requires-approval` with `spec.approved == false`.
    AwaitApproval,
    /// Step 4, `requires-approval` -> `installing` on `spec.approved`.
    ApproveAndTransition,
    /// Step 4, `installing`: invoke ExecutePlan.
    Execute,
    /// `none`, `complete`, `failed`, or nothing left to do this sync.
    Noop,
}

/// `operator_group_wants_service_account` is resolved by the caller from
/// the namespace's OperatorGroup (an I/O read) and passed in so this
/// function stays pure.
pub fn decide(plan: &InstallPlan, operator_group_wants_service_account: bool) -> InstallPlanAction {
    let status = plan.status.clone().unwrap_or_default();

    if status.is_empty_plan() && status.phase != InstallPlanPhase::None {
        return InstallPlanAction::WaitForResolution;
    }
    if !status.bundle_lookups.is_empty() {
        return InstallPlanAction::UnpackBundles;
    }
    if operator_group_wants_service_account && status.attenuated_service_account_ref.is_none() {
        return InstallPlanAction::ResolveAttenuatedServiceAccount;
    }

    match status.phase {
        InstallPlanPhase::RequiresApproval => {
            if plan.spec.approved {
                InstallPlanAction::ApproveAndTransition
            } else {
                InstallPlanAction::AwaitApproval
            }
        }
        InstallPlanPhase::Installing => InstallPlanAction::Execute,
        _ => InstallPlanAction::Noop,
    }
}

#[cfg(test)]
mod tests {
    use catalog_types::{InstallPlanSpec, InstallPlanStatus, Step};

    use super::*;

    fn plan_with(status: InstallPlanStatus, approved: bool) -> InstallPlan {
        InstallPlan {
            metadata: Default::default(),
            spec: InstallPlanSpec { approved, ..Default::default() },
            status: Some(status),
        }
    }

    #[test]
    fn empty_plan_past_none_waits_for_resolution() {
        let plan = plan_with(InstallPlanStatus { phase: InstallPlanPhase::Installing, ..Default::default() }, false);
        assert_eq!(decide(&plan, false), InstallPlanAction::WaitForResolution);
    }

    #[test]
    fn pending_bundle_lookup_takes_priority_over_transition() {
        let plan = plan_with(
            InstallPlanStatus {
                phase: InstallPlanPhase::Installing,
                bundle_lookups: vec![Default::default()],
                plan: vec![Step::default()],
                ..Default::default()
            },
            true,
        );
        assert_eq!(decide(&plan, false), InstallPlanAction::UnpackBundles);
    }

    #[test]
    fn requires_approval_without_approved_flag_waits() {
        let plan = plan_with(
            InstallPlanStatus { phase: InstallPlanPhase::RequiresApproval, plan: vec![Step::default()], ..Default::default() },
            false,
        );
        assert_eq!(decide(&plan, false), InstallPlanAction::AwaitApproval);
    }

    #[test]
    fn requires_approval_with_approved_flag_transitions() {
        let plan = plan_with(
            InstallPlanStatus { phase: InstallPlanPhase::RequiresApproval, plan: vec![Step::default()], ..Default::default() },
            true,
        );
        assert_eq!(decide(&plan, true), InstallPlanAction::ApproveAndTransition);
    }

    #[test]
    fn installing_with_no_pending_lookups_executes() {
        let plan = plan_with(
            InstallPlanStatus { phase: InstallPlanPhase::Installing, plan: vec![Step::default()], ..Default::default() },
            true,
        );
        assert_eq!(decide(&plan, false), InstallPlanAction::Execute);
    }

    #[test]
    fn complete_phase_is_a_noop() {
        let plan = plan_with(
            InstallPlanStatus { phase: InstallPlanPhase::Complete, plan: vec![Step::default()], ..Default::default() },
            true,
        );
        assert_eq!(decide(&plan, false), InstallPlanAction::Noop);
    }

    #[test]
    fn missing_attenuated_service_account_takes_priority_over_execute() {
        let plan = plan_with(
            InstallPlanStatus { phase: InstallPlanPhase::Installing, plan: vec![Step::default()], ..Default::default() },
            true,
        );
        assert_eq!(decide(&plan, true), InstallPlanAction::ResolveAttenuatedServiceAccount);
    }
}
