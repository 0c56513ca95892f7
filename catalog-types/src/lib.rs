//! CRD types and wire-stable enums/constants shared by every catalog
//! operator component. Kept dependency-light (`kube`, `k8s-openapi`,
//! `schemars`, `serde`, `strum`) so it can be pulled in by the registry
//! client and by tooling (`dump_crds`) without the rest of the reconciler
//! stack.

pub mod catalog_source;
pub mod conditions;
pub mod constants;
pub mod install_plan;
pub mod operator_group;
pub mod subscription;

pub use catalog_source::{CatalogSource, CatalogSourceSpec, CatalogSourceStatus, ConnectionState, SourceType};
pub use install_plan::{
    AttenuatedServiceAccountRef, BundleLookup, InstallPlan, InstallPlanPhase, InstallPlanSpec, InstallPlanStatus, Step,
    StepResource, StepStatus,
};
pub use operator_group::{OperatorGroup, OperatorGroupSpec};
pub use subscription::{Approval, CatalogSourceRef, Subscription, SubscriptionSpec, SubscriptionState, SubscriptionStatus};
