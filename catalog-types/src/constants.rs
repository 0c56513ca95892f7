//! Stable annotation keys and group/version strings recognized by the operator.
//!
//! These are a wire contract (`spec.md` §6): the string values must not
//! change independently of a deliberate API version bump.

/// API group shared by all three CRDs.
pub const GROUP: &str = "operators.example";

/// API version shared by all three CRDs.
pub const VERSION: &str = "v1alpha1";

/// Set on an OperatorGroup to restrict resolution to its own namespace.
pub const ANNOTATION_EXCLUDE_GLOBAL_RESOLUTION: &str =
    "olm.operatorframework.io/exclude-global-namespace-resolution";

/// Set on a Subscription created as a side effect of an InstallPlan step,
/// naming the InstallPlan that generated it. Used for adoption.
pub const ANNOTATION_GENERATED_BY: &str = "olm.generated-by";

/// Set on a ClusterServiceVersion, naming a semver range from which an
/// upgrade may skip directly to this CSV.
pub const ANNOTATION_SKIP_RANGE: &str = "olm.skipRange";

/// Non-authoritative back-reference set on CRDs, used during cleanup.
pub const ANNOTATION_INSTALLED_ALONGSIDE: &str = "olm.installedAlongside";

/// Deprecated group/version pairs. A Step whose manifest targets one of
/// these fails the plan outright (`spec.md` §4.3, §7).
pub const DEPRECATED_GROUP_VERSIONS: &[&str] = &[
    "admissionregistration.k8s.io/v1beta1",
    "apiextensions.k8s.io/v1beta1",
    "apiregistration.k8s.io/v1beta1",
    "rbac.authorization.k8s.io/v1beta1",
    "scheduling.k8s.io/v1beta1",
];

pub fn is_deprecated_group_version(api_version: &str) -> bool {
    DEPRECATED_GROUP_VERSIONS.contains(&api_version)
}

/// GVK of the out-of-repo `ClusterServiceVersion` kind this operator
/// creates but never defines (`spec.md` §1 scope). Addressed as a
/// `DynamicObject` everywhere it's read or written.
pub const CSV_GROUP: &str = "operators.coreos.com";
pub const CSV_VERSION: &str = "v1alpha1";
pub const CSV_KIND: &str = "ClusterServiceVersion";
