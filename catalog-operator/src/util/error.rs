use catalog_registry_client::ClientError;

/// Top-level error type for every sync handler (`SPEC_FULL.md` §7): every
/// handler returns `Result<Action, Error>`, and the worker loop's
/// `on_error` always converts an `Err` into a requeue `Action` — no sync
/// handler panics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes API error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("semver error: {source}")]
    Semver {
        #[from]
        source: semver::Error,
    },

    #[error("registry rpc error: {source}")]
    Registry {
        #[from]
        source: ClientError,
    },

    #[error("resolution is unsatisfiable: {0}")]
    Unsatisfiable(String),

    #[error("no OperatorGroup in namespace {namespace}")]
    NoOperatorGroup { namespace: String },

    #[error("multiple OperatorGroups in namespace {namespace}: {names:?}")]
    MultipleOperatorGroups { namespace: String, names: Vec<String> },

    #[error("manifest targets a deprecated GroupVersion {gv}; update the bundle to a supported API")]
    DeprecatedGroupVersion { gv: String },

    #[error("CRD {crd} is already owned by {existing_owner}; cannot also be owned by {new_owner}")]
    CompetingCrdOwner {
        crd: String,
        existing_owner: String,
        new_owner: String,
    },

    #[error("unsupported resource kind: {group}/{version} {kind}")]
    UnsupportedKind { group: String, version: String, kind: String },

    #[error("CRD schema validation failed for {crd}: {reason}")]
    CrdValidation { crd: String, reason: String },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Error-kind classification (`spec.md` §7's table), used by worker loops
/// to pick a backoff duration without matching every leaf `Error` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Conflict, timeout, 5xx: drop this sync, requeue with backoff.
    TransientApi,
    /// Fails the individual step/plan; surfaced as a status condition.
    Validation,
    /// Fails the plan outright with an explicit user-facing message.
    Deprecated,
    /// Do not retry tightly; status already recorded for the user.
    Unsatisfiable,
    /// Fails the dependent InstallPlan with an explanatory condition.
    MissingOperatorGroup,
    /// Fails the plan, naming the competing owners.
    CompetingOwner,
    /// An assertion the state machine expects never to fail; recorded and
    /// requeued rather than panicking.
    Invariant,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { .. } => ErrorKind::TransientApi,
            Error::Json { .. } | Error::CrdValidation { .. } => ErrorKind::Validation,
            Error::DeprecatedGroupVersion { .. } => ErrorKind::Deprecated,
            Error::Unsatisfiable(_) => ErrorKind::Unsatisfiable,
            Error::NoOperatorGroup { .. } | Error::MultipleOperatorGroups { .. } => ErrorKind::MissingOperatorGroup,
            Error::CompetingCrdOwner { .. } => ErrorKind::CompetingOwner,
            Error::Invariant(_) => ErrorKind::Invariant,
            Error::UserInput(_) | Error::Semver { .. } | Error::Registry { .. } | Error::UnsupportedKind { .. } => {
                ErrorKind::TransientApi
            }
        }
    }
}

/// True for a 404 Not Found, the signal C2's create-or-update algorithm
/// treats as "take the create branch" (`spec.md` §4.2 step 3).
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when create failed because the object is already there
/// (`spec.md` §4.2 step 3).
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// True for a 409 Conflict on an update (stale resource-version), the
/// optimistic-concurrency signal that drops the attempt for the next sync
/// to converge (`spec.md` §3, §5).
pub fn is_update_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason != "AlreadyExists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfiable_is_not_retried_tightly() {
        let err = Error::Unsatisfiable("no candidates".into());
        assert_eq!(err.kind(), ErrorKind::Unsatisfiable);
    }

    #[test]
    fn deprecated_gv_is_its_own_kind() {
        let err = Error::DeprecatedGroupVersion { gv: "rbac.authorization.k8s.io/v1beta1".into() };
        assert_eq!(err.kind(), ErrorKind::Deprecated);
    }
}
