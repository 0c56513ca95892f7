//! The resolver is an external collaborator, out of process (`spec.md`
//! §1 "Out of scope", §4.4 step 4): C4 only consumes it through this
//! trait, modeled the same way `installplan::unpacker::BundleUnpacker`
//! is — a trait plus a `NullResolver` default and a deterministic
//! `test_support::StubResolver`.

use std::sync::Arc;

use async_trait::async_trait;

use catalog_registry_client::SourceQuerier;
use catalog_types::{BundleLookup, Step, Subscription};

use crate::util::Error;

/// `spec.md` §4.4 step 4: the resolver's full output for one namespace.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub steps: Vec<Step>,
    pub bundle_lookups: Vec<BundleLookup>,
    pub updated_subscriptions: Vec<Subscription>,
}

/// One method matching `spec.md` §4.4 step 4 verbatim: `(namespace,
/// queriers) -> (steps, bundleLookups, updatedSubscriptions, error)`.
/// The error leg is the `Result`'s `Err` side; an `Error::Unsatisfiable`
/// is the one kind the caller treats specially (recorded as a condition
/// on every Subscription rather than retried tightly, `spec.md` §7).
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, namespace: &str, queriers: &[Arc<dyn SourceQuerier>]) -> Result<ResolveOutcome, Error>;
}

/// Always reports the namespace unsatisfiable; keeps the coordinator
/// runnable standalone until a production resolver is wired in.
pub struct NullResolver;

#[async_trait]
impl Resolver for NullResolver {
    async fn resolve(&self, _namespace: &str, _queriers: &[Arc<dyn SourceQuerier>]) -> Result<ResolveOutcome, Error> {
        Err(Error::Unsatisfiable("no resolver configured".to_string()))
    }
}

pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct StubResolver {
        outcomes: Mutex<HashMap<String, Result<ResolveOutcome, String>>>,
    }

    impl StubResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_outcome(self, namespace: &str, outcome: ResolveOutcome) -> Self {
            self.outcomes.lock().unwrap().insert(namespace.to_string(), Ok(outcome));
            self
        }

        pub fn with_unsatisfiable(self, namespace: &str, reason: &str) -> Self {
            self.outcomes.lock().unwrap().insert(namespace.to_string(), Err(reason.to_string()));
            self
        }
    }

    #[async_trait]
    impl Resolver for StubResolver {
        async fn resolve(&self, namespace: &str, _queriers: &[Arc<dyn SourceQuerier>]) -> Result<ResolveOutcome, Error> {
            match self.outcomes.lock().unwrap().get(namespace) {
                Some(Ok(outcome)) => Ok(outcome.clone()),
                Some(Err(reason)) => Err(Error::Unsatisfiable(reason.clone())),
                None => Err(Error::Unsatisfiable(format!("no stubbed outcome for namespace {namespace}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubResolver;
    use super::*;

    #[tokio::test]
    async fn null_resolver_is_always_unsatisfiable() {
        let err = NullResolver.resolve("ns", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unsatisfiable(_)));
    }

    #[tokio::test]
    async fn stub_resolver_replays_configured_outcome() {
        let outcome = ResolveOutcome { steps: vec![Step::default()], ..Default::default() };
        let resolver = StubResolver::new().with_outcome("ns", outcome.clone());
        let result = resolver.resolve("ns", &[]).await.unwrap();
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn stub_resolver_replays_configured_unsatisfiable_error() {
        let resolver = StubResolver::new().with_unsatisfiable("ns", "no candidates");
        let err = resolver.resolve("ns", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unsatisfiable(_)));
    }
}
