//! The bundle unpacker is, like the `Resolver`, an external collaborator
//! C3 only consumes (`spec.md` §4.3 step 2): given a pending
//! `BundleLookup`, it reports either "still working" or a concrete set of
//! `Step`s to splice into the plan. Modeled the same way as
//! `crate::resolver::Resolver` — a trait plus a `NullUnpacker` default and
//! a deterministic `test_support::StubUnpacker`.

use async_trait::async_trait;

use catalog_types::{BundleLookup, Step};

use crate::util::Error;

#[derive(Debug, Clone)]
pub enum UnpackProgress {
    Pending,
    Done(Vec<Step>),
}

#[async_trait]
pub trait BundleUnpacker: Send + Sync {
    async fn progress(&self, lookup: &BundleLookup) -> Result<UnpackProgress, Error>;
}

/// Never completes; keeps the plan at `installing` with pending
/// `bundleLookups` until a real unpacker is wired in.
pub struct NullUnpacker;

#[async_trait]
impl BundleUnpacker for NullUnpacker {
    async fn progress(&self, _lookup: &BundleLookup) -> Result<UnpackProgress, Error> {
        Ok(UnpackProgress::Pending)
    }
}

/// Drains `status.bundleLookups`, replacing resolved ones with their
/// unpacked steps. Returns `true` once nothing remains pending
/// (`spec.md` §4.3 step 2).
pub async fn unpack_bundles(
    unpacker: &dyn BundleUnpacker,
    lookups: Vec<BundleLookup>,
) -> Result<(Vec<BundleLookup>, Vec<Step>), Error> {
    let mut remaining = Vec::new();
    let mut unpacked_steps = Vec::new();
    for lookup in lookups {
        match unpacker.progress(&lookup).await? {
            UnpackProgress::Done(steps) => unpacked_steps.extend(steps),
            UnpackProgress::Pending => remaining.push(lookup),
        }
    }
    Ok((remaining, unpacked_steps))
}

pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct StubUnpacker {
        results: Mutex<HashMap<String, Vec<Step>>>,
    }

    impl StubUnpacker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_result(self, identifier: &str, steps: Vec<Step>) -> Self {
            self.results.lock().unwrap().insert(identifier.to_string(), steps);
            self
        }
    }

    #[async_trait]
    impl BundleUnpacker for StubUnpacker {
        async fn progress(&self, lookup: &BundleLookup) -> Result<UnpackProgress, Error> {
            match self.results.lock().unwrap().get(&lookup.identifier) {
                Some(steps) => Ok(UnpackProgress::Done(steps.clone())),
                None => Ok(UnpackProgress::Pending),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubUnpacker;
    use super::*;

    #[tokio::test]
    async fn pending_lookup_stays_in_remaining() {
        let unpacker = StubUnpacker::new();
        let lookup = BundleLookup { identifier: "csv.v1".into(), ..Default::default() };
        let (remaining, steps) = unpack_bundles(&unpacker, vec![lookup]).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn resolved_lookup_contributes_steps_and_is_removed() {
        let step = Step { resolving: "csv.v1".into(), ..Default::default() };
        let unpacker = StubUnpacker::new().with_result("csv.v1", vec![step.clone()]);
        let lookup = BundleLookup { identifier: "csv.v1".into(), ..Default::default() };
        let (remaining, steps) = unpack_bundles(&unpacker, vec![lookup]).await.unwrap();
        assert!(remaining.is_empty());
        assert_eq!(steps, vec![step]);
    }
}
