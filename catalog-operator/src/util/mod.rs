use std::time::Duration;

pub mod owner;
pub mod patch;

mod error;

pub use error::*;

/// The default interval for requeuing a converged resource.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Delay used when a sync must wait on slow external work (bundle unpack
/// progress, a pending attenuated-service-account lookup) rather than on a
/// genuine error (`spec.md` §4.3 step 2).
pub const SHORT_REQUEUE: Duration = Duration::from_secs(5);

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).expect("spec always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    hex::encode(hasher.finalize())
}
