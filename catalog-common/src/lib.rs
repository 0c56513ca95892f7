//! Ambient substrate shared by every binary in the catalog operator
//! workspace: colored startup banners, structured logging init, graceful
//! shutdown, backoff, and a small metrics exporter. Kept dependency-light
//! so `catalog-registry-client` can pull in just the pieces it needs
//! without dragging in `kube`.

pub mod args;
pub mod colors;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod wait;

pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}
