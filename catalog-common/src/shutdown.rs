//! Root cancellation plumbing. `run()` in the operator binary derives one
//! `CancellationToken` from `shutdown_signal` and hands a `child_token()` to
//! each queue worker pool (`SPEC_FULL.md` §5).

pub async fn shutdown_signal() {
    // Listen for both SIGINT (Ctrl+C) and SIGTERM (K8s)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => tracing::warn!("received SIGINT"),
            _ = sigterm.recv() => tracing::warn!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        // Fallback: only Ctrl+C on non-Unix
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
