//! Process entrypoint (`spec.md` §5, §6): parses [`OperatorArgs`], starts
//! logging/metrics, and runs C3/C4/C5 behind one shared leader-election
//! lease, mirroring the teacher's `clusters::reconcile::run` acquire/renew
//! loop generalized from a single controller to three. C1's `SourceStore`
//! has no leader requirement of its own (every replica may hold live
//! registry connections; only writes to cluster state are gated).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use catalog_common::args::OperatorArgs;
use catalog_common::colors::{FG1, FG2};
use catalog_operator::ensure::unstructured::default_allowlist;
use catalog_operator::resolve;
use catalog_operator::resolver::NullResolver;
use catalog_operator::source_store::SourceStore;
use catalog_operator::{catalogsource, installplan, queue::KeyQueue};

const LEASE_NAME: &str = "catalog-operator-lock";
const LEASE_TTL: Duration = Duration::from_secs(15);
const RENEW_EVERY: Duration = Duration::from_secs(5);
const RESOLVE_WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    catalog_common::logging::init();
    let args = OperatorArgs::parse();
    catalog_common::logging::print_banner("catalog-operator", env!("CARGO_PKG_VERSION"));
    catalog_common::metrics::maybe_spawn_metrics_server(args.metrics_port);

    let client = Client::try_default().await?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        catalog_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    catalog_common::signal_ready();

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("catalog-operator-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &args.lease_namespace,
        LeaseLockParams { holder_id, lease_name: LEASE_NAME.to_string(), lease_ttl: LEASE_TTL },
    );

    println!("{}", "starting catalog operator".color(FG2));

    // C1 runs on every replica regardless of leadership: its live registry
    // connections are read-only input to C4/C5, not cluster writes.
    let source_store = SourceStore::new(args.catalog_reconnect_backoff_ceiling);

    let mut components_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(RENEW_EVERY);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = components_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(lease) => lease,
            Err(err) => {
                tracing::warn!(error = %err, "leader election renew/acquire failed");
                if let Some(task) = components_task.take() {
                    task.abort();
                    tracing::warn!("aborted components due to leader election error");
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if components_task.is_none() {
                println!("{}", "acquired leadership; starting components".color(FG1));
                components_task = Some(tokio::spawn(run_components(client.clone(), args.clone(), source_store.clone(), shutdown.clone())));
            }
        } else if let Some(task) = components_task.take() {
            tracing::warn!("lost leadership; stopping components");
            task.abort();
        }
    }

    Ok(())
}

/// Runs C3, C4, and C5 concurrently until cancelled. All three share the
/// cluster-write lease acquired by the caller; C4's resolve queue is fed
/// directly by C5's ready-transition handler as well as its own watchers.
async fn run_components(client: Client, args: OperatorArgs, source_store: Arc<SourceStore>, shutdown: CancellationToken) {
    let allowlist: HashSet<_> = default_allowlist();
    let resolve_queue: Arc<KeyQueue<String>> = KeyQueue::new();

    let installplan_fut = installplan::run(client.clone(), args.installplan_retention_cap, allowlist);

    let resolve_ctx = Arc::new(resolve::Context {
        client: client.clone(),
        global_namespace: args.global_namespace.clone(),
        source_store: source_store.clone(),
        resolver: Arc::new(NullResolver),
    });
    let resolve_fut = resolve::run(client.clone(), resolve_ctx, resolve_queue.clone(), RESOLVE_WORKER_COUNT, shutdown.clone());

    let catalogsource_ctx = Arc::new(catalogsource::Context {
        client: client.clone(),
        source_store: source_store.clone(),
        resolve_queue: resolve_queue.clone(),
        unpacker_image: args.configmap_unpacker_image.clone(),
    });
    let catalogsource_fut = catalogsource::run(client.clone(), catalogsource_ctx);

    tokio::join!(installplan_fut, resolve_fut, catalogsource_fut);
}
