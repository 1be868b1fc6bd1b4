// src/supervisor.rs

//! The Supervisor (spec.md §4.3): loads per-cluster config from the KV
//! store, starts one (HealthProbe, Elector) pair per cluster, and
//! terminates the process if any child task exits — for any reason.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::bus::PubSub;
use crate::cluster::Cluster;
use crate::config::DaemonConfig;
use crate::dbprobe::DbProbe;
use crate::elector::Elector;
use crate::error::SentinelError;
use crate::health_probe::HealthProbe;
use crate::kv::{self, KvStore};

/// Bootstraps the shared adapters, loads every configured cluster, and runs
/// each cluster's HealthProbe/Elector pair until the first task exit.
///
/// Mirrors `warden::run`'s shape: construct shared state once, spawn one
/// task per monitored unit into a `JoinSet`, then block on `join_next()`
/// and treat the first completion — success, error, or panic — as fatal.
pub async fn run(
    daemon_config: &DaemonConfig,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn PubSub>,
    db_probe: Arc<dyn DbProbe>,
) -> Result<()> {
    let local_host = daemon_config.resolve_local_host()?;
    info!(host = %local_host, "pgsentinel supervisor starting");

    let keys = kv.list_keys(&daemon_config.kv_prefix).await?;
    let cluster_names = kv::cluster_names_from_keys(&daemon_config.kv_prefix, &keys);
    if cluster_names.is_empty() {
        return Err(anyhow!(
            "no clusters configured under '{}'",
            daemon_config.kv_prefix
        ));
    }

    let mut clusters = Vec::with_capacity(cluster_names.len());
    for name in &cluster_names {
        let cluster = kv::load_cluster(&*kv, &daemon_config.kv_prefix, name)
            .await
            .map_err(|e| anyhow!("loading cluster '{name}': {e}"))?;
        if cluster.endpoints_coincide() {
            return Err(SentinelError::CoincidentEndpoints(cluster.primary.ip.clone()).into());
        }
        clusters.push(cluster);
    }

    let mut tasks: JoinSet<Result<(), SentinelError>> = JoinSet::new();
    for cluster in &clusters {
        spawn_cluster(
            &mut tasks,
            cluster,
            local_host.clone(),
            daemon_config.kv_prefix.clone(),
            kv.clone(),
            bus.clone(),
            db_probe.clone(),
        );
    }

    info!(
        clusters = clusters.len(),
        tasks = tasks.len(),
        "all clusters started"
    );

    // The first task to finish — for any reason — ends supervision (spec.md
    // §4.3, §8 scenario 6): there is no restart, no partial degradation.
    let outcome = tasks.join_next().await;
    tasks.abort_all();

    match outcome {
        Some(Ok(Ok(()))) => {
            // A child exited cleanly: an Elector observed +NEWMASTER and
            // terminated (spec.md §6, exit code 0). Supervision still ends
            // here — the daemon monitors a fixed cluster set for its
            // lifetime, and a promotion changes that set's topology.
            info!("a supervised task exited cleanly after +NEWMASTER; shutting down the daemon");
            Ok(())
        }
        Some(Ok(Err(e))) => {
            error!(error = %e, "a supervised task failed");
            // Only the two dedicated safety exits keep their own exit code
            // (spec.md §6: 4 = SDOWN without baseline, 5 = malformed standby
            // WAL). Every other child failure — bus, KV, DB-probe, timeout,
            // I/O — is a child task exiting prematurely (exit code 3), not a
            // daemon-wide configuration failure.
            let classified = match e {
                SentinelError::SdownWithoutBaseline | SentinelError::MalformedWalPosition(_) => e,
                other => SentinelError::ChildTaskExited(other.to_string()),
            };
            Err(anyhow!(classified))
        }
        Some(Err(join_err)) => {
            error!(error = %join_err, "a supervised task panicked");
            Err(anyhow!("task panicked: {join_err}"))
        }
        None => Err(anyhow!("no clusters were started")),
    }
}

fn spawn_cluster(
    tasks: &mut JoinSet<Result<(), SentinelError>>,
    cluster: &Cluster,
    local_host: String,
    kv_prefix: String,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn PubSub>,
    db_probe: Arc<dyn DbProbe>,
) {
    let health_probe = HealthProbe::new(cluster, local_host.clone(), db_probe.clone(), bus.clone());
    let cluster_name = cluster.name.clone();
    tasks.spawn(async move {
        let result = health_probe.run().await;
        if let Err(e) = &result {
            error!(cluster = %cluster_name, error = %e, "health probe exited");
        }
        result
    });

    let elector = Elector::new(cluster, local_host, kv_prefix, kv, bus, db_probe);
    let cluster_name = cluster.name.clone();
    tasks.spawn(async move {
        let result = elector.run().await;
        match &result {
            Ok(()) => info!(cluster = %cluster_name, "elector exited cleanly"),
            Err(e) => error!(cluster = %cluster_name, error = %e, "elector exited"),
        }
        result
    });
}
