// tests/integration/test_helpers.rs

//! Test helpers for driving multi-peer promotion scenarios.

use std::sync::Arc;

use pgsentinel::bus::{self, InMemoryBus, Message, PubSub};
use pgsentinel::cluster::Cluster;
use pgsentinel::dbprobe::FakeDbProbe;
use pgsentinel::elector::Elector;
use pgsentinel::error::SentinelError;
use pgsentinel::kv::{self, KvStore};

/// Spawns one `Elector` for `host`, returning its join handle. The Elector
/// runs until `+NEWMASTER` (`Ok(())`) or a fatal condition (`Err`).
pub fn spawn_elector(
    cluster: &Cluster,
    host: &str,
    kv_prefix: &str,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn PubSub>,
    db_probe: Arc<FakeDbProbe>,
) -> tokio::task::JoinHandle<Result<(), SentinelError>> {
    let elector = Elector::new(
        cluster,
        host.to_string(),
        kv_prefix.to_string(),
        kv,
        bus,
        db_probe,
    );
    tokio::spawn(async move { elector.run().await })
}

/// Publishes a `+SDOWN` from `voter` for `cluster`'s primary, as if that
/// voter's HealthProbe had just crossed the `retries` threshold.
pub async fn publish_sdown(bus: &InMemoryBus, cluster: &str, primary_fqdn: &str, voter: &str, wal: &str) {
    let channel = bus::channel_name(cluster);
    bus.publish(
        &channel,
        Message::SdownAsserted {
            primary_fqdn: primary_fqdn.to_string(),
            voter_host: voter.to_string(),
            wal_pos: wal.parse().unwrap(),
        }
        .to_string(),
    )
    .await
    .unwrap();
}

pub async fn publish_sdown_rescinded(bus: &InMemoryBus, cluster: &str, primary_fqdn: &str, voter: &str) {
    let channel = bus::channel_name(cluster);
    bus.publish(
        &channel,
        Message::SdownRescinded {
            primary_fqdn: primary_fqdn.to_string(),
            voter_host: voter.to_string(),
        }
        .to_string(),
    )
    .await
    .unwrap();
}

pub async fn load_cluster(kv: &dyn KvStore, prefix: &str, name: &str) -> Cluster {
    kv::load_cluster(kv, prefix, name).await.unwrap()
}
