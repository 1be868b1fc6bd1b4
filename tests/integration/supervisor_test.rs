// tests/integration/supervisor_test.rs

//! spec.md §8 end-to-end scenario 6: with two clusters (four tasks)
//! running, one HealthProbe's fatal exit tears the whole daemon down
//! within one supervision tick.

use std::sync::Arc;
use std::time::Duration;

use pgsentinel::bus::InMemoryBus;
use pgsentinel::config::DaemonConfig;
use pgsentinel::dbprobe::FakeDbProbe;
use pgsentinel::error::SentinelError;
use pgsentinel::kv::{DEFAULT_PREFIX, InMemoryKvStore};
use pgsentinel::supervisor;

fn daemon_config() -> DaemonConfig {
    DaemonConfig {
        kv_base_url: "http://127.0.0.1:8500".parse().unwrap(),
        bus_addr: "127.0.0.1:7000".parse().unwrap(),
        kv_prefix: DEFAULT_PREFIX.to_string(),
        local_host: Some("h1".into()),
    }
}

#[tokio::test]
async fn one_dead_health_probe_tears_down_every_cluster_promptly() {
    let kv = InMemoryKvStore::new();
    for (key, value) in seeded_entries("pg-a") {
        kv.seed(key, value);
    }
    for (key, value) in seeded_entries("pg-b") {
        kv.seed(key, value);
    }
    let kv = Arc::new(kv);
    let bus = Arc::new(InMemoryBus::new());
    // No responses scripted for either cluster: both HealthProbes fail
    // every probe attempt and, after `retries`, exit with
    // `SdownWithoutBaseline` — the only fatal path a HealthProbe has.
    let db_probe = Arc::new(FakeDbProbe::new());

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor::run(&daemon_config(), kv, bus, db_probe),
    )
    .await
    .expect("supervisor must shut down within one supervision tick, not hang");

    let err = result.expect_err("a dead HealthProbe must be fatal to the whole daemon");
    let sentinel_err = err
        .downcast_ref::<SentinelError>()
        .expect("the aggregated error should carry the originating SentinelError");
    assert!(matches!(sentinel_err, SentinelError::SdownWithoutBaseline));
    assert_eq!(sentinel_err.exit_code(), 4);
}

fn seeded_entries(cluster: &str) -> Vec<(String, String)> {
    vec![
        (
            format!("{DEFAULT_PREFIX}/{cluster}/config"),
            r#"{"dbname":"app","quorum":2,"retries":2,"interval_good":"1ms","interval_fail":"1ms","location_lag":500000000,"trigger":"/tmp/t","sentinel_name":"bus"}"#.to_string(),
        ),
        (format!("{DEFAULT_PREFIX}/{cluster}/master/fqdn"), "pg-m".to_string()),
        (format!("{DEFAULT_PREFIX}/{cluster}/master/ip"), "10.0.0.1".to_string()),
        (format!("{DEFAULT_PREFIX}/{cluster}/master/port"), "5432".to_string()),
        (format!("{DEFAULT_PREFIX}/{cluster}/slave/fqdn"), "h2".to_string()),
        (format!("{DEFAULT_PREFIX}/{cluster}/slave/ip"), "10.0.0.2".to_string()),
        (format!("{DEFAULT_PREFIX}/{cluster}/slave/port"), "5432".to_string()),
    ]
}
