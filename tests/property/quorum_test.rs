// tests/property/quorum_test.rs

//! Property tests for the Elector's one-way latches (spec.md §8):
//! `+ODOWN` and `+SELECT` are each published at most once per Elector,
//! across any interleaving of `+SDOWN`/`-SDOWN` traffic, and `-SDOWN`
//! never retracts an already-published `+ODOWN`.

use std::sync::Arc;

use pgsentinel::bus::{self, InMemoryBus, Message, PubSub};
use pgsentinel::dbprobe::FakeDbProbe;
use pgsentinel::elector::Elector;
use pgsentinel::kv::{DEFAULT_PREFIX, InMemoryKvStore};
use proptest::prelude::*;

const CLUSTER: &str = "pg-main";
const PRIMARY_FQDN: &str = "pg-m";
const LOCAL_HOST: &str = "self-host";
// Deliberately distinct from LOCAL_HOST: this Elector never promotes
// itself, so the test only has to observe ODOWN/SELECT counts, not
// filesystem or KV side effects.
const STANDBY_FQDN: &str = "standby-host";

fn seeded_kv(quorum: usize) -> Arc<InMemoryKvStore> {
    let kv = Arc::new(InMemoryKvStore::new());
    kv.seed(
        format!("{DEFAULT_PREFIX}/{CLUSTER}/config"),
        format!(
            r#"{{"dbname":"app","quorum":{quorum},"retries":3,"interval_good":"5s","interval_fail":"1s","location_lag":500000000,"trigger":"/tmp/pgsentinel-property-test-trigger","sentinel_name":"bus"}}"#
        ),
    );
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/master/fqdn"), PRIMARY_FQDN);
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/master/ip"), "10.0.0.1");
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/master/port"), "5432");
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/slave/fqdn"), STANDBY_FQDN);
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/slave/ip"), "10.0.0.2");
    kv.seed(format!("{DEFAULT_PREFIX}/{CLUSTER}/slave/port"), "5432");
    kv
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    #[test]
    fn odown_and_select_each_publish_at_most_once(
        quorum in 1usize..5,
        voters in prop::collection::vec("[a-e]", 0..20),
        wal_lows in prop::collection::vec(0u32..0xFFFF, 0..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let kv = seeded_kv(quorum);
            let cluster = pgsentinel::kv::load_cluster(&*kv, DEFAULT_PREFIX, CLUSTER)
                .await
                .unwrap();
            let bus = Arc::new(InMemoryBus::new());
            let probe = Arc::new(FakeDbProbe::new());
            probe.push_standby_ok("0/1"); // scripted once: check_standby_viability fires at most once

            let channel = bus::channel_name(CLUSTER);
            let mut observer = bus.subscribe(&channel).await.unwrap();

            let elector = Elector::new(
                &cluster,
                LOCAL_HOST.to_string(),
                DEFAULT_PREFIX.to_string(),
                kv.clone(),
                bus.clone(),
                probe,
            );
            let handle = tokio::spawn(async move {
                let _ = tokio::time::timeout(std::time::Duration::from_secs(2), elector.run()).await;
            });

            for (i, voter) in voters.iter().enumerate() {
                let wal = format!("0/{:X}", wal_lows.get(i).copied().unwrap_or(0));
                bus.publish(
                    &channel,
                    Message::SdownAsserted {
                        primary_fqdn: PRIMARY_FQDN.to_string(),
                        voter_host: voter.clone(),
                        wal_pos: wal.parse().unwrap(),
                    }
                    .to_string(),
                )
                .await
                .unwrap();
            }

            // Give the Elector a beat to process the whole backlog and react.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let mut odown_count = 0;
            let mut select_count = 0;
            while let Ok(Ok(line)) =
                tokio::time::timeout(std::time::Duration::from_millis(20), observer.recv()).await
            {
                match line.parse::<Message>().unwrap() {
                    Message::Odown { .. } => odown_count += 1,
                    Message::Select { .. } => select_count += 1,
                    _ => {}
                }
            }

            handle.abort();
            prop_assert!(odown_count <= 1, "expected at most one +ODOWN, saw {odown_count}");
            prop_assert!(select_count <= 1, "expected at most one +SELECT, saw {select_count}");
            Ok(())
        })?;
    }

    #[test]
    fn rescinding_every_voter_empties_the_sdown_set_without_crossing_quorum(
        quorum in 2usize..5,
        voters in prop::collection::vec("[a-e]", 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let kv = seeded_kv(quorum);
            let cluster = pgsentinel::kv::load_cluster(&*kv, DEFAULT_PREFIX, CLUSTER)
                .await
                .unwrap();
            let bus = Arc::new(InMemoryBus::new());
            let probe = Arc::new(FakeDbProbe::new());

            let channel = bus::channel_name(CLUSTER);
            let mut observer = bus.subscribe(&channel).await.unwrap();

            let elector = Elector::new(
                &cluster,
                LOCAL_HOST.to_string(),
                DEFAULT_PREFIX.to_string(),
                kv.clone(),
                bus.clone(),
                probe,
            );
            let handle = tokio::spawn(async move {
                let _ = tokio::time::timeout(std::time::Duration::from_secs(1), elector.run()).await;
            });

            // Idempotence of recovery: each voter asserts then immediately
            // rescinds before the next one asserts, so voted_sdown never
            // holds more than one member at a time and quorum (>= 2) is
            // never crossed, regardless of how many distinct voters cycle
            // through.
            for voter in &voters {
                bus.publish(
                    &channel,
                    Message::SdownAsserted {
                        primary_fqdn: PRIMARY_FQDN.to_string(),
                        voter_host: voter.clone(),
                        wal_pos: "0/1".parse().unwrap(),
                    }
                    .to_string(),
                )
                .await
                .unwrap();
                bus.publish(
                    &channel,
                    Message::SdownRescinded {
                        primary_fqdn: PRIMARY_FQDN.to_string(),
                        voter_host: voter.clone(),
                    }
                    .to_string(),
                )
                .await
                .unwrap();
            }

            let nothing =
                tokio::time::timeout(std::time::Duration::from_millis(200), observer.recv()).await;
            handle.abort();
            prop_assert!(nothing.is_err(), "no ODOWN should follow a fully-rescinded voter set");
            Ok(())
        })?;
    }
}
