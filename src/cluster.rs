// src/cluster.rs

//! The data model for a single monitored cluster (spec.md §3): its two
//! endpoints and its per-cluster tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single reachable database instance: a hostname plus the address used
/// to actually connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub fqdn: String,
    pub ip: String,
    pub port: u16,
}

/// Per-cluster tunables, loaded from the KV store's `<prefix>/<cluster>/config` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dbname: String,
    pub quorum: usize,
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub interval_good: Duration,
    #[serde(with = "humantime_serde")]
    pub interval_fail: Duration,
    /// Maximum tolerated byte gap between the last-known primary WAL
    /// position and the standby's received position.
    pub location_lag: u64,
    pub trigger: String,
    pub sentinel_name: String,
}

/// The unit of monitoring: a stable name, two endpoints, and a `Config`.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub primary: Endpoint,
    pub standby: Endpoint,
    pub config: Config,
}

impl Cluster {
    /// `true` if the primary and standby resolve to the same IP, which is
    /// an unreachable precondition (spec.md §4.3, §7 kind 3).
    pub fn endpoints_coincide(&self) -> bool {
        self.primary.ip == self.standby.ip
    }
}
