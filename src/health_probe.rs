// src/health_probe.rs

//! The HealthProbe component (spec.md §4.1): a perpetual probe loop against
//! the primary that publishes `+SDOWN`/`-SDOWN` transitions onto the
//! cluster's pub/sub channel.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bus::{self, Message, PubSub};
use crate::cluster::{Cluster, Endpoint};
use crate::dbprobe::DbProbe;
use crate::error::SentinelError;
use crate::wal::WalPosition;

/// Runs the health-check loop for one cluster's primary until a fatal
/// condition is reached (spec.md §8 scenario 5) or the process is killed.
pub struct HealthProbe {
    cluster_name: String,
    primary: Endpoint,
    config: crate::cluster::Config,
    local_host: String,
    db_probe: Arc<dyn DbProbe>,
    bus: Arc<dyn PubSub>,
}

impl HealthProbe {
    pub fn new(
        cluster: &Cluster,
        local_host: String,
        db_probe: Arc<dyn DbProbe>,
        bus: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            cluster_name: cluster.name.clone(),
            primary: cluster.primary.clone(),
            config: cluster.config.clone(),
            local_host,
            db_probe,
            bus,
        }
    }

    /// The main loop. Returns `Err(SdownWithoutBaseline)` (exit code 4) if
    /// `retries` consecutive failures are reached before any valid WAL
    /// position has ever been observed; otherwise loops forever.
    pub async fn run(&self) -> Result<(), SentinelError> {
        let channel = bus::channel_name(&self.cluster_name);
        let mut last_known_xlog: Option<WalPosition> = None;
        let mut fail_count: u32 = 0;
        let mut sdown_published = false;

        info!(
            cluster = %self.cluster_name,
            primary = %self.primary.fqdn,
            "health probe started"
        );

        loop {
            match self.probe_once().await {
                Ok(wal) => {
                    last_known_xlog = Some(match last_known_xlog {
                        Some(prev) => prev.max(wal),
                        None => wal,
                    });

                    if sdown_published {
                        info!(
                            cluster = %self.cluster_name,
                            "primary reachable again, rescinding SDOWN"
                        );
                        let msg = Message::SdownRescinded {
                            primary_fqdn: self.primary.fqdn.clone(),
                            voter_host: self.local_host.clone(),
                        };
                        self.bus.publish(&channel, msg.to_string()).await?;
                        sdown_published = false;
                    }
                    fail_count = 0;
                    tokio::time::sleep(self.config.interval_good).await;
                }
                Err(e) => {
                    warn!(
                        cluster = %self.cluster_name,
                        error = %e,
                        fail_count,
                        "primary probe failed"
                    );
                    fail_count += 1;

                    if fail_count >= self.config.retries && !sdown_published {
                        match last_known_xlog {
                            Some(wal) => {
                                warn!(
                                    cluster = %self.cluster_name,
                                    %wal,
                                    "primary subjectively down, publishing SDOWN"
                                );
                                let msg = Message::SdownAsserted {
                                    primary_fqdn: self.primary.fqdn.clone(),
                                    voter_host: self.local_host.clone(),
                                    wal_pos: wal,
                                };
                                self.bus.publish(&channel, msg.to_string()).await?;
                                sdown_published = true;
                            }
                            None => {
                                error!(
                                    cluster = %self.cluster_name,
                                    "reached retry limit without ever observing a valid WAL position; exiting"
                                );
                                return Err(SentinelError::SdownWithoutBaseline);
                            }
                        }
                    }
                    tokio::time::sleep(self.config.interval_fail).await;
                }
            }
        }
    }

    /// One probe attempt: read and validate the primary's current WAL
    /// position. A malformed result is treated the same as any other probe
    /// failure, per spec.md §4.1's first edge case.
    async fn probe_once(&self) -> Result<WalPosition, SentinelError> {
        let raw = self
            .db_probe
            .current_wal_location(&self.primary, &self.config.dbname)
            .await?;
        raw.parse::<WalPosition>()
            .map_err(|e| SentinelError::DbProbe(e.to_string()))
    }
}
