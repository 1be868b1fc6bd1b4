// src/elector.rs

//! The Elector component (spec.md §4.2): consumes the cluster's pub/sub
//! channel, aggregates peer votes, enforces quorum, validates standby
//! viability, and drives promotion.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{self, Message, PubSub};
use crate::cluster::{Cluster, Config as ClusterConfig, Endpoint};
use crate::dbprobe::DbProbe;
use crate::error::SentinelError;
use crate::kv::{self, KvStore};
use crate::wal::WalPosition;

/// The Elector's externally observable progress through the protocol.
/// Transitions are strictly forward (spec.md §3); nothing ever moves this
/// backwards, including `-SDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    Watching,
    DeclaredODown,
    SelectedSelf,
    Promoting,
    Done,
}

/// Drives the four-phase promotion protocol for one cluster from this
/// peer's point of view.
pub struct Elector {
    cluster_name: String,
    local_host: String,
    primary_fqdn: String,
    config: ClusterConfig,
    kv: Arc<dyn KvStore>,
    kv_prefix: String,
    bus: Arc<dyn PubSub>,
    db_probe: Arc<dyn DbProbe>,
}

impl Elector {
    pub fn new(
        cluster: &Cluster,
        local_host: String,
        kv_prefix: String,
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn PubSub>,
        db_probe: Arc<dyn DbProbe>,
    ) -> Self {
        // The Elector's cluster identity is recovered from the channel name
        // it will subscribe to, not taken on faith from the `Cluster` it was
        // built from (spec.md §4.2: "the channel name encodes the cluster
        // name as suffix after the last `-`; cluster name is recovered by
        // that split").
        let channel = bus::channel_name(&cluster.name);
        let cluster_name = bus::cluster_from_channel(&channel)
            .unwrap_or(&cluster.name)
            .to_string();
        Self {
            cluster_name,
            local_host,
            primary_fqdn: cluster.primary.fqdn.clone(),
            config: cluster.config.clone(),
            kv,
            kv_prefix,
            bus,
            db_probe,
        }
    }

    /// Runs until `+NEWMASTER` is observed (`Ok(())`) or a fatal condition
    /// is reached (malformed standby WAL → exit code 5, via the `?` on
    /// `check_standby_viability`).
    pub async fn run(&self) -> Result<(), SentinelError> {
        let channel = bus::channel_name(&self.cluster_name);
        let mut sub = self.bus.subscribe(&channel).await?;

        let mut state = ElectorState::Watching;
        let mut voted_sdown: HashSet<String> = HashSet::new();
        let mut voted_select: HashSet<String> = HashSet::new();
        let mut last_known_xlog: Option<WalPosition> = None;
        let mut published_odown = false;
        let mut published_select = false;
        let mut promoted = false;

        info!(cluster = %self.cluster_name, host = %self.local_host, "elector started");

        loop {
            let line = sub.recv().await?;
            let msg: Message = match line.parse() {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(cluster = %self.cluster_name, line, error = %e, "dropping unparseable message");
                    continue;
                }
            };

            match msg {
                Message::SdownAsserted {
                    voter_host,
                    wal_pos,
                    ..
                } => {
                    voted_sdown.insert(voter_host);
                    last_known_xlog = Some(match last_known_xlog {
                        Some(prev) => prev.max(wal_pos),
                        None => wal_pos,
                    });

                    if voted_sdown.len() >= self.config.quorum && !published_odown {
                        let odown = Message::Odown {
                            primary_fqdn: self.primary_fqdn.clone(),
                            voter_host: self.local_host.clone(),
                        };
                        self.bus.publish(&channel, odown.to_string()).await?;
                        published_odown = true;
                        state = ElectorState::DeclaredODown;
                        info!(
                            cluster = %self.cluster_name,
                            voters = voted_sdown.len(),
                            ?state,
                            "quorum of SDOWN reached, declaring ODOWN"
                        );
                    }
                }
                Message::SdownRescinded { voter_host, .. } => {
                    // -SDOWN never moves ElectorState backwards (spec.md §3);
                    // it only affects voted_sdown bookkeeping.
                    voted_sdown.remove(&voter_host);
                }
                Message::Odown { .. } => {
                    if !published_select {
                        let baseline = last_known_xlog.ok_or_else(|| {
                            SentinelError::Internal(
                                "ODOWN observed before any SDOWN established a WAL baseline"
                                    .into(),
                            )
                        })?;
                        if self.check_standby_viability(baseline).await? {
                            let candidate = kv::load_standby(
                                &*self.kv,
                                &self.kv_prefix,
                                &self.cluster_name,
                            )
                            .await?;
                            let select = Message::Select {
                                candidate_fqdn: candidate.fqdn.clone(),
                                voter_host: self.local_host.clone(),
                            };
                            self.bus.publish(&channel, select.to_string()).await?;
                            published_select = true;
                            state = ElectorState::SelectedSelf;
                            info!(
                                cluster = %self.cluster_name,
                                candidate = %candidate.fqdn,
                                ?state,
                                "standby viable, publishing SELECT"
                            );
                        }
                        // else: refused on lag, stays in DeclaredODown and stalls.
                    }
                }
                Message::Select {
                    candidate_fqdn,
                    voter_host,
                } => {
                    if candidate_fqdn == self.local_host {
                        voted_select.insert(voter_host);
                        if voted_select.len() >= self.config.quorum && !promoted {
                            state = ElectorState::Promoting;
                            self.promote().await?;
                            promoted = true;
                            self.bus
                                .publish(&channel, Message::NewMaster.to_string())
                                .await?;
                            state = ElectorState::Done;
                            info!(cluster = %self.cluster_name, ?state, "promotion complete");
                            return Ok(());
                        }
                    }
                }
                Message::NewMaster => {
                    state = ElectorState::Done;
                    info!(cluster = %self.cluster_name, ?state, "NEWMASTER observed, terminating");
                    return Ok(());
                }
            }
        }
    }

    /// Fetches the current standby endpoint and checks its replication lag
    /// against `baseline`. `Ok(true)` means promotion may proceed;
    /// `Ok(false)` means refuse and stall (logged, non-fatal); `Err` means
    /// the standby returned a malformed WAL position (fatal, exit code 5).
    async fn check_standby_viability(&self, baseline: WalPosition) -> Result<bool, SentinelError> {
        let standby: Endpoint =
            kv::load_standby(&*self.kv, &self.kv_prefix, &self.cluster_name).await?;
        let raw = self
            .db_probe
            .last_received_wal_location(&standby, &self.config.dbname)
            .await?;
        let standby_wal: WalPosition = raw.parse()?;

        let lag = baseline.diff(&standby_wal);
        if lag > self.config.location_lag {
            warn!(
                cluster = %self.cluster_name,
                lag,
                threshold = self.config.location_lag,
                "standby lag exceeds threshold, refusing promotion and stalling"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// The promotion side-effect sequence (spec.md §4.2, §7 kind 4): create
    /// the trigger file, rewrite the KV primary endpoint, in that order.
    /// Once entered there is no rollback; failures are logged and
    /// propagated, but the cluster state is considered committed either way.
    async fn promote(&self) -> Result<(), SentinelError> {
        let standby = kv::load_standby(&*self.kv, &self.kv_prefix, &self.cluster_name).await?;

        tokio::fs::File::create(&self.config.trigger)
            .await
            .map_err(|e| {
                warn!(cluster = %self.cluster_name, error = %e, "failed to create trigger file");
                SentinelError::Io(e)
            })?;

        kv::rewrite_primary(&*self.kv, &self.kv_prefix, &self.cluster_name, &standby)
            .await
            .map_err(|e| {
                warn!(cluster = %self.cluster_name, error = %e, "failed to rewrite KV primary");
                e
            })?;

        Ok(())
    }
}
