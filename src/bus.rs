// src/bus.rs

//! A thin typed facade over the pub/sub transport (spec.md §6), plus the
//! Elector message grammar (spec.md §4.2) that rides on top of it.
//!
//! The bus itself — a reliable, in-order, at-least-once message service —
//! is an external collaborator; this module only defines the client-side
//! interface to it (`PubSub`) and two concrete adapters: a line-oriented
//! TCP client (`TcpLineBus`) and an in-process double (`InMemoryBus`) used
//! by tests.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::error::SentinelError;
use crate::wal::WalPosition;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// The capacity of each channel's broadcast sender in `InMemoryBus`.
const CHANNEL_CAPACITY: usize = 256;

/// One parsed line of the Elector's wire grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SdownAsserted {
        primary_fqdn: String,
        voter_host: String,
        wal_pos: WalPosition,
    },
    SdownRescinded {
        primary_fqdn: String,
        voter_host: String,
    },
    Odown {
        primary_fqdn: String,
        voter_host: String,
    },
    Select {
        candidate_fqdn: String,
        voter_host: String,
    },
    NewMaster,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::SdownAsserted {
                primary_fqdn,
                voter_host,
                wal_pos,
            } => write!(f, "+SDOWN {primary_fqdn} {voter_host} {wal_pos}"),
            Message::SdownRescinded {
                primary_fqdn,
                voter_host,
            } => write!(f, "-SDOWN {primary_fqdn} {voter_host}"),
            Message::Odown {
                primary_fqdn,
                voter_host,
            } => write!(f, "+ODOWN {primary_fqdn} {voter_host}"),
            Message::Select {
                candidate_fqdn,
                voter_host,
            } => write!(f, "+SELECT {candidate_fqdn} {voter_host}"),
            Message::NewMaster => write!(f, "+NEWMASTER"),
        }
    }
}

impl std::str::FromStr for Message {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["+SDOWN", primary_fqdn, voter_host, wal_pos] => Ok(Message::SdownAsserted {
                primary_fqdn: primary_fqdn.to_string(),
                voter_host: voter_host.to_string(),
                wal_pos: wal_pos
                    .parse()
                    .map_err(|_| format!("malformed WAL position in +SDOWN: {wal_pos:?}"))?,
            }),
            ["-SDOWN", primary_fqdn, voter_host] => Ok(Message::SdownRescinded {
                primary_fqdn: primary_fqdn.to_string(),
                voter_host: voter_host.to_string(),
            }),
            ["+ODOWN", primary_fqdn, voter_host] => Ok(Message::Odown {
                primary_fqdn: primary_fqdn.to_string(),
                voter_host: voter_host.to_string(),
            }),
            ["+SELECT", candidate_fqdn, voter_host] => Ok(Message::Select {
                candidate_fqdn: candidate_fqdn.to_string(),
                voter_host: voter_host.to_string(),
            }),
            ["+NEWMASTER"] => Ok(Message::NewMaster),
            _ => Err(format!("unrecognized message: {line:?}")),
        }
    }
}

/// The channel name for a given cluster, per spec.md §4.2.
pub fn channel_name(cluster: &str) -> String {
    format!("pgsentinel-{cluster}")
}

/// Recovers the cluster name from a channel by splitting after the last `-`.
pub fn cluster_from_channel(channel: &str) -> Option<&str> {
    channel.rsplit_once('-').map(|(_, cluster)| cluster)
}

/// A live subscription to one channel, yielding lines in publish order.
pub enum Subscription {
    InMemory(broadcast::Receiver<String>),
    Tcp(Framed<TcpStream, LinesCodec>),
}

impl Subscription {
    /// Waits for the next line on this subscription.
    pub async fn recv(&mut self) -> Result<String, SentinelError> {
        match self {
            Subscription::InMemory(rx) => loop {
                match rx.recv().await {
                    Ok(line) => return Ok(line),
                    // A slow subscriber that lagged behind just skips ahead;
                    // the latch flags make every message idempotent.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SentinelError::Bus("channel closed".into()));
                    }
                }
            },
            Subscription::Tcp(framed) => framed
                .next()
                .await
                .ok_or_else(|| SentinelError::Bus("connection closed by peer".into()))?
                .map_err(|e| SentinelError::Bus(e.to_string())),
        }
    }
}

/// A facade over the pub/sub transport.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, line: String) -> Result<(), SentinelError>;
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SentinelError>;
}

/// A line-oriented TCP client for an external pub/sub broker. Each publish
/// opens a fresh connection (mirroring `warden::worker::publish_message`'s
/// connect-per-publish shape); each subscription keeps one persistent
/// connection open for the life of the subscriber.
pub struct TcpLineBus {
    addr: SocketAddr,
}

impl TcpLineBus {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn connect(&self) -> Result<Framed<TcpStream, LinesCodec>, SentinelError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| SentinelError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| SentinelError::Bus(e.to_string()))?;
        Ok(Framed::new(stream, LinesCodec::new()))
    }
}

#[async_trait]
impl PubSub for TcpLineBus {
    async fn publish(&self, channel: &str, line: String) -> Result<(), SentinelError> {
        let mut framed = self.connect().await?;
        framed
            .send(format!("PUBLISH {channel} {line}"))
            .await
            .map_err(|e| SentinelError::Bus(e.to_string()))?;
        let ack = tokio::time::timeout(CONNECT_TIMEOUT, framed.next())
            .await
            .map_err(|_| SentinelError::Timeout(CONNECT_TIMEOUT))?
            .ok_or_else(|| SentinelError::Bus("connection closed before ack".into()))?
            .map_err(|e| SentinelError::Bus(e.to_string()))?;
        if ack != "OK" {
            return Err(SentinelError::Bus(format!("unexpected ack: {ack:?}")));
        }
        debug!(channel, "published message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, SentinelError> {
        let mut framed = self.connect().await?;
        framed
            .send(format!("SUBSCRIBE {channel}"))
            .await
            .map_err(|e| SentinelError::Bus(e.to_string()))?;
        Ok(Subscription::Tcp(framed))
    }
}

/// An in-process double for `PubSub`, a direct structural port of
/// `spineldb::core::pubsub::PubSubManager`'s channel-map-of-broadcast-
/// senders design.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl PubSub for InMemoryBus {
    async fn publish(&self, channel: &str, line: String) -> Result<(), SentinelError> {
        // No subscribers yet is not an error; matches a real bus accepting a
        // publish with zero current listeners.
        let _ = self.sender_for(channel).send(line);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, SentinelError> {
        Ok(Subscription::InMemory(self.sender_for(channel).subscribe()))
    }
}
