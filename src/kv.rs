// src/kv.rs

//! A thin typed facade over the configuration KV store (spec.md §6).
//!
//! The store is read-mostly and tree-structured. This module defines the
//! minimal `KvStore` trait the rest of the crate needs, a Consul-style HTTP
//! adapter (`HttpKvStore`), and an in-memory double (`InMemoryKvStore`) used
//! by tests.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::cluster::{Cluster, Config as ClusterConfig, Endpoint};
use crate::error::SentinelError;

/// Default root under which all cluster state lives.
pub const DEFAULT_PREFIX: &str = "key/prod/postgres";

/// A read/write facade over a tree-structured KV store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetches a single value, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError>;

    /// Writes a single value, creating the key if necessary.
    async fn put(&self, key: &str, value: &str) -> Result<(), SentinelError>;

    /// Recursively lists every key under `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, SentinelError>;
}

/// Extracts the distinct cluster names from a recursive listing of `prefix`,
/// taking the path segment immediately following the prefix — the "4th path
/// segment" of spec.md §6 for the default three-segment prefix.
pub fn cluster_names_from_keys(prefix: &str, keys: &[String]) -> Vec<String> {
    let prefix_segments: Vec<&str> = prefix.split('/').filter(|s| !s.is_empty()).collect();
    let mut names = Vec::new();
    for key in keys {
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() <= prefix_segments.len() {
            continue;
        }
        if segments[..prefix_segments.len()] != prefix_segments[..] {
            continue;
        }
        let name = segments[prefix_segments.len()].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Loads the full `Cluster` (config + both endpoints) for `name` from the KV store.
pub async fn load_cluster(
    kv: &dyn KvStore,
    prefix: &str,
    name: &str,
) -> Result<Cluster, SentinelError> {
    let config_json = kv
        .get(&format!("{prefix}/{name}/config"))
        .await?
        .ok_or_else(|| SentinelError::Config(format!("missing config for cluster '{name}'")))?;
    let config: ClusterConfig = serde_json::from_str(&config_json)
        .map_err(|e| SentinelError::Config(format!("invalid config for cluster '{name}': {e}")))?;

    let primary = load_endpoint(kv, prefix, name, "master").await?;
    let standby = load_endpoint(kv, prefix, name, "slave").await?;

    Ok(Cluster {
        name: name.to_string(),
        primary,
        standby,
        config,
    })
}

/// Loads just the standby endpoint for `cluster` from the KV store. The
/// Elector re-fetches this on every `+ODOWN` rather than caching it from
/// startup, since a concurrent promotion elsewhere could have already
/// rewritten it.
pub async fn load_standby(
    kv: &dyn KvStore,
    prefix: &str,
    cluster: &str,
) -> Result<Endpoint, SentinelError> {
    load_endpoint(kv, prefix, cluster, "slave").await
}

pub(crate) async fn load_endpoint(
    kv: &dyn KvStore,
    prefix: &str,
    cluster: &str,
    role: &str,
) -> Result<Endpoint, SentinelError> {
    let fqdn = require(kv, prefix, cluster, role, "fqdn").await?;
    let ip = require(kv, prefix, cluster, role, "ip").await?;
    let port_str = require(kv, prefix, cluster, role, "port").await?;
    let port: u16 = port_str.parse().map_err(|_| {
        SentinelError::Config(format!(
            "invalid port for {cluster}/{role}: {port_str:?}"
        ))
    })?;
    Ok(Endpoint { fqdn, ip, port })
}

async fn require(
    kv: &dyn KvStore,
    prefix: &str,
    cluster: &str,
    role: &str,
    field: &str,
) -> Result<String, SentinelError> {
    let key = format!("{prefix}/{cluster}/{role}/{field}");
    kv.get(&key)
        .await?
        .ok_or_else(|| SentinelError::Config(format!("missing key '{key}'")))
}

/// Rewrites the primary endpoint for `cluster` after a successful promotion.
pub async fn rewrite_primary(
    kv: &dyn KvStore,
    prefix: &str,
    cluster: &str,
    new_primary: &Endpoint,
) -> Result<(), SentinelError> {
    kv.put(
        &format!("{prefix}/{cluster}/master/fqdn"),
        &new_primary.fqdn,
    )
    .await?;
    kv.put(&format!("{prefix}/{cluster}/master/ip"), &new_primary.ip)
        .await?;
    kv.put(
        &format!("{prefix}/{cluster}/master/port"),
        &new_primary.port.to_string(),
    )
    .await?;
    Ok(())
}

/// A Consul-style recursive KV store reached over HTTP.
///
/// Reads use `GET {base_url}/v1/kv/{key}?raw`; recursive listings use
/// `GET {base_url}/v1/kv/{prefix}?keys&recurse=true`; writes use
/// `PUT {base_url}/v1/kv/{key}`.
pub struct HttpKvStore {
    base_url: url::Url,
    client: reqwest::Client,
}

impl HttpKvStore {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError> {
        let url = self
            .base_url
            .join(&format!("v1/kv/{key}"))
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .query(&[("raw", "true")])
            .send()
            .await
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        Ok(Some(body))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), SentinelError> {
        let url = self
            .base_url
            .join(&format!("v1/kv/{key}"))
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        self.client
            .put(url)
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| SentinelError::Kv(e.to_string()))?
            .error_for_status()
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        debug!(key, "wrote KV key");
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, SentinelError> {
        let url = self
            .base_url
            .join(&format!("v1/kv/{prefix}"))
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .query(&[("keys", "true"), ("recurse", "true")])
            .send()
            .await
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        let keys: Vec<String> = resp
            .json()
            .await
            .map_err(|e| SentinelError::Kv(e.to_string()))?;
        Ok(keys)
    }
}

/// An in-memory `KvStore`, used by tests and by `InMemoryKvStore::seed_cluster`
/// fixtures. Mirrors the `DashMap`-based state maps the teacher uses
/// throughout (e.g. `GlobalWardenState::masters`).
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: DashMap<String, String>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SentinelError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), SentinelError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, SentinelError> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
