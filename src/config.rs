// src/config.rs

//! Daemon bootstrap configuration (spec.md §6 "Environment"): the two
//! external service endpoints and the local identity override, loaded once
//! at startup. Per-cluster tunables live in the KV store itself
//! (`cluster::Config`), not here.

use std::net::SocketAddr;

use serde::Deserialize;
use tokio::fs;

use crate::error::SentinelError;
use crate::kv::DEFAULT_PREFIX;

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the Consul-style KV HTTP endpoint.
    pub kv_base_url: url::Url,

    /// Address of the pub/sub bus's TCP listener.
    pub bus_addr: SocketAddr,

    /// Root prefix under which cluster state lives in the KV store.
    #[serde(default = "default_kv_prefix")]
    pub kv_prefix: String,

    /// Overrides the system hostname used as this instance's voter
    /// identity. Primarily for tests and for hosts where the reported
    /// hostname doesn't match the FQDN peers expect.
    pub local_host: Option<String>,
}

fn default_kv_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl DaemonConfig {
    pub async fn from_file(path: &str) -> Result<Self, SentinelError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SentinelError::Config(format!("reading {path}: {e}")))?;
        let config: DaemonConfig = toml::from_str(&content)
            .map_err(|e| SentinelError::Config(format!("parsing {path}: {e}")))?;
        Ok(config)
    }

    /// Resolves this instance's voter identity: the configured override, or
    /// else the system hostname.
    pub fn resolve_local_host(&self) -> Result<String, SentinelError> {
        if let Some(host) = &self.local_host {
            return Ok(host.clone());
        }
        hostname::get()
            .map_err(|e| SentinelError::Config(format!("reading system hostname: {e}")))?
            .into_string()
            .map_err(|_| SentinelError::Config("system hostname is not valid UTF-8".into()))
    }
}
