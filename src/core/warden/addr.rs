// src/core/warden/addr.rs

//! Address resolution for Warden-monitored instances.
//!
//! Hostnames are resolved once, at ingest time: on bootstrap from
//! `warden.toml`, and whenever a new peer is discovered via INFO or the
//! hello bus. No lookup ever happens on the reactor thread mid-tick.

use super::errors::WardenError;
use std::fmt;
use std::net::SocketAddr;

/// A host/port pair as configured or advertised, prior to resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WardenAddress {
    pub host: String,
    pub port: u16,
}

impl WardenAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves this address to a concrete `SocketAddr`. Called once at
    /// ingest; callers decide whether a failure is fatal (config load) or
    /// soft (runtime rediscovery, where the instance is kept and marked
    /// disconnected instead of being dropped).
    pub async fn resolve(&self) -> Result<SocketAddr, WardenError> {
        let target = format!("{}:{}", self.host, self.port);
        tokio::net::lookup_host(&target)
            .await
            .map_err(|e| WardenError::Network {
                addr: target.clone(),
                source: std::sync::Arc::new(e),
            })?
            .next()
            .ok_or_else(|| {
                WardenError::InvalidConfig(format!("no addresses found for {target}"))
            })
    }
}

impl fmt::Display for WardenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for WardenAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}
