// src/core/warden/persistence.rs

//! Durable, line-oriented snapshot of topology/epoch/vote state.
//!
//! Grounded on `core/persistence/spldb_saver.rs`'s temp-file-then-rename
//! save path and `core/cluster/state.rs`'s `save_config`/`from_file` pair,
//! but the serialization format is deliberately the line-oriented grammar
//! spec.md §6 mandates (not JSON) so a deployed Warden's state file stays
//! hand-editable, matching upstream Sentinel operational practice. Every
//! write fsyncs the file and its parent directory before returning, since
//! Invariant 7 requires persistence to precede the action it backs.

use super::errors::WardenError;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSentinel {
    pub ip: IpAddr,
    pub port: u16,
    pub runid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMaster {
    pub name: String,
    pub ip: IpAddr,
    pub port: u16,
    pub quorum: usize,
    pub down_after_ms: u64,
    pub failover_timeout_ms: u64,
    pub parallel_syncs: usize,
    pub auth_pass: Option<String>,
    pub config_epoch: u64,
    pub leader_epoch: u64,
    pub known_slaves: Vec<SocketAddr>,
    pub known_sentinels: Vec<PersistedSentinel>,
}

impl PersistedMaster {
    fn new_bare(name: String, ip: IpAddr, port: u16, quorum: usize) -> Self {
        Self {
            name,
            ip,
            port,
            quorum,
            down_after_ms: 30_000,
            failover_timeout_ms: 180_000,
            parallel_syncs: 1,
            auth_pass: None,
            config_epoch: 0,
            leader_epoch: 0,
            known_slaves: Vec::new(),
            known_sentinels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub current_epoch: u64,
    pub masters: Vec<PersistedMaster>,
}

impl PersistedState {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for m in &self.masters {
            out.push_str(&format!(
                "sentinel monitor {} {} {} {}\n",
                m.name, m.ip, m.port, m.quorum
            ));
            out.push_str(&format!(
                "sentinel down-after-milliseconds {} {}\n",
                m.name, m.down_after_ms
            ));
            out.push_str(&format!(
                "sentinel failover-timeout {} {}\n",
                m.name, m.failover_timeout_ms
            ));
            out.push_str(&format!(
                "sentinel parallel-syncs {} {}\n",
                m.name, m.parallel_syncs
            ));
            if let Some(pass) = &m.auth_pass {
                out.push_str(&format!("sentinel auth-pass {} {}\n", m.name, pass));
            }
            out.push_str(&format!(
                "sentinel config-epoch {} {}\n",
                m.name, m.config_epoch
            ));
            out.push_str(&format!(
                "sentinel leader-epoch {} {}\n",
                m.name, m.leader_epoch
            ));
            for slave in &m.known_slaves {
                out.push_str(&format!(
                    "sentinel known-slave {} {} {}\n",
                    m.name,
                    slave.ip(),
                    slave.port()
                ));
            }
            for s in &m.known_sentinels {
                match &s.runid {
                    Some(runid) => out.push_str(&format!(
                        "sentinel known-sentinel {} {} {} {}\n",
                        m.name, s.ip, s.port, runid
                    )),
                    None => out.push_str(&format!(
                        "sentinel known-sentinel {} {} {}\n",
                        m.name, s.ip, s.port
                    )),
                }
            }
        }
        out.push_str(&format!("sentinel current-epoch {}\n", self.current_epoch));
        out
    }

    pub fn parse(content: &str) -> Result<Self, WardenError> {
        let mut current_epoch = 0u64;
        let mut masters: HashMap<String, PersistedMaster> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (lineno, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let bad_line = || {
                WardenError::InvalidConfig(format!(
                    "malformed warden state file at line {}: '{}'",
                    lineno + 1,
                    line
                ))
            };

            if fields.first() != Some(&"sentinel") {
                return Err(bad_line());
            }
            match fields.get(1).copied() {
                Some("current-epoch") => {
                    current_epoch = fields.get(2).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                }
                Some("monitor") => {
                    let name = fields.get(2).ok_or_else(bad_line)?.to_string();
                    let ip: IpAddr = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    let port: u16 = fields.get(4).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    let quorum: usize = fields.get(5).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    order.push(name.clone());
                    masters.insert(name.clone(), PersistedMaster::new_bare(name, ip, port, quorum));
                }
                Some("down-after-milliseconds") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let ms: u64 = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters.get_mut(*name).ok_or_else(bad_line)?.down_after_ms = ms;
                }
                Some("failover-timeout") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let ms: u64 = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters.get_mut(*name).ok_or_else(bad_line)?.failover_timeout_ms = ms;
                }
                Some("parallel-syncs") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let n: usize = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters.get_mut(*name).ok_or_else(bad_line)?.parallel_syncs = n;
                }
                Some("auth-pass") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let pass = fields.get(3).ok_or_else(bad_line)?.to_string();
                    masters.get_mut(*name).ok_or_else(bad_line)?.auth_pass = Some(pass);
                }
                Some("config-epoch") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let e: u64 = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters.get_mut(*name).ok_or_else(bad_line)?.config_epoch = e;
                }
                Some("leader-epoch") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let e: u64 = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters.get_mut(*name).ok_or_else(bad_line)?.leader_epoch = e;
                }
                Some("known-slave") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let ip: IpAddr = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    let port: u16 = fields.get(4).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    masters
                        .get_mut(*name)
                        .ok_or_else(bad_line)?
                        .known_slaves
                        .push(SocketAddr::new(ip, port));
                }
                Some("known-sentinel") => {
                    let name = fields.get(2).ok_or_else(bad_line)?;
                    let ip: IpAddr = fields.get(3).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    let port: u16 = fields.get(4).and_then(|s| s.parse().ok()).ok_or_else(bad_line)?;
                    let runid = fields.get(5).map(|s| s.to_string());
                    masters
                        .get_mut(*name)
                        .ok_or_else(bad_line)?
                        .known_sentinels
                        .push(PersistedSentinel { ip, port, runid });
                }
                _ => return Err(bad_line()),
            }
        }

        let ordered_masters = order
            .into_iter()
            .filter_map(|name| masters.remove(&name))
            .collect();

        Ok(Self {
            current_epoch,
            masters: ordered_masters,
        })
    }

    /// Atomically rewrites the state file: write to a temp file in the same
    /// directory, fsync the file, rename over the destination, then fsync
    /// the containing directory so the rename itself is durable.
    pub async fn save(&self, path: &str) -> Result<(), WardenError> {
        let dest = Path::new(path);
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = dir.join(format!(
            ".{}.tmp-{}",
            dest.file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("warden.state"),
            std::process::id()
        ));

        let content = self.render();
        let fail = |e: std::io::Error| WardenError::PersistenceFailed(e.to_string());

        {
            let file = tokio::fs::File::create(&temp_path).await.map_err(fail)?;
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(content.as_bytes()).await.map_err(fail)?;
            file.sync_all().await.map_err(fail)?;
        }

        tokio::fs::rename(&temp_path, dest).await.map_err(fail)?;

        if let Ok(dir_file) = tokio::fs::File::open(dir).await {
            let _ = dir_file.sync_all().await;
        }

        Ok(())
    }

    pub async fn load(path: &str) -> Result<Self, WardenError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WardenError::PersistenceFailed(e.to_string()))?;
        Self::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        PersistedState {
            current_epoch: 4,
            masters: vec![PersistedMaster {
                name: "mymaster".to_string(),
                ip: "10.0.0.5".parse().unwrap(),
                port: 6379,
                quorum: 2,
                down_after_ms: 5000,
                failover_timeout_ms: 60000,
                parallel_syncs: 1,
                auth_pass: Some("secret".to_string()),
                config_epoch: 3,
                leader_epoch: 3,
                known_slaves: vec!["10.0.0.6:6379".parse().unwrap()],
                known_sentinels: vec![PersistedSentinel {
                    ip: "10.0.0.9".parse().unwrap(),
                    port: 26379,
                    runid: Some("a".repeat(40)),
                }],
            }],
        }
    }

    #[test]
    fn render_then_parse_round_trips() {
        let state = sample();
        let rendered = state.render();
        let parsed = PersistedState::parse(&rendered).unwrap();
        assert_eq!(state, parsed);
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(PersistedState::parse("garbage line here\n").is_err());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.state");
        let path_str = path.to_str().unwrap();

        let state = sample();
        state.save(path_str).await.unwrap();
        let loaded = PersistedState::load(path_str).await.unwrap();
        assert_eq!(state, loaded);
    }
}
