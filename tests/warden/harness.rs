// tests/warden/harness.rs

//! Shared builders for simulating one or more independent supervisor views
//! without a live data-plane server: Warden's collaborator (the monitored
//! primary/replica instances) is always reached over the network in
//! production, so these tests drive the pure decision functions directly,
//! constructing whatever `MasterState`/`GlobalWardenState`/`Instance` values
//! each scenario needs by hand.

use spineldb::warden::config::MonitoredMaster;
use spineldb::warden::instance::{Instance, InstanceFlags, RoleKind};
use spineldb::warden::state::{GlobalWardenState, MasterState};
use std::net::SocketAddr;
use std::time::Duration;

pub fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

pub fn monitored_master(name: &str, primary_addr: SocketAddr, quorum: usize, parallel_syncs: usize) -> MonitoredMaster {
    MonitoredMaster {
        name: name.to_string(),
        ip: primary_addr.ip().to_string(),
        port: primary_addr.port(),
        quorum,
        down_after: Duration::from_millis(50),
        failover_timeout: Duration::from_secs(60),
        hello_interval: Duration::from_secs(2),
        parallel_syncs,
        auth_pass: None,
        notification_script: None,
        client_reconfig_script: None,
    }
}

/// A fresh `MasterState` for `name`/`primary_addr`, as a single supervisor
/// would hold it right after `sentinel monitor` is applied.
pub fn master_state(name: &str, primary_addr: SocketAddr, quorum: usize, parallel_syncs: usize) -> MasterState {
    MasterState::from_config(monitored_master(name, primary_addr, quorum, parallel_syncs), primary_addr)
}

/// One independent supervisor's process-wide state, as if it were its own
/// Warden instance with its own run ID and epoch clock. `tag` is padded out
/// to a 40-char run ID the same way the inline unit tests do.
pub fn global_for(tag: &str) -> GlobalWardenState {
    let runid: String = tag.chars().cycle().take(40).collect();
    GlobalWardenState::new(runid, 10.0, "warden.state".into())
}

pub fn fresh_replica(port: u16, priority: u32, offset: u64) -> Instance {
    let mut r = Instance::new_peer(RoleKind::Replica, addr(port));
    r.slave_priority = priority;
    r.slave_repl_offset = offset;
    r.info_refresh_at = Some(std::time::Instant::now());
    r.last_pong_received = Some(std::time::Instant::now());
    r.flags.remove(InstanceFlags::DISCONNECTED);
    r
}
