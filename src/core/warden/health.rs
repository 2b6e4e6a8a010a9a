// src/core/warden/health.rs

//! SDOWN detection, INFO-reply parsing, and hello-bus processing.
//!
//! Grounded on the original `worker.rs`'s `parse_and_update_state` and
//! `process_hello_message` (kept: line-oriented INFO scan, dedup-on-hello
//! shape), rewritten against the new `Instance`/`MasterState` split and
//! the Lamport epoch clock on `GlobalWardenState`.

use super::instance::{Instance, InstanceFlags, RoleKind, dedupe_and_insert_supervisor};
use super::rpc::HelloMessage;
use super::state::{GlobalWardenState, MasterState};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The role a peer self-reports in its `INFO replication` reply, distinct
/// from `RoleKind`, which is what *this* supervisor has on record for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedRole {
    Primary,
    Replica,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedInfo {
    pub run_id: Option<String>,
    pub role: Option<ReportedRole>,
    pub master_link_up: Option<bool>,
    pub master_link_down_since_seconds: Option<u64>,
    pub master_host: Option<(String, u16)>,
    pub slave_priority: Option<u32>,
    pub slave_repl_offset: Option<u64>,
    /// `(ip, port)` for each `slave<N>:` entry, present only on a primary's reply.
    pub replicas: Vec<(IpAddr, u16)>,
}

/// Parses an `INFO replication` bulk reply. Unknown/unsupported lines are
/// ignored rather than rejected, since monitored instances may carry
/// sections this supervisor doesn't care about.
pub fn parse_info_replication(text: &str) -> ParsedInfo {
    let mut info = ParsedInfo::default();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "run_id" => info.run_id = Some(value.to_string()),
            "role" => {
                info.role = match value {
                    "master" => Some(ReportedRole::Primary),
                    "slave" => Some(ReportedRole::Replica),
                    _ => None,
                };
            }
            "master_link_status" => info.master_link_up = Some(value == "up"),
            "master_link_down_since_seconds" => {
                info.master_link_down_since_seconds = value.parse().ok();
            }
            "master_host" => {
                // Paired with `master_port` on the following line in real
                // replies; stash the host half and fill in the port below.
                info.master_host = Some((value.to_string(), 0));
            }
            "master_port" => {
                if let Some((host, _)) = info.master_host.take() {
                    if let Ok(port) = value.parse() {
                        info.master_host = Some((host, port));
                    }
                }
            }
            "slave_priority" => info.slave_priority = value.parse().ok(),
            "slave_repl_offset" => info.slave_repl_offset = value.parse().ok(),
            key if key.starts_with("slave") => {
                if let Some((ip, port)) = parse_slave_line(value) {
                    info.replicas.push((ip, port));
                }
            }
            _ => {}
        }
    }
    info
}

/// Parses a `slaveN:` value list like `ip=10.0.0.2,port=6380,state=online,...`.
fn parse_slave_line(value: &str) -> Option<(IpAddr, u16)> {
    let mut ip = None;
    let mut port = None;
    for kv in value.split(',') {
        let (k, v) = kv.split_once('=')?;
        match k {
            "ip" => ip = v.parse::<IpAddr>().ok(),
            "port" => port = v.parse::<u16>().ok(),
            _ => {}
        }
    }
    Some((ip?, port?))
}

/// Updates an Instance's reported-role-contradiction tracking. `role_reported_at`
/// holds the time a contradiction began, mirroring `sdown_since`'s
/// edge-triggered shape; it is cleared the moment the report is consistent
/// again.
fn record_reported_role(instance: &mut Instance, reported: ReportedRole, now: Instant) {
    let contradicts = matches!(
        (instance.role_kind, reported),
        (RoleKind::Primary, ReportedRole::Replica) | (RoleKind::Replica, ReportedRole::Primary)
    );
    if contradicts {
        if instance.role_reported_at.is_none() {
            instance.role_reported_at = Some(now);
        }
    } else {
        instance.role_reported_at = None;
    }
}

/// Edge-triggered SDOWN evaluation for a PRIMARY or REPLICA. Returns
/// `Some(new_value)` only on a transition; callers emit `+sdown`/`-sdown`
/// only then. Supervisors are never evaluated here — the spec scopes SDOWN
/// to monitored data-plane peers only.
pub fn evaluate_sdown(instance: &mut Instance, now: Instant, info_period: Duration) -> Option<bool> {
    let was = instance.is_sdown();
    let timed_out = now.saturating_duration_since(instance.last_avail) > instance.down_after_period;
    let role_contradiction = instance
        .role_reported_at
        .map(|since| now.saturating_duration_since(since) > instance.down_after_period + info_period * 2)
        .unwrap_or(false);
    let is_down = timed_out || role_contradiction;
    if is_down != was {
        instance.set_sdown(is_down);
        Some(is_down)
    } else {
        None
    }
}

pub struct InfoApplyOutcome {
    pub restarted: bool,
    pub newly_discovered_replicas: Vec<SocketAddr>,
}

fn apply_run_id_and_role(instance: &mut Instance, parsed: &ParsedInfo, now: Instant) -> bool {
    let restarted = matches!((&instance.runid, &parsed.run_id), (Some(old), Some(new)) if old != new);
    if let Some(rid) = &parsed.run_id {
        instance.runid = Some(rid.clone());
    }
    if let Some(role) = parsed.role {
        record_reported_role(instance, role, now);
    }
    instance.info_refresh_at = Some(now);
    restarted
}

/// Applies a primary's own `INFO replication` reply: tracks restart via
/// `run_id` change and lazily discovers previously-unknown replicas.
pub fn apply_info_to_primary(primary: &mut Instance, parsed: &ParsedInfo, now: Instant) -> InfoApplyOutcome {
    let restarted = apply_run_id_and_role(primary, parsed, now);

    let mut newly_discovered = Vec::new();
    for (ip, port) in &parsed.replicas {
        let addr = SocketAddr::new(*ip, *port);
        if !primary.replicas.contains_key(&addr) {
            primary
                .replicas
                .insert(addr, Instance::new_peer(RoleKind::Replica, addr));
            newly_discovered.push(addr);
        }
    }

    InfoApplyOutcome {
        restarted,
        newly_discovered_replicas: newly_discovered,
    }
}

/// Applies a replica's `INFO replication` reply, refreshing the
/// replication-view fields `failover.rs`'s ranking reads.
pub fn apply_info_to_replica(replica: &mut Instance, parsed: &ParsedInfo, now: Instant) -> bool {
    let restarted = apply_run_id_and_role(replica, parsed, now);
    if let Some(ms) = parsed.master_link_down_since_seconds {
        replica.master_link_down_ms = Some(ms.saturating_mul(1000));
    }
    if let Some(up) = parsed.master_link_up {
        replica.master_link_up = up;
    }
    if let Some(p) = parsed.slave_priority {
        replica.slave_priority = p;
    }
    if let Some(off) = parsed.slave_repl_offset {
        replica.slave_repl_offset = off;
    }
    if parsed.master_host.is_some() {
        replica.master_host_reported = parsed.master_host.clone();
    }
    restarted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloOutcome {
    UnknownMaster,
    Applied {
        dup_evicted: bool,
        epoch_adopted: bool,
        address_switch: bool,
    },
}

/// Rebuilds a primary's replica set after an address switch: every
/// previously-known replica address is preserved, the old primary address
/// is added as a replica (it is presumed demoted), and the new primary's
/// own address is excluded from the set.
pub(super) fn rebuild_replicas_after_switch(primary: &mut Instance, old_primary_addr: SocketAddr, new_primary_addr: SocketAddr) {
    if old_primary_addr != new_primary_addr && !primary.replicas.contains_key(&old_primary_addr) {
        primary
            .replicas
            .insert(old_primary_addr, Instance::new_peer(RoleKind::Replica, old_primary_addr));
    }
    primary.replicas.remove(&new_primary_addr);
}

/// Processes one hello-bus record against the full registry, per spec.md
/// §4.3: unknown-master discard, supervisor dedup-and-insert, epoch
/// adoption, and address switch on a higher advertised `master_config_epoch`.
pub fn process_hello(
    global: &GlobalWardenState,
    masters: &dashmap::DashMap<String, Arc<Mutex<MasterState>>>,
    hello: &HelloMessage,
    now: Instant,
) -> HelloOutcome {
    let Some(entry) = masters.get(&hello.primary_name) else {
        return HelloOutcome::UnknownMaster;
    };
    let mut state = entry.lock();
    let primary = &mut state.primary;

    let dup_evicted =
        dedupe_and_insert_supervisor(&primary.supervisors, hello.supervisor_addr(), &hello.supervisor_runid);
    if let Some(mut sup) = primary.supervisors.get_mut(&hello.supervisor_addr()) {
        sup.last_hello_received = Some(now);
    }

    let epoch_adopted = hello.supervisor_current_epoch > global.current_epoch();
    global.adopt_epoch(hello.supervisor_current_epoch);

    let advertised_addr = hello.primary_addr();
    let address_switch = hello.primary_config_epoch > primary.config_epoch && advertised_addr != primary.addr;
    if address_switch {
        let old_addr = primary.addr;
        primary.addr = advertised_addr;
        primary.config_epoch = hello.primary_config_epoch;
        primary.flags.remove(InstanceFlags::FAILOVER_IN_PROGRESS);
        primary.failover_state = super::instance::FailoverState::None;
        primary.promoted_replica = None;
        rebuild_replicas_after_switch(primary, old_addr, advertised_addr);
    }

    HelloOutcome::Applied {
        dup_evicted,
        epoch_adopted,
        address_switch,
    }
}
