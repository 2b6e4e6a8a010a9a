// src/core/warden/instance.rs

//! The Instance model: the unit the Registry tracks, whether it's a
//! monitored primary, one of its replicas, or a peer supervisor.

use bitflags::bitflags;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// What kind of peer an `Instance` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Primary,
    Replica,
    Supervisor,
}

bitflags! {
    /// Additive state flags layered on top of an Instance's `RoleKind`.
    /// Mirrors `core/cluster/state.rs`'s `NodeFlags` shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct InstanceFlags: u16 {
        const DISCONNECTED         = 1 << 0;
        const HANDSHAKE            = 1 << 1;
        const SDOWN                = 1 << 2;
        const ODOWN                = 1 << 3;
        const MASTER_DOWN_VOTE     = 1 << 4;
        const FAILOVER_IN_PROGRESS = 1 << 5;
        const PROMOTED             = 1 << 6;
        const RECONF_SENT          = 1 << 7;
        const RECONF_INPROG        = 1 << 8;
        const RECONF_DONE          = 1 << 9;
        const FORCE_FAILOVER       = 1 << 10;
    }
}

/// The various stages of an in-flight failover, keyed on the primary's
/// `Instance::failover_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    None,
    WaitStart,
    SelectReplica,
    SendPromote,
    WaitPromotion,
    ReconfReplicas,
    UpdateConfig,
}

/// Per-replica progress during the `ReconfReplicas` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfStage {
    Pending,
    Sent,
    InProgress,
    Done,
}

/// A monitored peer: a primary, one of its replicas, or a peer supervisor.
///
/// Replicas and supervisors are owned by value inside their primary's
/// `replicas`/`supervisors` maps (see `GlobalWardenState`/`MasterState` in
/// `state.rs`); there is no back-pointer to the primary held as a reference
/// — code that needs the owning primary's data looks it up by name/key, per
/// the "cyclic ownership" design note.
#[derive(Debug, Clone)]
pub struct Instance {
    pub role_kind: RoleKind,
    /// User-assigned for primaries; derived `host:port` for replicas/supervisors.
    pub name: String,
    /// 40-hex-char identity advertised by the remote. Absent until first reply.
    pub runid: Option<String>,
    /// Monotonic topology stamp. Only meaningful (and only increases) for primaries.
    pub config_epoch: u64,
    pub addr: SocketAddr,
    pub flags: InstanceFlags,

    pub ctime: Instant,
    pub last_ping_sent: Option<Instant>,
    pub last_pong_received: Option<Instant>,
    pub last_avail: Instant,
    pub last_pub_sent: Option<Instant>,
    pub last_hello_received: Option<Instant>,
    pub sdown_since: Option<Instant>,
    pub odown_since: Option<Instant>,
    pub role_reported_at: Option<Instant>,
    pub info_refresh_at: Option<Instant>,

    // --- Replication view (meaningful for RoleKind::Replica) ---
    pub master_link_down_ms: Option<u64>,
    pub slave_priority: u32,
    pub slave_repl_offset: u64,
    pub master_host_reported: Option<(String, u16)>,
    pub master_link_up: bool,

    // --- Failover state (meaningful for RoleKind::Primary) ---
    pub quorum: usize,
    pub parallel_syncs: usize,
    pub down_after_period: std::time::Duration,
    pub failover_timeout: std::time::Duration,
    pub failover_state: FailoverState,
    pub failover_epoch: u64,
    pub failover_start_time: Option<Instant>,
    pub promoted_replica: Option<SocketAddr>,
    pub leader_runid: Option<String>,
    pub leader_epoch: u64,

    // --- Sub-registries (meaningful for RoleKind::Primary) ---
    pub replicas: DashMap<SocketAddr, Instance>,
    pub supervisors: DashMap<SocketAddr, Instance>,

    // --- Scripts (meaningful for RoleKind::Primary) ---
    pub notification_path: Option<String>,
    pub client_reconfig_path: Option<String>,
}

impl Instance {
    /// A fresh Instance for a primary seeded from static configuration.
    pub fn new_primary(
        name: String,
        addr: SocketAddr,
        quorum: usize,
        parallel_syncs: usize,
        down_after_period: std::time::Duration,
        failover_timeout: std::time::Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            role_kind: RoleKind::Primary,
            name,
            runid: None,
            config_epoch: 0,
            addr,
            flags: InstanceFlags::DISCONNECTED,
            ctime: now,
            last_ping_sent: None,
            last_pong_received: None,
            last_avail: now,
            last_pub_sent: None,
            last_hello_received: None,
            sdown_since: None,
            odown_since: None,
            role_reported_at: None,
            info_refresh_at: None,
            master_link_down_ms: None,
            slave_priority: 0,
            slave_repl_offset: 0,
            master_host_reported: None,
            master_link_up: false,
            quorum,
            parallel_syncs,
            down_after_period,
            failover_timeout,
            failover_state: FailoverState::None,
            failover_epoch: 0,
            failover_start_time: None,
            promoted_replica: None,
            leader_runid: None,
            leader_epoch: 0,
            replicas: DashMap::new(),
            supervisors: DashMap::new(),
            notification_path: None,
            client_reconfig_path: None,
        }
    }

    /// A freshly discovered replica or supervisor, named `host:port`.
    pub fn new_peer(role_kind: RoleKind, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            role_kind,
            name: addr.to_string(),
            runid: None,
            config_epoch: 0,
            addr,
            flags: InstanceFlags::DISCONNECTED,
            ctime: now,
            last_ping_sent: None,
            last_pong_received: None,
            last_avail: now,
            last_pub_sent: None,
            last_hello_received: None,
            sdown_since: None,
            odown_since: None,
            role_reported_at: None,
            info_refresh_at: None,
            master_link_down_ms: None,
            slave_priority: 0,
            slave_repl_offset: 0,
            master_host_reported: None,
            master_link_up: false,
            quorum: 0,
            parallel_syncs: 0,
            down_after_period: std::time::Duration::ZERO,
            failover_timeout: std::time::Duration::ZERO,
            failover_state: FailoverState::None,
            failover_epoch: 0,
            failover_start_time: None,
            promoted_replica: None,
            leader_runid: None,
            leader_epoch: 0,
            replicas: DashMap::new(),
            supervisors: DashMap::new(),
            notification_path: None,
            client_reconfig_path: None,
        }
    }

    pub fn is_sdown(&self) -> bool {
        self.flags.contains(InstanceFlags::SDOWN)
    }

    pub fn is_odown(&self) -> bool {
        self.flags.contains(InstanceFlags::ODOWN)
    }

    pub fn set_sdown(&mut self, on: bool) {
        if on {
            self.flags.insert(InstanceFlags::SDOWN);
            if self.sdown_since.is_none() {
                self.sdown_since = Some(Instant::now());
            }
        } else {
            self.flags.remove(InstanceFlags::SDOWN);
            self.sdown_since = None;
            // Removing SDOWN forces re-evaluation of ODOWN (Invariant 6).
            if self.is_odown() {
                self.set_odown(false);
            }
        }
    }

    pub fn set_odown(&mut self, on: bool) {
        if on {
            self.flags.insert(InstanceFlags::ODOWN);
            if self.odown_since.is_none() {
                self.odown_since = Some(Instant::now());
            }
        } else {
            self.flags.remove(InstanceFlags::ODOWN);
            self.odown_since = None;
        }
    }
}

/// Inserts a newly discovered supervisor under a primary's `supervisors`
/// map, enforcing Invariant 1: unique by `runid` OR `host:port`. Any
/// existing entries matching either key are evicted first (dedup is a
/// precondition for vote counting). Returns `true` if a prior entry was
/// evicted (the caller emits a `-dup-sentinel` event in that case).
pub fn dedupe_and_insert_supervisor(
    supervisors: &DashMap<SocketAddr, Instance>,
    new_addr: SocketAddr,
    new_runid: &str,
) -> bool {
    let mut evicted = false;
    let stale_addrs: Vec<SocketAddr> = supervisors
        .iter()
        .filter(|e| {
            let existing = e.value();
            *e.key() == new_addr
                || existing
                    .runid
                    .as_deref()
                    .is_some_and(|r| r == new_runid)
        })
        .map(|e| *e.key())
        .collect();

    for addr in stale_addrs {
        supervisors.remove(&addr);
        evicted = true;
    }

    let mut fresh = Instance::new_peer(RoleKind::Supervisor, new_addr);
    fresh.runid = Some(new_runid.to_string());
    fresh.last_hello_received = Some(Instant::now());
    supervisors.insert(new_addr, fresh);
    evicted
}
