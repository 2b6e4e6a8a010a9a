// src/core/warden/state.rs

//! Process-wide and per-master state for the Warden supervisor.
//!
//! `GlobalWardenState` is the single `Arc` threaded through every task
//! (the reactor, the admin listener); nothing here is a hidden global —
//! see the "Global mutable state" design note.

use super::config::MonitoredMaster;
use super::instance::{FailoverState, Instance, ReconfStage};
use super::persistence::{PersistedMaster, PersistedSentinel, PersistedState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Above this, a single tick's wall-clock gap is treated as a stall or
/// clock jump rather than ordinary scheduling jitter (spec.md §4.8).
const TILT_THRESHOLD: Duration = Duration::from_secs(2);
/// TILT auto-exits once this many ticks have passed without another jump.
const TILT_EXIT_TICKS: u32 = 30;

/// Holds all dynamic state for a single monitored master: the primary
/// Instance (which in turn owns its replicas and known supervisors), plus
/// the bookkeeping needed for quorum gathering and leader election.
pub struct MasterState {
    /// The static configuration for this master, from `warden.toml`.
    pub config: MonitoredMaster,
    /// The primary Instance. Its `replicas`/`supervisors` maps are the
    /// registry for this monitored group.
    pub primary: Instance,
    /// Replies gathered from peers during an ODOWN cross-check: runid ->
    /// (is_down flag, time received). Cleared once a quorum decision is made.
    pub quorum_replies: HashMap<String, (bool, Instant)>,
    /// Votes granted to *this* supervisor as a leader candidate, gathered
    /// during an active election: runid -> time the vote was received.
    pub election_votes: HashMap<String, Instant>,
    /// Wall-clock of the last time this supervisor attempted to start an
    /// election for this master (used for the `2 x failover_timeout` backoff).
    pub last_election_attempt: Option<Instant>,
    /// Wall-clock of the last successfully completed failover.
    pub last_failover_time: Instant,
    /// Per-replica reconfiguration progress during `ReconfReplicas`.
    pub reconf_progress: HashMap<SocketAddr, ReconfStage>,
    /// When each replica's `SLAVEOF` was sent, so a stuck `Sent` stage can
    /// be optimistically advanced past `RECONF_SENT_TIMEOUT`.
    pub reconf_sent_at: HashMap<SocketAddr, Instant>,
    /// Per-replica "a reconfiguration task is already in flight" guard, so
    /// the drift-reconciliation sweep doesn't spawn overlapping tasks for
    /// the same replica. An async mutex, unlike the rest of this struct's
    /// locking: its guard is held across the `SLAVEOF` await itself, which
    /// a `parking_lot::MutexGuard` cannot safely do across a `tokio::spawn`
    /// boundary (it isn't `Send`).
    pub reconfigurations_in_progress: DashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>,
}

impl MasterState {
    pub fn from_config(config: MonitoredMaster, addr: SocketAddr) -> Self {
        let mut primary = Instance::new_primary(
            config.name.clone(),
            addr,
            config.quorum,
            config.parallel_syncs,
            config.down_after,
            config.failover_timeout,
        );
        primary.notification_path = config.notification_script.clone();
        primary.client_reconfig_path = config.client_reconfig_script.clone();

        Self {
            config,
            primary,
            quorum_replies: HashMap::new(),
            election_votes: HashMap::new(),
            last_election_attempt: None,
            // Far in the past, so the first failover isn't blocked by backoff.
            last_failover_time: Instant::now() - std::time::Duration::from_secs(3600 * 24),
            reconf_progress: HashMap::new(),
            reconf_sent_at: HashMap::new(),
            reconfigurations_in_progress: DashMap::new(),
        }
    }

    /// Clears all in-flight failover bookkeeping. Does NOT clear ODOWN —
    /// an abort re-enters the machine on a later tick per Invariant/§4.6.
    pub fn reset_failover_state(&mut self) {
        self.primary.failover_state = FailoverState::None;
        self.primary.failover_start_time = None;
        self.primary.promoted_replica = None;
        self.primary
            .flags
            .remove(super::instance::InstanceFlags::FAILOVER_IN_PROGRESS);
        self.election_votes.clear();
        self.reconf_progress.clear();
        self.reconf_sent_at.clear();
    }
}

/// The top-level, process-wide shared state for a Warden instance.
pub struct GlobalWardenState {
    /// This Warden's own 40-hex-char run ID.
    pub my_run_id: String,
    /// Map from a master's name to its state, guarded individually so that
    /// monitors for different masters don't contend on a single lock.
    pub masters: DashMap<String, Arc<Mutex<MasterState>>>,
    /// Set when the reactor detects a clock jump or stall; suspends
    /// judgement and action while monitoring continues.
    pub tilt: std::sync::atomic::AtomicBool,
    pub tilt_start_time: Mutex<Option<Instant>>,
    /// Wall-clock of the previous reactor tick, used to compute `Δ` for
    /// TILT detection.
    pub previous_tick_time: Mutex<Instant>,
    /// Tick frequency in Hz, randomized ±10% at startup to desynchronize
    /// peer elections (avoid lockstep).
    pub hz: f64,
    /// Where the durable topology/epoch/vote snapshot is rewritten.
    pub config_file_path: String,
    /// The process-wide Lamport epoch clock (spec.md's "current_epoch"),
    /// shared across every monitored master per the persisted
    /// `sentinel current-epoch` grammar. Updated by max-of-observed on
    /// every hello and vote RPC.
    current_epoch: std::sync::atomic::AtomicU64,
}

impl GlobalWardenState {
    pub fn new(my_run_id: String, hz: f64, config_file_path: String) -> Self {
        Self {
            my_run_id,
            masters: DashMap::new(),
            tilt: std::sync::atomic::AtomicBool::new(false),
            tilt_start_time: Mutex::new(None),
            previous_tick_time: Mutex::new(Instant::now()),
            hz,
            config_file_path,
            current_epoch: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn is_tilt(&self) -> bool {
        self.tilt.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Adopts `observed` as the current epoch if it's higher than what's
    /// locally recorded. Returns the epoch in effect afterward.
    pub fn adopt_epoch(&self, observed: u64) -> u64 {
        self.current_epoch
            .fetch_max(observed, std::sync::atomic::Ordering::SeqCst)
            .max(observed)
    }

    /// Edge-triggered TILT check per spec.md §4.8: `Δ = now -
    /// previous_tick_time`; `Δ < 0 || Δ > 2s` enters TILT (judgement and
    /// action suspended; probes keep running), auto-exit after
    /// `30 x ping_period` (approximated here as `30` ticks at `self.hz`)
    /// with no further jump in between. Returns `Some(true)`/`Some(false)`
    /// only on a transition, mirroring `health::evaluate_sdown`'s shape.
    /// Always advances `previous_tick_time`, even when nothing transitions.
    pub fn update_tilt(&self, now: Instant) -> Option<bool> {
        let delta = {
            let mut prev = self.previous_tick_time.lock();
            let delta = now.saturating_duration_since(*prev);
            *prev = now;
            delta
        };

        if delta > TILT_THRESHOLD {
            let was_tilt = self.tilt.swap(true, std::sync::atomic::Ordering::SeqCst);
            if !was_tilt {
                *self.tilt_start_time.lock() = Some(now);
                return Some(true);
            }
            return None;
        }

        if self.is_tilt() {
            let exit_after = Duration::from_secs_f64(TILT_EXIT_TICKS as f64 / self.hz);
            let started = *self.tilt_start_time.lock();
            let clear = started.map(|t| now.saturating_duration_since(t) >= exit_after).unwrap_or(true);
            if clear {
                self.tilt.store(false, std::sync::atomic::Ordering::SeqCst);
                *self.tilt_start_time.lock() = None;
                return Some(false);
            }
        }
        None
    }

    /// Unconditionally bumps the current epoch by one and returns the new
    /// value, used when this supervisor starts its own election.
    pub fn bump_epoch(&self) -> u64 {
        self.current_epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1
    }

    /// Builds the full durable snapshot of every monitored master's
    /// topology/epoch/vote state, per spec.md §6's grammar. Taken before any
    /// vote reply or promotion dispatch is externalized (Invariant 7).
    pub fn snapshot(&self) -> PersistedState {
        let mut masters = Vec::new();
        for entry in self.masters.iter() {
            let locked = entry.value().lock();
            let p = &locked.primary;
            masters.push(PersistedMaster {
                name: p.name.clone(),
                ip: p.addr.ip(),
                port: p.addr.port(),
                quorum: p.quorum,
                down_after_ms: p.down_after_period.as_millis() as u64,
                failover_timeout_ms: p.failover_timeout.as_millis() as u64,
                parallel_syncs: p.parallel_syncs,
                auth_pass: locked.config.auth_pass.clone(),
                config_epoch: p.config_epoch,
                leader_epoch: p.leader_epoch,
                known_slaves: p.replicas.iter().map(|e| *e.key()).collect(),
                known_sentinels: p
                    .supervisors
                    .iter()
                    .map(|e| PersistedSentinel {
                        ip: e.key().ip(),
                        port: e.key().port(),
                        runid: e.value().runid.clone(),
                    })
                    .collect(),
            });
        }
        PersistedState {
            current_epoch: self.current_epoch(),
            masters,
        }
    }
}
