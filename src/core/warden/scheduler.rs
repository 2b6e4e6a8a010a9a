// src/core/warden/scheduler.rs

//! The single-threaded reactor: one task that walks every monitored master
//! at a fixed tick rate, driving connection lifecycle, health checks, ODOWN
//! quorum, leader election, and the failover state machine in lockstep.
//!
//! Grounded on the original `worker.rs`'s `MasterMonitor::run` tick loop
//! (kept: ping/info/publish cadence split, TILT detection shape), rebuilt as
//! a single reactor over every monitored master instead of one task per
//! master, per spec.md §4.2 — this supervisor has one opinion about time,
//! not one per master, which is what makes TILT meaningful at all.

use super::client::ConnectionPool;
use super::election::{build_vote_request, can_start_election, election_timed_out, record_vote, start_election, tally_election};
use super::events::{EventBus, WardenEvent};
use super::failover::{
    abort, advance_reconf_stage, finalize_topology_switch, poll_promotion_confirmed, reconf_complete_or_timed_out, select_best_replica,
    select_replicas_to_reconfigure, send_promote, send_slaveof,
};
use super::health::{apply_info_to_primary, apply_info_to_replica, evaluate_sdown, parse_info_replication, process_hello, HelloOutcome};
use super::instance::{FailoverState, Instance, InstanceFlags, ReconfStage, RoleKind};
use super::quorum::{build_cross_check_request, evaluate_odown, prune_stale_replies, record_quorum_reply};
use super::rpc::{HelloMessage, VoteReply, VoteRequest, HELLO_TOPIC};
use super::scripts::ScriptOutcome;
use super::state::{GlobalWardenState, MasterState};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// How long a single `poll_pubsub_message` call may wait for a hello push
/// before moving on to the next instance in this tick's walk.
const PUBSUB_POLL_BUDGET: Duration = Duration::from_millis(5);

fn with_instance<T>(state: &MasterState, role: RoleKind, addr: SocketAddr, f: impl FnOnce(&Instance) -> T) -> Option<T> {
    match role {
        RoleKind::Primary => Some(f(&state.primary)),
        RoleKind::Replica => state.primary.replicas.get(&addr).map(|r| f(r.value())),
        RoleKind::Supervisor => state.primary.supervisors.get(&addr).map(|r| f(r.value())),
    }
}

fn with_instance_mut<T>(state: &mut MasterState, role: RoleKind, addr: SocketAddr, f: impl FnOnce(&mut Instance) -> T) -> Option<T> {
    match role {
        RoleKind::Primary => Some(f(&mut state.primary)),
        RoleKind::Replica => state.primary.replicas.get_mut(&addr).map(|mut r| f(r.value_mut())),
        RoleKind::Supervisor => state.primary.supervisors.get_mut(&addr).map(|mut r| f(r.value_mut())),
    }
}

fn extract_publish_payload(frame: &crate::core::protocol::RespFrame) -> Option<String> {
    use crate::core::protocol::RespFrame;
    if let RespFrame::Array(parts) = frame
        && let Some(RespFrame::BulkString(bs)) = parts.last()
    {
        return Some(String::from_utf8_lossy(bs).to_string());
    }
    None
}

/// The reactor. Owned exclusively by the task `mod.rs` spawns; every
/// per-instance TCP connection lives in `connections`, keyed by address
/// rather than hung off the `Instance` values themselves (those are stored
/// by value inside `DashMap`s and can't own a live socket).
pub struct Scheduler {
    global: Arc<GlobalWardenState>,
    my_runid: String,
    announce_addr: SocketAddr,
    event_bus: EventBus,
    outbound_rx: mpsc::Receiver<super::events::OutboundPublish>,
    script_outcomes: mpsc::Receiver<ScriptOutcome>,
    connections: DashMap<SocketAddr, ConnectionPool>,
}

impl Scheduler {
    pub fn new(
        global: Arc<GlobalWardenState>,
        my_runid: String,
        announce_addr: SocketAddr,
        event_bus: EventBus,
        outbound_rx: mpsc::Receiver<super::events::OutboundPublish>,
        script_outcomes: mpsc::Receiver<ScriptOutcome>,
    ) -> Self {
        Self {
            global,
            my_runid,
            announce_addr,
            event_bus,
            outbound_rx,
            script_outcomes,
            connections: DashMap::new(),
        }
    }

    /// Runs forever at the configured tick rate. Never returns under normal
    /// operation; the caller selects this against a shutdown signal.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.global.hz));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        self.update_tilt(now);
        self.drain_script_outcomes();
        self.drain_outbound_publishes().await;

        if self.global.is_tilt() {
            return;
        }

        let names: Vec<String> = self.global.masters.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let Some(state_arc) = self.global.masters.get(&name).map(|e| e.value().clone()) else {
                continue;
            };
            self.tick_master(&name, &state_arc, now).await;
        }
    }

    /// Delegates the Δ arithmetic to `GlobalWardenState::update_tilt` (kept
    /// there so it's testable without a live `Scheduler`), then fans the
    /// transition, if any, out to every monitored master's event stream.
    fn update_tilt(&self, now: Instant) {
        match self.global.update_tilt(now) {
            Some(true) => {
                warn!("warden entering TILT mode");
                for entry in self.global.masters.iter() {
                    self.event_bus.emit(WardenEvent::TiltEntered { master: entry.key().clone() }, None);
                }
            }
            Some(false) => {
                for entry in self.global.masters.iter() {
                    self.event_bus.emit(WardenEvent::TiltExited { master: entry.key().clone() }, None);
                }
            }
            None => {}
        }
    }

    fn drain_script_outcomes(&mut self) {
        while let Ok(outcome) = self.script_outcomes.try_recv() {
            match outcome {
                ScriptOutcome::Completed { path, exit_code } => {
                    debug!(path, ?exit_code, "warden script completed");
                }
                ScriptOutcome::TimedOut { path } => warn!(path, "warden script timed out"),
                ScriptOutcome::FailedToSpawn { path, detail } => warn!(path, detail, "warden script failed to spawn"),
            }
        }
    }

    /// Publishes every queued event onto the relevant master's own pub/sub,
    /// so clients subscribed there see the sentinel-style `+sdown`/`-odown`/
    /// etc. traffic the same way a client talking straight to the instance
    /// would. Reuses the hello channel connection when one is already open;
    /// a quiet master with no live `pc` simply drops the publish.
    async fn drain_outbound_publishes(&mut self) {
        let mut batch = Vec::new();
        while let Ok(p) = self.outbound_rx.try_recv() {
            batch.push(p);
        }
        for p in batch {
            let Some(entry) = self.global.masters.get(&p.master) else { continue };
            let addr = entry.value().lock().primary.addr;
            if let Some(mut pool) = self.connections.get_mut(&addr)
                && let Some(pc) = pool.pc.as_mut()
            {
                let _ = pc.publish(p.topic, &p.payload).await;
            }
        }
    }

    async fn persist(&self) {
        let snapshot = self.global.snapshot();
        if let Err(e) = snapshot.save(&self.global.config_file_path).await {
            error!("failed to persist warden state: {}", e);
        }
    }

    async fn tick_master(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let (down_after, hello_interval, auth_pass, targets, accelerated) = {
            let state = state_arc.lock();
            let mut targets = vec![(state.primary.addr, RoleKind::Primary)];
            targets.extend(state.primary.replicas.iter().map(|e| (*e.key(), RoleKind::Replica)));
            targets.extend(state.primary.supervisors.iter().map(|e| (*e.key(), RoleKind::Supervisor)));
            let accelerated = state.primary.is_odown() || state.primary.flags.contains(InstanceFlags::FAILOVER_IN_PROGRESS);
            (
                state.config.down_after,
                state.config.hello_interval,
                state.config.auth_pass.clone(),
                targets,
                accelerated,
            )
        };

        let ping_period = down_after.min(Duration::from_secs(1)).max(Duration::from_millis(1));
        let info_period = if accelerated { Duration::from_secs(1) } else { Duration::from_secs(10) };

        for (addr, role) in targets {
            let needs_pubsub = matches!(role, RoleKind::Primary | RoleKind::Replica);
            self.service_instance(
                name,
                state_arc,
                addr,
                role,
                needs_pubsub,
                down_after,
                ping_period,
                info_period,
                hello_interval,
                auth_pass.as_deref(),
                now,
            )
            .await;
        }

        self.run_odown_cross_check(name, state_arc, now).await;
        self.run_election(name, state_arc, now).await;
        self.run_failover(name, state_arc, now).await;
        self.run_drift_reconciliation(state_arc, hello_interval, now).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn service_instance(
        &mut self,
        master_name: &str,
        state_arc: &Arc<Mutex<MasterState>>,
        addr: SocketAddr,
        role: RoleKind,
        needs_pubsub: bool,
        down_after: Duration,
        ping_period: Duration,
        info_period: Duration,
        publish_period: Duration,
        auth_pass: Option<&str>,
        now: Instant,
    ) {
        let my_runid = self.my_runid.clone();

        let Some((due_ping, due_info, due_publish)) = ({
            let state = state_arc.lock();
            with_instance(&state, role, addr, |inst| {
                let due_ping = inst.last_pong_received.map(|t| now.saturating_duration_since(t) >= ping_period).unwrap_or(true);
                let due_info = needs_pubsub && inst.info_refresh_at.map(|t| now.saturating_duration_since(t) >= info_period).unwrap_or(true);
                let due_publish = needs_pubsub && inst.last_pub_sent.map(|t| now.saturating_duration_since(t) >= publish_period).unwrap_or(true);
                (due_ping, due_info, due_publish)
            })
        }) else {
            return;
        };

        let ping_ok;
        let mut parsed_info = None;
        let mut received_hello = None;

        {
            let mut pool = self.connections.entry(addr).or_insert_with(ConnectionPool::new);
            pool.apply_reconnect_policy(down_after, publish_period);

            if pool.cc.is_none() && pool.ensure_command_channel(addr, &my_runid, auth_pass).await.is_err() {
                drop(pool);
                let mut state = state_arc.lock();
                with_instance_mut(&mut state, role, addr, |inst| inst.flags.insert(InstanceFlags::DISCONNECTED));
                return;
            }
            if needs_pubsub && pool.pc.is_none() {
                let _ = pool.ensure_hello_channel(addr, &my_runid, auth_pass, HELLO_TOPIC).await;
            }

            let mut this_ping = None;
            if due_ping && !pool.should_skip_periodic_command() {
                let cc = pool.cc.as_mut().unwrap();
                this_ping = Some(cc.ping().await.is_ok());
                pool.last_ping_on_cc = Some(now);
            }
            ping_ok = this_ping;

            if due_info && !pool.should_skip_periodic_command()
                && let Some(cc) = pool.cc.as_mut()
                && let Ok(text) = cc.info_replication().await
            {
                parsed_info = Some(parse_info_replication(&text));
            }

            if due_publish
                && let Some(pc) = pool.pc.as_mut()
            {
                let hello = self.build_hello(state_arc);
                let _ = pc.publish(HELLO_TOPIC, &hello.encode()).await;
            }

            if needs_pubsub
                && let Some(pc) = pool.pc.as_mut()
                && let Ok(Some(frame)) = pc.poll_pubsub_message(PUBSUB_POLL_BUDGET).await
                && let Some(text) = extract_publish_payload(&frame)
                && let Some(hello) = HelloMessage::parse(&text)
            {
                received_hello = Some(hello);
            }
        }

        let mut state = state_arc.lock();

        if let Some(ok) = ping_ok {
            with_instance_mut(&mut state, role, addr, |inst| {
                if ok {
                    inst.last_pong_received = Some(now);
                    inst.last_avail = now;
                    inst.flags.remove(InstanceFlags::DISCONNECTED);
                } else {
                    inst.flags.insert(InstanceFlags::DISCONNECTED);
                }
            });
        }

        let mut newly_discovered = Vec::new();
        if let Some(parsed) = &parsed_info {
            match role {
                RoleKind::Primary => {
                    let outcome = apply_info_to_primary(&mut state.primary, parsed, now);
                    newly_discovered = outcome.newly_discovered_replicas;
                }
                RoleKind::Replica => {
                    with_instance_mut(&mut state, role, addr, |r| apply_info_to_replica(r, parsed, now));
                }
                RoleKind::Supervisor => {}
            }
        }

        if due_publish {
            with_instance_mut(&mut state, role, addr, |inst| inst.last_pub_sent = Some(now));
        }

        let sdown_transition = if matches!(role, RoleKind::Primary | RoleKind::Replica) {
            with_instance_mut(&mut state, role, addr, |inst| evaluate_sdown(inst, now, info_period)).flatten()
        } else {
            None
        };

        let notif = state.primary.notification_path.clone();
        drop(state);

        for new_addr in newly_discovered {
            self.event_bus.emit(WardenEvent::NewSlave { master: master_name.to_string(), addr: new_addr }, notif.as_deref());
        }
        if let Some(is_down) = sdown_transition {
            let ev = if is_down {
                WardenEvent::Sdown { master: master_name.to_string(), target: addr }
            } else {
                WardenEvent::SdownCleared { master: master_name.to_string(), target: addr }
            };
            self.event_bus.emit(ev, notif.as_deref());
        }

        if let Some(hello) = received_hello {
            let outcome = process_hello(&self.global, &self.global.masters, &hello, now);
            if let HelloOutcome::Applied { dup_evicted, address_switch, .. } = outcome {
                let ev = if dup_evicted {
                    WardenEvent::DupSentinel { master: hello.primary_name.clone(), addr: hello.supervisor_addr() }
                } else {
                    WardenEvent::NewSentinel { master: hello.primary_name.clone(), addr: hello.supervisor_addr() }
                };
                self.event_bus.emit(ev, None);
                if address_switch {
                    self.event_bus.emit(
                        WardenEvent::SwitchMaster { master: hello.primary_name.clone(), old: addr, new: hello.primary_addr() },
                        None,
                    );
                }
            }
        }
    }

    fn build_hello(&self, state_arc: &Arc<Mutex<MasterState>>) -> HelloMessage {
        let state = state_arc.lock();
        HelloMessage {
            supervisor_ip: self.announce_addr.ip(),
            supervisor_port: self.announce_addr.port(),
            supervisor_runid: self.my_runid.clone(),
            supervisor_current_epoch: self.global.current_epoch(),
            primary_name: state.config.name.clone(),
            primary_ip: state.primary.addr.ip(),
            primary_port: state.primary.addr.port(),
            primary_config_epoch: state.primary.config_epoch,
        }
    }

    async fn rpc_call(&mut self, peer_addr: SocketAddr, req: &VoteRequest) -> Option<VoteReply> {
        let mut pool = self.connections.entry(peer_addr).or_insert_with(ConnectionPool::new);
        if pool.cc.is_none() && pool.ensure_command_channel(peer_addr, &self.my_runid, None).await.is_err() {
            return None;
        }
        let cc = pool.cc.as_mut()?;
        let resp = cc.send_and_receive(req.to_resp_command()).await.ok()?;
        VoteReply::from_resp(&resp).ok()
    }

    async fn run_odown_cross_check(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let (should, req, targets) = {
            let mut state = state_arc.lock();
            prune_stale_replies(&mut state, now);
            let should = state.primary.is_sdown() && !state.primary.is_odown();
            let req = if should { Some(build_cross_check_request(&state.primary, self.global.current_epoch())) } else { None };
            let targets: Vec<(SocketAddr, String)> = state
                .primary
                .supervisors
                .iter()
                .map(|e| (*e.key(), e.value().runid.clone().unwrap_or_else(|| e.key().to_string())))
                .collect();
            (should, req, targets)
        };

        if should && let Some(req) = req {
            for (peer_addr, peer_runid) in targets {
                if let Some(reply) = self.rpc_call(peer_addr, &req).await {
                    let mut state = state_arc.lock();
                    record_quorum_reply(&mut state, peer_runid, &reply, now);
                }
            }
        }

        let (transition, target, notif) = {
            let mut state = state_arc.lock();
            let transition = evaluate_odown(&mut state, now);
            (transition, state.primary.addr, state.primary.notification_path.clone())
        };
        if let Some(is_down) = transition {
            let ev = if is_down {
                WardenEvent::Odown { master: name.to_string(), target }
            } else {
                WardenEvent::OdownCleared { master: name.to_string(), target }
            };
            self.event_bus.emit(ev, notif.as_deref());
            self.persist().await;
        }
    }

    async fn run_election(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let should_start = { can_start_election(&state_arc.lock(), now) };
        if should_start {
            let epoch = {
                let mut state = state_arc.lock();
                start_election(&self.global, &mut state, &self.my_runid, now)
            };
            self.persist().await;
            self.event_bus.emit(WardenEvent::NewEpoch { master: name.to_string(), epoch }, None);
        }

        let in_wait_start = { state_arc.lock().primary.failover_state == FailoverState::WaitStart };
        if !in_wait_start {
            return;
        }

        let (req, targets) = {
            let state = state_arc.lock();
            (
                build_vote_request(&state, &self.my_runid),
                state
                    .primary
                    .supervisors
                    .iter()
                    .map(|e| (*e.key(), e.value().runid.clone().unwrap_or_else(|| e.key().to_string())))
                    .collect::<Vec<_>>(),
            )
        };
        for (peer_addr, peer_runid) in targets {
            if let Some(reply) = self.rpc_call(peer_addr, &req).await {
                let mut state = state_arc.lock();
                record_vote(&mut state, peer_runid, &reply, &self.my_runid, now);
            }
        }

        let (won, timed_out, epoch) = {
            let state = state_arc.lock();
            let known = state.primary.supervisors.len() + 1;
            (tally_election(&state, known), election_timed_out(&state, now), state.primary.failover_epoch)
        };

        if won {
            {
                let mut state = state_arc.lock();
                state.primary.failover_state = FailoverState::SelectReplica;
            }
            self.persist().await;
            self.event_bus.emit(WardenEvent::ElectedLeader { master: name.to_string(), epoch }, None);
        } else if timed_out {
            let ev = { abort(&mut state_arc.lock(), "election-timeout") };
            self.event_bus.emit(ev, None);
        }
    }

    async fn run_failover(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let current = { state_arc.lock().primary.failover_state };
        match current {
            FailoverState::None | FailoverState::WaitStart => {}
            FailoverState::SelectReplica => self.failover_select_replica(state_arc).await,
            FailoverState::SendPromote => self.failover_send_promote(state_arc, now).await,
            FailoverState::WaitPromotion => self.failover_wait_promotion(name, state_arc, now).await,
            FailoverState::ReconfReplicas => self.failover_reconf_replicas(name, state_arc, now).await,
            FailoverState::UpdateConfig => self.failover_update_config(state_arc).await,
        }
    }

    async fn failover_select_replica(&mut self, state_arc: &Arc<Mutex<MasterState>>) {
        let now = Instant::now();
        let candidate = {
            let state = state_arc.lock();
            let ping_period = state.config.down_after.min(Duration::from_secs(1)).max(Duration::from_millis(1));
            // A failover already in flight always runs the accelerated 1s INFO cadence.
            select_best_replica(&state.primary, Duration::from_secs(1), ping_period, now)
        };
        match candidate {
            Some(addr) => {
                {
                    let mut state = state_arc.lock();
                    state.primary.promoted_replica = Some(addr);
                    state.primary.failover_state = FailoverState::SendPromote;
                }
                self.persist().await;
            }
            None => {
                let ev = { abort(&mut state_arc.lock(), "no-good-slave") };
                self.event_bus.emit(ev, None);
            }
        }
    }

    async fn failover_send_promote(&mut self, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let (candidate, start, timeout) = {
            let state = state_arc.lock();
            (state.primary.promoted_replica, state.primary.failover_start_time, state.primary.failover_timeout)
        };
        let Some(candidate) = candidate else {
            let ev = { abort(&mut state_arc.lock(), "no-candidate") };
            self.event_bus.emit(ev, None);
            return;
        };
        if send_promote(candidate).await {
            {
                let mut state = state_arc.lock();
                state.primary.failover_state = FailoverState::WaitPromotion;
            }
            self.persist().await;
        } else if start.map(|t| now.saturating_duration_since(t) >= timeout).unwrap_or(true) {
            let ev = { abort(&mut state_arc.lock(), "promote-failed") };
            self.event_bus.emit(ev, None);
        }
    }

    async fn failover_wait_promotion(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let (candidate, start, timeout, epoch) = {
            let state = state_arc.lock();
            (state.primary.promoted_replica, state.primary.failover_start_time, state.primary.failover_timeout, state.primary.failover_epoch)
        };
        let Some(candidate) = candidate else { return };

        if poll_promotion_confirmed(candidate).await {
            {
                let mut state = state_arc.lock();
                state.primary.config_epoch = epoch;
                state.primary.failover_state = FailoverState::ReconfReplicas;
            }
            self.persist().await;
            self.event_bus.emit(WardenEvent::PromotedSlave { master: name.to_string(), addr: candidate }, None);
        } else if start.map(|t| now.saturating_duration_since(t) >= timeout).unwrap_or(true) {
            let ev = { abort(&mut state_arc.lock(), "promotion-timeout") };
            self.event_bus.emit(ev, None);
        }
    }

    async fn failover_reconf_replicas(&mut self, name: &str, state_arc: &Arc<Mutex<MasterState>>, now: Instant) {
        let Some(candidate) = ({ state_arc.lock().primary.promoted_replica }) else {
            let ev = { abort(&mut state_arc.lock(), "no-candidate") };
            self.event_bus.emit(ev, None);
            return;
        };

        let to_send = {
            let state = state_arc.lock();
            select_replicas_to_reconfigure(&state.primary, &state.reconf_progress, state.primary.parallel_syncs)
        };

        for addr in to_send {
            let sent_ok = send_slaveof(addr, candidate).await;
            let mut state = state_arc.lock();
            state.reconf_progress.insert(addr, ReconfStage::Sent);
            state.reconf_sent_at.insert(addr, now);
            drop(state);
            if sent_ok {
                self.event_bus.emit(WardenEvent::SlaveReconfSent { master: name.to_string(), addr }, None);
            }
        }

        let replica_addrs: Vec<SocketAddr> = { state_arc.lock().primary.replicas.iter().map(|e| *e.key()).collect() };
        for addr in replica_addrs {
            let (stage, replica_snapshot, sent_at) = {
                let state = state_arc.lock();
                let stage = state.reconf_progress.get(&addr).copied().unwrap_or(ReconfStage::Pending);
                let snapshot = state.primary.replicas.get(&addr).map(|r| r.value().clone());
                let sent_at = state.reconf_sent_at.get(&addr).copied();
                (stage, snapshot, sent_at)
            };
            if stage == ReconfStage::Pending {
                continue;
            }
            let Some(replica) = replica_snapshot else { continue };
            let (new_stage, timed_out) = advance_reconf_stage(&replica, stage, candidate, sent_at, now);
            if new_stage != stage {
                {
                    let mut state = state_arc.lock();
                    state.reconf_progress.insert(addr, new_stage);
                }
                let ev = match new_stage {
                    ReconfStage::InProgress => Some(WardenEvent::SlaveReconfInprog { master: name.to_string(), addr }),
                    ReconfStage::Done if timed_out => Some(WardenEvent::SlaveReconfTimeout { master: name.to_string(), addr }),
                    ReconfStage::Done => Some(WardenEvent::SlaveReconfDone { master: name.to_string(), addr }),
                    _ => None,
                };
                if let Some(ev) = ev {
                    self.event_bus.emit(ev, None);
                }
            }
        }

        let complete = {
            let state = state_arc.lock();
            let start = state.primary.failover_start_time.unwrap_or(now);
            reconf_complete_or_timed_out(&state.primary, &state.reconf_progress, start, state.primary.failover_timeout, now)
        };
        if complete {
            let mut state = state_arc.lock();
            state.primary.failover_state = FailoverState::UpdateConfig;
        }
    }

    async fn failover_update_config(&mut self, state_arc: &Arc<Mutex<MasterState>>) {
        let Some(candidate) = ({ state_arc.lock().primary.promoted_replica }) else {
            let ev = { abort(&mut state_arc.lock(), "no-candidate") };
            self.event_bus.emit(ev, None);
            return;
        };
        let ev = {
            let mut state = state_arc.lock();
            finalize_topology_switch(&mut state, candidate)
        };
        self.persist().await;
        self.event_bus.emit(ev, None);
    }

    /// Independent of any active failover: corrects a replica that has
    /// self-reported as primary for too long, or whose reported master
    /// host/port no longer matches what's on record. Guarded per-replica so
    /// a slow `SLAVEOF` reply doesn't trigger an overlapping correction.
    async fn run_drift_reconciliation(&mut self, state_arc: &Arc<Mutex<MasterState>>, publish_period: Duration, now: Instant) {
        let (primary_addr, active, candidates) = {
            let state = state_arc.lock();
            let active = state.primary.failover_state != FailoverState::None;
            let primary_addr = state.primary.addr;
            let primary_sdown = state.primary.is_sdown();
            let primary_odown = state.primary.is_odown();
            let window = publish_period * 4;
            let candidates: Vec<SocketAddr> = state
                .primary
                .replicas
                .iter()
                .filter(|e| {
                    if primary_sdown || primary_odown {
                        return false;
                    }
                    let r = e.value();
                    let too_long = r.role_reported_at.map(|since| now.saturating_duration_since(since) > window).unwrap_or(false);
                    let mismatched = r
                        .master_host_reported
                        .as_ref()
                        .is_some_and(|(h, p)| h != &primary_addr.ip().to_string() || *p != primary_addr.port());
                    too_long || mismatched
                })
                .map(|e| *e.key())
                .collect();
            (primary_addr, active, candidates)
        };

        if active {
            return;
        }

        for addr in candidates {
            let guard = {
                let state = state_arc.lock();
                state.reconfigurations_in_progress.entry(addr).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
            };
            let Ok(_permit) = guard.try_lock() else { continue };
            let _ = send_slaveof(addr, primary_addr).await;
        }
    }
}
