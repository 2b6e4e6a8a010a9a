// src/core/warden/failover.rs

//! The failover state machine: replica selection, promotion, per-replica
//! reconfiguration bounded by `parallel_syncs`, termination, abort, and
//! drift reconciliation that runs independent of any active failover.
//!
//! Grounded on the original `failover.rs` (kept: `select_best_replica`'s
//! ranking shape and `wait_for_promotion`'s poll-for-role idiom), rebuilt
//! against the `Instance`/`MasterState`/`ReconfStage` split and extended to
//! the full seven-state machine and `parallel_syncs` gating spec.md §4.6
//! requires, neither of which the original had.

use super::client::WardenClient;
use super::events::WardenEvent;
use super::health::{parse_info_replication, rebuild_replicas_after_switch, ReportedRole};
use super::instance::{Instance, InstanceFlags, ReconfStage};
use super::state::MasterState;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const INFO_STALE_MULTIPLIER_NORMAL: u32 = 3;
const INFO_STALE_MULTIPLIER_PRIMARY_SDOWN: u32 = 5;
const PING_STALE_MULTIPLIER: u32 = 5;
/// A replica still `Sent` after this long is optimistically marked `Done`
/// rather than blocking the whole reconfiguration stage on it forever.
const RECONF_SENT_TIMEOUT: Duration = Duration::from_secs(10);

fn drift_window(publish_period: Duration) -> Duration {
    publish_period * 4
}

/// Filters and ranks a primary's replica set per spec.md §4.6, returning
/// the best candidate's address, if any survive the filter.
///
/// Excluded: SDOWN/ODOWN/disconnected replicas, `slave_priority == 0`
/// (opted out of promotion), INFO older than the stale multiplier (wider
/// while the primary itself is SDOWN, since INFO polling is throttled on a
/// down link), PING older than `5 x ping_period`, and a replication link
/// that's been down longer than the primary has been SDOWN plus a margin.
///
/// Ranking: lower `slave_priority` first, then higher `slave_repl_offset`,
/// then lexicographically smaller `runid` as the final tiebreak.
pub fn select_best_replica(primary: &Instance, info_period: Duration, ping_period: Duration, now: Instant) -> Option<SocketAddr> {
    let primary_sdown = primary.is_sdown();
    let info_stale_multiplier = if primary_sdown {
        INFO_STALE_MULTIPLIER_PRIMARY_SDOWN
    } else {
        INFO_STALE_MULTIPLIER_NORMAL
    };

    let mut candidates: Vec<(SocketAddr, u32, u64, String)> = primary
        .replicas
        .iter()
        .filter_map(|entry| {
            let addr = *entry.key();
            let r = entry.value();

            if r.is_sdown() || r.is_odown() || r.flags.contains(InstanceFlags::DISCONNECTED) {
                return None;
            }
            if r.slave_priority == 0 {
                return None;
            }
            let info_fresh = r
                .info_refresh_at
                .map(|t| now.saturating_duration_since(t) <= info_period * info_stale_multiplier)
                .unwrap_or(false);
            if !info_fresh {
                return None;
            }
            let ping_fresh = r
                .last_pong_received
                .map(|t| now.saturating_duration_since(t) <= ping_period * PING_STALE_MULTIPLIER)
                .unwrap_or(false);
            if !ping_fresh {
                return None;
            }
            if let Some(sdown_since) = primary.sdown_since {
                let link_down = Duration::from_millis(r.master_link_down_ms.unwrap_or(0));
                let bound = now.saturating_duration_since(sdown_since) + primary.down_after_period * 10;
                if link_down > bound {
                    return None;
                }
            }

            Some((addr, r.slave_priority, r.slave_repl_offset, r.runid.clone().unwrap_or_default()))
        })
        .collect();

    candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.cmp(&a.2)).then_with(|| a.3.cmp(&b.3)));
    candidates.into_iter().next().map(|(addr, ..)| addr)
}

/// Sends `REPLICAOF NO ONE` (the promotion command, spelled `SLAVEOF` in
/// spec terms) to the selected candidate and asks it to persist the change.
pub async fn send_promote(candidate_addr: SocketAddr) -> bool {
    match WardenClient::connect(candidate_addr).await {
        Ok(mut client) => client.slaveof_no_one().await.is_ok() && client.config_rewrite().await.is_ok(),
        Err(_) => false,
    }
}

/// Polls the candidate's `INFO replication` once, returning `true` the
/// moment it reports `role:master`. One attempt per call: the reactor tick
/// is the retry loop, there is no internal sleep here.
pub async fn poll_promotion_confirmed(candidate_addr: SocketAddr) -> bool {
    let Ok(mut client) = WardenClient::connect(candidate_addr).await else {
        return false;
    };
    let Ok(info) = client.info_replication().await else {
        return false;
    };
    parse_info_replication(&info).role == Some(ReportedRole::Primary)
}

/// Picks up to as many pending replicas as there are free `parallel_syncs`
/// slots, skipping any already SDOWN (they'll reconcile on their own once
/// they recover, per the drift sweep).
pub fn select_replicas_to_reconfigure(
    primary: &Instance,
    reconf_progress: &std::collections::HashMap<SocketAddr, ReconfStage>,
    parallel_syncs: usize,
) -> Vec<SocketAddr> {
    let in_flight = reconf_progress
        .values()
        .filter(|s| matches!(s, ReconfStage::Sent | ReconfStage::InProgress))
        .count();
    let slots = parallel_syncs.saturating_sub(in_flight);
    if slots == 0 {
        return Vec::new();
    }

    primary
        .replicas
        .iter()
        .filter(|e| {
            let addr = *e.key();
            !e.value().is_sdown()
                && matches!(reconf_progress.get(&addr).copied().unwrap_or(ReconfStage::Pending), ReconfStage::Pending)
        })
        .take(slots)
        .map(|e| *e.key())
        .collect()
}

pub async fn send_slaveof(replica_addr: SocketAddr, new_primary: SocketAddr) -> bool {
    match WardenClient::connect(replica_addr).await {
        Ok(mut client) => client.slaveof(&new_primary.ip().to_string(), new_primary.port()).await.is_ok(),
        Err(_) => false,
    }
}

/// Advances a replica's reconf stage by inspecting its last-known INFO
/// (refreshed by `health.rs` at the accelerated 1s cadence while a failover
/// is in flight): `Sent -> InProgress` once it reports the new primary's
/// host/port, `InProgress -> Done` once its link comes back up. A replica
/// still `Sent` past `RECONF_SENT_TIMEOUT` is optimistically bumped straight
/// to `Done` so one slow replica doesn't stall the whole stage.
pub fn advance_reconf_stage(replica: &Instance, stage: ReconfStage, new_primary: SocketAddr, sent_at: Option<Instant>, now: Instant) -> (ReconfStage, bool) {
    match stage {
        ReconfStage::Pending => (stage, false),
        ReconfStage::Sent => {
            let reports_new_primary = replica
                .master_host_reported
                .as_ref()
                .is_some_and(|(h, p)| h == &new_primary.ip().to_string() && *p == new_primary.port());
            if reports_new_primary {
                (ReconfStage::InProgress, false)
            } else if sent_at.map(|t| now.saturating_duration_since(t) >= RECONF_SENT_TIMEOUT).unwrap_or(false) {
                (ReconfStage::Done, true)
            } else {
                (stage, false)
            }
        }
        ReconfStage::InProgress => {
            if replica.master_link_up {
                (ReconfStage::Done, false)
            } else {
                (stage, false)
            }
        }
        ReconfStage::Done => (ReconfStage::Done, false),
    }
}

/// Independent of any active failover: re-enrolls a replica that has
/// self-reported as a primary for too long, or corrects one reporting a
/// master host/port that doesn't match what's on record. Only runs when
/// the recorded primary "looks sane" (not itself SDOWN/ODOWN), since drift
/// reconciliation isn't a substitute for a real failover.
pub fn needs_drift_reconciliation(primary: &Instance, replica: &Instance, publish_period: Duration, now: Instant) -> bool {
    if primary.is_sdown() || primary.is_odown() {
        return false;
    }
    let window = drift_window(publish_period);

    let self_reported_primary_too_long = replica
        .role_reported_at
        .map(|since| now.saturating_duration_since(since) > window)
        .unwrap_or(false);

    let mismatched_master = replica.master_host_reported.as_ref().is_some_and(|(h, p)| h != &primary.addr.ip().to_string() || *p != primary.addr.port());

    self_reported_primary_too_long || mismatched_master
}

/// Clears all in-flight failover bookkeeping without touching ODOWN — an
/// abort simply lets the machine re-enter on a later tick once the election
/// backoff window passes (spec.md §4.6 Abort semantics).
pub fn abort(state: &mut MasterState, reason: &'static str) -> WardenEvent {
    let master = state.config.name.clone();
    state.reset_failover_state();
    WardenEvent::FailoverAbort { master, reason }
}

/// `RECONF_REPLICAS -> UPDATE_CONFIG` condition: every non-SDOWN replica
/// reached `Done`, or `failover_timeout` has elapsed since the failover
/// started (in which case the caller best-effort broadcasts `SLAVEOF` to
/// any stragglers before moving on).
pub fn reconf_complete_or_timed_out(
    primary: &Instance,
    reconf_progress: &std::collections::HashMap<SocketAddr, ReconfStage>,
    failover_start: Instant,
    failover_timeout: Duration,
    now: Instant,
) -> bool {
    let timed_out = now.saturating_duration_since(failover_start) >= failover_timeout;
    let all_done = primary
        .replicas
        .iter()
        .filter(|e| !e.value().is_sdown())
        .all(|e| matches!(reconf_progress.get(e.key()).copied().unwrap_or(ReconfStage::Pending), ReconfStage::Done));
    timed_out || all_done
}

/// `UPDATE_CONFIG`'s terminal transition: swaps the primary's address to
/// the promoted replica, rebuilds the replica set the same way a
/// hello-driven address switch does, and clears all failover bookkeeping.
/// `config_epoch` was already raised to `failover_epoch` at promotion
/// confirmation, which is what lets peers independently adopt this switch
/// from a hello record alone (spec.md §4.3) even if they missed the event.
pub fn finalize_topology_switch(state: &mut MasterState, new_primary_addr: SocketAddr) -> WardenEvent {
    let old_addr = state.primary.addr;
    state.primary.addr = new_primary_addr;
    rebuild_replicas_after_switch(&mut state.primary, old_addr, new_primary_addr);
    state.reset_failover_state();
    state.last_failover_time = Instant::now();
    WardenEvent::SwitchMaster {
        master: state.config.name.clone(),
        old: old_addr,
        new: new_primary_addr,
    }
}
