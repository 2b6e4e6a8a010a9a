// src/core/warden/quorum.rs

//! The ODOWN cross-check: once a supervisor judges a PRIMARY SDOWN on its
//! own, it polls peer supervisors with a health-check-only vote RPC and
//! tallies agreement into ODOWN.
//!
//! Grounded on the original `worker.rs`'s `check_failover_status` quorum
//! counting, rebuilt on the real `SENTINEL is-master-down-by-addr` RPC
//! contract (spec.md §4.4) instead of the original's ad hoc pub/sub
//! broadcast-and-match protocol.

use super::instance::Instance;
use super::rpc::{HEALTH_CHECK_ONLY, VoteReply, VoteRequest};
use super::state::MasterState;
use std::time::{Duration, Instant};

/// Judgements gathered over this window count toward a quorum decision;
/// older replies are dropped rather than counted. ODOWN is a *weak*
/// quorum — peers may disagree transiently.
pub const QUORUM_WINDOW: Duration = Duration::from_secs(1);

/// Builds the health-check-only cross-check request for a given primary,
/// using this supervisor's own current epoch (unchanged by a health check).
pub fn build_cross_check_request(primary: &Instance, my_epoch: u64) -> VoteRequest {
    VoteRequest {
        primary_addr: primary.addr,
        req_epoch: my_epoch,
        req_runid: HEALTH_CHECK_ONLY.to_string(),
    }
}

/// Records a peer's reply to the cross-check, keyed by the peer's runid so
/// a later reply from the same peer within the window replaces rather than
/// double-counts its earlier one.
pub fn record_quorum_reply(state: &mut MasterState, peer_runid: String, reply: &VoteReply, now: Instant) {
    state.quorum_replies.insert(peer_runid, (reply.is_down, now));
}

/// Counts self (implicitly down, since a cross-check is only initiated
/// after a local SDOWN judgement) plus every peer reply within the quorum
/// window that agrees.
pub fn count_agreeing(state: &MasterState, now: Instant) -> usize {
    let peers_agreeing = state
        .quorum_replies
        .values()
        .filter(|(is_down, at)| *is_down && now.saturating_duration_since(*at) <= QUORUM_WINDOW)
        .count();
    1 + peers_agreeing
}

/// Evaluates whether the primary should transition to ODOWN given replies
/// gathered so far. Returns `Some(true)`/`Some(false)` only on a transition
/// (edge-triggered, matching `evaluate_sdown`'s shape); `None` when nothing
/// changes.
pub fn evaluate_odown(state: &mut MasterState, now: Instant) -> Option<bool> {
    let was = state.primary.is_odown();

    if !state.primary.is_sdown() {
        // Invariant 6: clearing SDOWN clears ODOWN too (handled in
        // `Instance::set_sdown`), so there's nothing to do here but report
        // if that already flipped it.
        return if was { Some(false) } else { None };
    }

    let agreeing = count_agreeing(state, now);
    let should_be_odown = agreeing >= state.primary.quorum;
    if should_be_odown != was {
        state.primary.set_odown(should_be_odown);
        Some(should_be_odown)
    } else {
        None
    }
}

/// Drops stale quorum replies outside the window, called once per tick
/// before a fresh round of cross-checks goes out.
pub fn prune_stale_replies(state: &mut MasterState, now: Instant) {
    state
        .quorum_replies
        .retain(|_, (_, at)| now.saturating_duration_since(*at) <= QUORUM_WINDOW);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::warden::config::MonitoredMaster;
    use std::net::SocketAddr;

    fn master() -> MasterState {
        let addr: SocketAddr = "10.0.0.5:6379".parse().unwrap();
        let config = MonitoredMaster {
            name: "mymaster".into(),
            ip: addr.ip().to_string(),
            port: addr.port(),
            quorum: 2,
            down_after: Duration::from_secs(5),
            failover_timeout: Duration::from_secs(60),
            hello_interval: Duration::from_secs(2),
            parallel_syncs: 1,
            auth_pass: None,
            notification_script: None,
            client_reconfig_script: None,
        };
        MasterState::from_config(config, addr)
    }

    #[test]
    fn odown_requires_quorum_agreement() {
        let mut state = master();
        state.primary.set_sdown(true);
        let now = Instant::now();

        assert_eq!(evaluate_odown(&mut state, now), None);

        record_quorum_reply(
            &mut state,
            "peer1".into(),
            &VoteReply {
                is_down: true,
                leader_runid: String::new(),
                leader_epoch: 0,
            },
            now,
        );
        // self + 1 agreeing peer == quorum(2)
        assert_eq!(evaluate_odown(&mut state, now), Some(true));
    }

    #[test]
    fn odown_does_not_trigger_without_local_sdown() {
        let mut state = master();
        record_quorum_reply(
            &mut state,
            "peer1".into(),
            &VoteReply {
                is_down: true,
                leader_runid: String::new(),
                leader_epoch: 0,
            },
            Instant::now(),
        );
        assert_eq!(evaluate_odown(&mut state, Instant::now()), None);
        assert!(!state.primary.is_odown());
    }

    #[test]
    fn stale_replies_outside_window_are_pruned() {
        let mut state = master();
        let old = Instant::now() - Duration::from_secs(5);
        record_quorum_reply(
            &mut state,
            "peer1".into(),
            &VoteReply {
                is_down: true,
                leader_runid: String::new(),
                leader_epoch: 0,
            },
            old,
        );
        prune_stale_replies(&mut state, Instant::now());
        assert!(state.quorum_replies.is_empty());
    }
}
