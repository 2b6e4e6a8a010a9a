// tests/warden/scenarios_test.rs

//! The six end-to-end scenarios a monitoring deployment must get right,
//! each driven through the pure state-machine functions across one or more
//! simulated supervisor views.

use super::harness::{addr, fresh_replica, global_for, master_state};
use spineldb::warden::election::{
    build_vote_request, can_start_election, handle_vote_request, record_vote, start_election, tally_election,
};
use spineldb::warden::failover::{
    abort, advance_reconf_stage, finalize_topology_switch, needs_drift_reconciliation, reconf_complete_or_timed_out,
    select_best_replica, select_replicas_to_reconfigure,
};
use spineldb::warden::health::process_hello;
use spineldb::warden::instance::{dedupe_and_insert_supervisor, FailoverState, InstanceFlags, ReconfStage};
use spineldb::warden::rpc::HelloMessage;
use std::time::{Duration, Instant};

/// Scenario 1: a primary with two replicas goes down, three supervisors
/// agree on ODOWN, one of them wins the election, promotes the
/// better-ranked replica, and reconfigures the other.
#[test]
fn happy_path_failover_with_three_supervisors() {
    let candidate = global_for("a");
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    state
        .primary
        .replicas
        .insert(addr(6380), fresh_replica(6380, 10, 5000));
    state
        .primary
        .replicas
        .insert(addr(6381), fresh_replica(6381, 10, 9000));
    state.primary.set_sdown(true);
    state.primary.set_odown(true);

    assert!(can_start_election(&state, Instant::now()));
    let epoch = start_election(&candidate, &mut state, &candidate.my_run_id.clone(), Instant::now());
    assert_eq!(epoch, 1);

    let req = build_vote_request(&state, &candidate.my_run_id.clone());
    assert_eq!(req.req_epoch, epoch);

    // Two peers independently grant the vote.
    for peer_tag in ["b", "c"] {
        let peer_global = global_for(peer_tag);
        let mut peer_view = master_state("mymaster", addr(6379), 2, 1);
        let outcome = handle_vote_request(&peer_global, &mut peer_view, &req, &peer_global.my_run_id.clone());
        assert!(outcome.newly_granted);
        record_vote(&mut state, peer_global.my_run_id.clone(), &outcome.reply, &candidate.my_run_id.clone(), Instant::now());
    }

    assert!(tally_election(&state, 3));
    state.primary.failover_state = FailoverState::SelectReplica;

    let best = select_best_replica(&state.primary, Duration::from_secs(10), Duration::from_secs(1), Instant::now());
    assert_eq!(best, Some(addr(6381))); // higher offset wins the priority tie

    state.primary.failover_state = FailoverState::SendPromote;
    state.primary.promoted_replica = best;
    state.primary.failover_state = FailoverState::WaitPromotion;
    state.primary.failover_state = FailoverState::ReconfReplicas;
    // The promoted replica is no longer one of its own replicas once
    // promotion is confirmed; only the remaining replicas get a `SLAVEOF`.
    state.primary.replicas.remove(&best.unwrap());

    let to_reconfigure = select_replicas_to_reconfigure(&state.primary, &state.reconf_progress, state.config.parallel_syncs);
    assert_eq!(to_reconfigure, vec![addr(6380)]); // the promoted replica isn't reconfigured against itself

    let remaining = state.primary.replicas.get(&addr(6380)).unwrap();
    let (stage, _) = advance_reconf_stage(&remaining, ReconfStage::Pending, best.unwrap(), None, Instant::now());
    assert_eq!(stage, ReconfStage::Pending);
    state.reconf_progress.insert(addr(6380), ReconfStage::Done);

    assert!(reconf_complete_or_timed_out(
        &state.primary,
        &state.reconf_progress,
        state.primary.failover_start_time.unwrap(),
        state.primary.failover_timeout,
        Instant::now()
    ));

    state.primary.failover_state = FailoverState::UpdateConfig;
    let event = finalize_topology_switch(&mut state, best.unwrap());
    match event {
        spineldb::warden::events::WardenEvent::SwitchMaster { old, new, .. } => {
            assert_eq!(old, addr(6379));
            assert_eq!(new, addr(6381));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(state.primary.addr, addr(6381));
    assert_eq!(state.primary.failover_state, FailoverState::None);
    // The demoted old primary is folded back in as a replica.
    assert!(state.primary.replicas.contains_key(&addr(6379)));
}

/// Scenario 2: four supervisors split their votes two and two — neither
/// candidate reaches a strict majority of four, so the election times out
/// without a winner.
#[test]
fn split_election_with_four_supervisors_resolves_to_no_winner() {
    let g1 = global_for("a"); // candidate A
    let g2 = global_for("b"); // candidate B
    let mut state_a = master_state("mymaster", addr(6379), 2, 1);
    let mut state_b = master_state("mymaster", addr(6379), 2, 1);
    state_a.primary.set_odown(true);
    state_b.primary.set_odown(true);

    let start = Instant::now();
    let epoch_a = start_election(&g1, &mut state_a, &g1.my_run_id.clone(), start);
    let epoch_b = start_election(&g2, &mut state_b, &g2.my_run_id.clone(), start);
    assert_ne!(epoch_a, 0);
    assert_ne!(epoch_b, 0);

    let req_a = build_vote_request(&state_a, &g1.my_run_id.clone());
    let req_b = build_vote_request(&state_b, &g2.my_run_id.clone());

    // Supervisor 3 sees candidate A's request first and grants it.
    let g3 = global_for("c");
    let mut view3 = master_state("mymaster", addr(6379), 2, 1);
    let reply3 = handle_vote_request(&g3, &mut view3, &req_a, &g3.my_run_id.clone());
    assert!(reply3.newly_granted);
    record_vote(&mut state_a, g3.my_run_id.clone(), &reply3.reply, &g1.my_run_id.clone(), start);

    // Supervisor 4 sees candidate B's request first (different epoch, since
    // each candidate bumped the Lamport clock independently) and grants it.
    let g4 = global_for("d");
    let mut view4 = master_state("mymaster", addr(6379), 2, 1);
    let reply4 = handle_vote_request(&g4, &mut view4, &req_b, &g4.my_run_id.clone());
    assert!(reply4.newly_granted);
    record_vote(&mut state_b, g4.my_run_id.clone(), &reply4.reply, &g2.my_run_id.clone(), start);

    // Each candidate now holds exactly 2 votes (self + one peer) of 4 known
    // supervisors: short of the 3-vote majority either needs to win.
    assert_eq!(state_a.election_votes.len(), 2);
    assert_eq!(state_b.election_votes.len(), 2);
    assert!(!tally_election(&state_a, 4));
    assert!(!tally_election(&state_b, 4));

    let deadline = start + Duration::from_secs(61);
    assert!(spineldb::warden::election::election_timed_out(&state_a, deadline));
    assert!(spineldb::warden::election::election_timed_out(&state_b, deadline));
}

/// Scenario 3: the primary comes back up mid-election. The in-flight state
/// machine doesn't silently revert; the old primary is later re-enrolled as
/// a replica once a real failover completes and drift reconciliation can
/// then correct it if it still claims to be a primary.
#[test]
fn primary_recovers_mid_election_does_not_abort_the_state_machine() {
    let global = global_for("a");
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    state
        .primary
        .replicas
        .insert(addr(6380), fresh_replica(6380, 10, 100));
    state.primary.set_sdown(true);
    state.primary.set_odown(true);
    start_election(&global, &mut state, &global.my_run_id.clone(), Instant::now());
    assert_eq!(state.primary.failover_state, FailoverState::WaitStart);

    // The primary's PING starts succeeding again; SDOWN clears (and with it
    // ODOWN, per Invariant 6) but the election already in flight is left
    // alone — clearing SDOWN is not itself an abort.
    state.primary.set_sdown(false);
    assert!(!state.primary.is_odown());
    assert_eq!(state.primary.failover_state, FailoverState::WaitStart);

    // Only an explicit abort (election timeout, or a losing tally) resets
    // the machine.
    let event = abort(&mut state, "primary recovered before quorum reached");
    assert_eq!(state.primary.failover_state, FailoverState::None);
    match event {
        spineldb::warden::events::WardenEvent::FailoverAbort { reason, .. } => {
            assert_eq!(reason, "primary recovered before quorum reached");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Drift reconciliation stays silent while the primary looks healthy and
    // the replica's own view matches the primary on record.
    let replica = state.primary.replicas.get(&addr(6380)).unwrap();
    assert!(!needs_drift_reconciliation(&state.primary, &replica, Duration::from_secs(2), Instant::now()));
}

/// Scenario 4: a long scheduling stall or clock jump suspends judgement and
/// action for the configured auto-exit window.
#[test]
fn tilt_entry_on_stall_suspends_and_then_resumes() {
    let global = global_for("a");
    let t0 = Instant::now();
    global.update_tilt(t0);
    assert!(!global.is_tilt());

    let jumped = t0 + Duration::from_secs(10);
    assert_eq!(global.update_tilt(jumped), Some(true));
    assert!(global.is_tilt());

    let tick = Duration::from_secs_f64(1.0 / global.hz);
    let mut now = jumped;
    for _ in 0..29 {
        now += tick;
        assert!(global.update_tilt(now).is_none());
        assert!(global.is_tilt());
    }
    now += tick;
    assert_eq!(global.update_tilt(now), Some(false));
    assert!(!global.is_tilt());
}

/// Scenario 5: a duplicate supervisor announces itself under a new address
/// but the same run ID (e.g. restarted with a fresh listening port) — the
/// older registration is evicted so vote counting never double-counts it.
#[test]
fn duplicate_peer_via_hello_evicts_the_stale_registration() {
    let global = global_for("a");
    let mut state = master_state("mymaster", addr(6379), 2, 1);

    let evicted_first = dedupe_and_insert_supervisor(&state.primary.supervisors, addr(26380), "peer-runid");
    assert!(!evicted_first);
    assert_eq!(state.primary.supervisors.len(), 1);

    // Same peer reappears on a new port with the same runid.
    let evicted_second = dedupe_and_insert_supervisor(&state.primary.supervisors, addr(26381), "peer-runid");
    assert!(evicted_second);
    assert_eq!(state.primary.supervisors.len(), 1);
    assert!(state.primary.supervisors.contains_key(&addr(26381)));
    assert!(!state.primary.supervisors.contains_key(&addr(26380)));

    // The same behavior is reachable through a hello record end to end.
    let masters = dashmap::DashMap::new();
    masters.insert("mymaster".to_string(), std::sync::Arc::new(parking_lot::Mutex::new(state)));
    let hello = HelloMessage {
        supervisor_ip: "127.0.0.1".parse().unwrap(),
        supervisor_port: 26382,
        supervisor_runid: "peer-runid".to_string(),
        supervisor_current_epoch: global.current_epoch(),
        primary_name: "mymaster".to_string(),
        primary_ip: addr(6379).ip(),
        primary_port: 6379,
        primary_config_epoch: 0,
    };
    let outcome = process_hello(&global, &masters, &hello, Instant::now());
    match outcome {
        spineldb::warden::health::HelloOutcome::Applied { dup_evicted, .. } => assert!(dup_evicted),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Scenario 6: an administrator forces a failover via `SENTINEL FAILOVER`,
/// bypassing the ODOWN precondition entirely.
#[test]
fn forced_failover_bypasses_odown_precondition() {
    let global = global_for("a");
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    assert!(!state.primary.is_odown());
    assert!(!can_start_election(&state, Instant::now()));

    state.primary.flags.insert(InstanceFlags::FORCE_FAILOVER);
    assert!(can_start_election(&state, Instant::now()));

    start_election(&global, &mut state, &global.my_run_id.clone(), Instant::now());
    assert_eq!(state.primary.failover_state, FailoverState::WaitStart);
}
