// tests/warden/invariants_test.rs

//! Quantified invariants, round-trip/idempotence laws, and boundary
//! behaviors spec.md §8 calls out, each exercised against the pure warden
//! functions directly.

use super::harness::{addr, fresh_replica, global_for, master_state};
use spineldb::warden::election::{can_start_election, handle_vote_request, start_election, tally_election};
use spineldb::warden::failover::select_best_replica;
use spineldb::warden::health::process_hello;
use spineldb::warden::instance::{FailoverState, InstanceFlags};
use spineldb::warden::persistence::PersistedState;
use spineldb::warden::quorum::{count_agreeing, evaluate_odown, record_quorum_reply};
use spineldb::warden::rpc::{HelloMessage, VoteReply, VoteRequest};
use std::time::{Duration, Instant};

/// A supervisor never grants two votes for the same epoch, regardless of
/// how many times the same or a different candidate's request arrives.
#[test]
fn vote_once_per_epoch_across_repeated_and_competing_requests() {
    let global = global_for("r");
    let mut state = master_state("mymaster", addr(6379), 2, 1);

    let req = VoteRequest {
        primary_addr: state.primary.addr,
        req_epoch: 4,
        req_runid: "candidate-a".to_string(),
    };
    let first = handle_vote_request(&global, &mut state, &req, &global.my_run_id.clone());
    assert!(first.newly_granted);

    // The identical request retried (e.g. a dropped reply) is not granted
    // again — `master.leader_epoch < req.req_epoch` is now false.
    let retried = handle_vote_request(&global, &mut state, &req, &global.my_run_id.clone());
    assert!(!retried.newly_granted);
    assert_eq!(retried.reply.leader_runid, "candidate-a");

    // A competing candidate at the same epoch also loses.
    let competitor = VoteRequest {
        primary_addr: state.primary.addr,
        req_epoch: 4,
        req_runid: "candidate-b".to_string(),
    };
    let lost = handle_vote_request(&global, &mut state, &competitor, &global.my_run_id.clone());
    assert!(!lost.newly_granted);
    assert_eq!(lost.reply.leader_runid, "candidate-a");
}

/// `config_epoch` only ever moves forward: a hello carrying a lower or
/// equal epoch than what's already on record is a no-op, even if the
/// advertised address differs.
#[test]
fn config_epoch_is_monotonic_non_decreasing_on_hello() {
    let global = global_for("r");
    let masters = dashmap::DashMap::new();
    let primary_addr = addr(6379);
    let mut state = master_state("mymaster", primary_addr, 2, 1);
    state.primary.config_epoch = 5;
    masters.insert("mymaster".to_string(), std::sync::Arc::new(parking_lot::Mutex::new(state)));

    let stale_hello = HelloMessage {
        supervisor_ip: "127.0.0.1".parse().unwrap(),
        supervisor_port: 26380,
        supervisor_runid: "peer".repeat(10),
        supervisor_current_epoch: 1,
        primary_name: "mymaster".to_string(),
        primary_ip: addr(9999).ip(),
        primary_port: 9999,
        primary_config_epoch: 5, // equal, not higher
    };
    let outcome = process_hello(&global, &masters, &stale_hello, Instant::now());
    match outcome {
        spineldb::warden::health::HelloOutcome::Applied { address_switch, .. } => assert!(!address_switch),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let view = masters.get("mymaster").unwrap();
    assert_eq!(view.lock().primary.addr, primary_addr); // unchanged
}

/// The process-wide Lamport `current_epoch` clock never regresses, whether
/// advanced by adoption (max-of-observed) or by an unconditional bump.
#[test]
fn current_epoch_is_monotonic_under_adoption_and_bump() {
    let global = global_for("r");
    assert_eq!(global.adopt_epoch(10), 10);
    assert_eq!(global.adopt_epoch(2), 10);
    assert_eq!(global.bump_epoch(), 11);
    assert_eq!(global.adopt_epoch(11), 11);
}

/// Persisting a snapshot then reloading it reproduces the same logical
/// state byte for byte in the round-trippable fields.
#[test]
fn persisted_state_round_trips_through_render_and_parse() {
    let global = global_for("r");
    global.adopt_epoch(7);
    let mut state = master_state("mymaster", addr(6379), 3, 2);
    state.primary.config_epoch = 2;
    state.primary.leader_epoch = 2;
    state
        .primary
        .replicas
        .insert(addr(6380), fresh_replica(6380, 1, 10));
    global.masters.insert("mymaster".to_string(), std::sync::Arc::new(parking_lot::Mutex::new(state)));

    let snapshot = global.snapshot();
    let rendered = snapshot.render();
    let parsed = PersistedState::parse(&rendered).unwrap();
    assert_eq!(snapshot, parsed);
    assert_eq!(parsed.current_epoch, 7);
    assert_eq!(parsed.masters[0].known_slaves, vec![addr(6380)]);
}

/// Processing the exact same hello record twice is idempotent: the second
/// application changes nothing further.
#[test]
fn reprocessing_the_same_hello_is_a_no_op() {
    let global = global_for("r");
    let masters = dashmap::DashMap::new();
    let old_addr = addr(6379);
    masters.insert("mymaster".to_string(), std::sync::Arc::new(parking_lot::Mutex::new(master_state("mymaster", old_addr, 2, 1))));

    let new_addr = addr(6380);
    let hello = HelloMessage {
        supervisor_ip: "127.0.0.1".parse().unwrap(),
        supervisor_port: 26380,
        supervisor_runid: "peer".repeat(10),
        supervisor_current_epoch: 3,
        primary_name: "mymaster".to_string(),
        primary_ip: new_addr.ip(),
        primary_port: new_addr.port(),
        primary_config_epoch: 1,
    };
    let first = process_hello(&global, &masters, &hello, Instant::now());
    assert!(matches!(
        first,
        spineldb::warden::health::HelloOutcome::Applied { address_switch: true, .. }
    ));
    let after_first = masters.get("mymaster").unwrap().lock().primary.addr;
    assert_eq!(after_first, new_addr);

    // Re-delivering the identical hello (e.g. a duplicated pub/sub message)
    // doesn't switch the address again — it's already at `new_addr` and the
    // advertised config_epoch no longer exceeds what's on record.
    let second = process_hello(&global, &masters, &hello, Instant::now());
    assert!(matches!(
        second,
        spineldb::warden::health::HelloOutcome::Applied { address_switch: false, .. }
    ));
    let after_second = masters.get("mymaster").unwrap().lock().primary.addr;
    assert_eq!(after_second, new_addr);
}

/// Boundary: `quorum == 1` means a single self-judgement is already enough
/// to enter ODOWN — no peer agreement is required.
#[test]
fn quorum_of_one_needs_no_peer_agreement() {
    let mut state = master_state("mymaster", addr(6379), 1, 1);
    state.primary.set_sdown(true);
    assert_eq!(count_agreeing(&state, Instant::now()), 1);
    assert_eq!(evaluate_odown(&mut state, Instant::now()), Some(true));
}

/// Boundary: with exactly one known supervisor (this one), a self-vote
/// alone is already a majority and already meets a quorum of 1.
#[test]
fn single_supervisor_deployment_wins_its_own_election_trivially() {
    let global = global_for("r");
    let mut state = master_state("mymaster", addr(6379), 1, 1);
    state.primary.set_odown(true);
    assert!(can_start_election(&state, Instant::now()));
    start_election(&global, &mut state, &global.my_run_id.clone(), Instant::now());
    assert!(tally_election(&state, 1));
}

/// Boundary: once every replica is filtered out of contention (stale INFO,
/// priority zero, disconnected), `select_best_replica` reports no
/// candidate at all rather than picking a disqualified one.
#[test]
fn no_eligible_replica_yields_no_candidate() {
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    let mut zero_priority = fresh_replica(6380, 0, 100);
    zero_priority.slave_priority = 0;
    let mut disconnected = fresh_replica(6381, 5, 100);
    disconnected.flags.insert(InstanceFlags::DISCONNECTED);
    state.primary.replicas.insert(addr(6380), zero_priority);
    state.primary.replicas.insert(addr(6381), disconnected);

    let best = select_best_replica(&state.primary, Duration::from_secs(10), Duration::from_secs(1), Instant::now());
    assert!(best.is_none());
}

/// Boundary: an explicit vote reply naming a different epoch than the
/// candidate's current attempt doesn't count, even from a supervisor that
/// is clearly reachable and responsive.
#[test]
fn stale_epoch_vote_reply_does_not_count_toward_tally() {
    let global = global_for("r");
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    state.primary.set_odown(true);
    start_election(&global, &mut state, &global.my_run_id.clone(), Instant::now());

    spineldb::warden::election::record_vote(
        &mut state,
        "peer1".to_string(),
        &VoteReply {
            is_down: true,
            leader_runid: global.my_run_id.clone(),
            leader_epoch: state.primary.failover_epoch + 1,
        },
        &global.my_run_id.clone(),
        Instant::now(),
    );
    assert_eq!(state.election_votes.len(), 1); // only the self-vote
    assert!(!tally_election(&state, 3));
}

/// A health-check-only cross-check never mutates `leader_runid`/
/// `leader_epoch`/`failover_state` — it's read-only by construction.
#[test]
fn health_check_cross_check_leaves_leader_bookkeeping_untouched() {
    let global = global_for("r");
    let mut state = master_state("mymaster", addr(6379), 2, 1);
    state.primary.leader_epoch = 9;
    state.primary.leader_runid = Some("someone".to_string());
    state.primary.failover_state = FailoverState::None;

    let health_check = spineldb::warden::quorum::build_cross_check_request(&state.primary, global.current_epoch());
    let outcome = handle_vote_request(&global, &mut state, &health_check, &global.my_run_id.clone());
    assert!(!outcome.newly_granted);
    assert_eq!(state.primary.leader_epoch, 9);
    assert_eq!(state.primary.leader_runid.as_deref(), Some("someone"));

    record_quorum_reply(&mut state, "peer1".to_string(), &outcome.reply, Instant::now());
    assert_eq!(state.quorum_replies.len(), 1);
}
