// src/core/warden/election.rs

//! Epoch-based leader election: the responder side of the vote RPC
//! (`handle_vote_request`) and the candidate side (starting an attempt,
//! recording replies, tallying a winner).
//!
//! Grounded on the original `worker.rs`'s `check_failover_status`/
//! `check_election_status`/`process_vote_message` (kept: epoch-gated single
//! vote per attempt, backoff on losing a race), rebuilt against the real
//! `SENTINEL is-master-down-by-addr` RPC contract (spec.md §4.5) in place of
//! the original's `VOTE-REQUEST`/`VOTE-ACK` pub/sub broadcast.

use super::instance::{FailoverState, InstanceFlags};
use super::rpc::{VoteReply, VoteRequest};
use super::state::{GlobalWardenState, MasterState};
use std::time::{Duration, Instant};

/// Caps how long a candidate waits for replies before tallying, per
/// spec.md §4.5's `min(election_timeout, failover_timeout)`.
const ELECTION_TIMEOUT: Duration = Duration::from_secs(10);

fn election_deadline(failover_timeout: Duration) -> Duration {
    ELECTION_TIMEOUT.min(failover_timeout)
}

/// Result of handling an incoming vote RPC. `newly_granted` tells the
/// caller (the listener) it must persist the updated leader bookkeeping
/// before sending `reply` back on the wire (Invariant 7).
pub struct VoteOutcome {
    pub newly_granted: bool,
    pub reply: VoteReply,
}

fn current_reply(state: &MasterState) -> VoteReply {
    VoteReply {
        is_down: state.primary.is_sdown(),
        leader_runid: state.primary.leader_runid.clone().unwrap_or_default(),
        leader_epoch: state.primary.leader_epoch,
    }
}

/// Responder side of `QueryIsMasterDownByAddr`. A health check
/// (`req_runid == "*"`) never casts or changes a vote, it only reports the
/// locally-held opinion. Otherwise the vote is granted iff
/// `req_epoch >= local current_epoch` and `master.leader_epoch < req_epoch`.
///
/// A granted vote unconditionally raises `current_epoch` to `req_epoch`,
/// even when the two are already equal (resolved Open Question, see
/// DESIGN.md) — casting a vote is itself evidence the epoch is in active
/// use and should not be allowed to regress on a later, lower-epoch request.
pub fn handle_vote_request(global: &GlobalWardenState, state: &mut MasterState, req: &VoteRequest, my_runid: &str) -> VoteOutcome {
    if req.is_health_check_only() {
        return VoteOutcome {
            newly_granted: false,
            reply: current_reply(state),
        };
    }

    let can_vote = req.req_epoch >= global.current_epoch() && state.primary.leader_epoch < req.req_epoch;
    if !can_vote {
        return VoteOutcome {
            newly_granted: false,
            reply: current_reply(state),
        };
    }

    global.adopt_epoch(req.req_epoch);
    state.primary.leader_runid = Some(req.req_runid.clone());
    state.primary.leader_epoch = req.req_epoch;

    if req.req_runid != my_runid {
        // Back off our own candidacy for this attempt window: a peer is
        // already running an election for this epoch.
        state.last_election_attempt = Some(Instant::now());
    }

    VoteOutcome {
        newly_granted: true,
        reply: VoteReply {
            is_down: state.primary.is_sdown(),
            leader_runid: req.req_runid.clone(),
            leader_epoch: req.req_epoch,
        },
    }
}

/// Whether this supervisor may start a new election attempt for `state`:
/// ODOWN held (or an admin `FAILOVER` forced it), no failover already in
/// flight, and the last attempt is older than `2 x failover_timeout`.
pub fn can_start_election(state: &MasterState, now: Instant) -> bool {
    let forced = state.primary.flags.contains(InstanceFlags::FORCE_FAILOVER);
    let odown_or_forced = state.primary.is_odown() || forced;
    let idle = state.primary.failover_state == FailoverState::None;
    let backoff_elapsed = state
        .last_election_attempt
        .map(|t| now.saturating_duration_since(t) >= state.primary.failover_timeout * 2)
        .unwrap_or(true);
    odown_or_forced && idle && backoff_elapsed
}

/// Starts a new election attempt as a candidate: bumps the process-wide
/// Lamport epoch, stamps `failover_epoch`, transitions to `WaitStart`, and
/// records a self-vote so a peer's cross-check already sees us as the
/// leader candidate for this epoch.
pub fn start_election(global: &GlobalWardenState, state: &mut MasterState, my_runid: &str, now: Instant) -> u64 {
    let epoch = global.bump_epoch();
    state.primary.failover_epoch = epoch;
    state.primary.failover_state = FailoverState::WaitStart;
    state.primary.failover_start_time = Some(now);
    state.primary.flags.insert(InstanceFlags::FAILOVER_IN_PROGRESS);
    state.last_election_attempt = Some(now);
    state.election_votes.clear();
    state.election_votes.insert(my_runid.to_string(), now);
    state.primary.leader_runid = Some(my_runid.to_string());
    state.primary.leader_epoch = epoch;
    epoch
}

/// Builds the vote request this candidate broadcasts to every known
/// supervisor during a `WaitStart` attempt.
pub fn build_vote_request(state: &MasterState, my_runid: &str) -> VoteRequest {
    VoteRequest {
        primary_addr: state.primary.addr,
        req_epoch: state.primary.failover_epoch,
        req_runid: my_runid.to_string(),
    }
}

/// Records a peer's reply to our candidacy. Only counted if the peer
/// actually granted the vote to *us*, for *this* attempt's epoch — a reply
/// naming a different leader or an older epoch doesn't count, even if it
/// arrived in response to our request (the peer may have already voted for
/// someone else, or be replying to a stale retry).
pub fn record_vote(state: &mut MasterState, voter_runid: String, reply: &VoteReply, my_runid: &str, now: Instant) {
    if reply.leader_runid == my_runid && reply.leader_epoch == state.primary.failover_epoch {
        state.election_votes.insert(voter_runid, now);
    }
}

/// Winner determination per spec.md §4.5: a strict majority of known
/// supervisors (`known_supervisor_count` includes self) AND at least
/// `quorum` votes. Both conditions are required since quorum alone could be
/// satisfied by a minority in a partitioned view.
pub fn tally_election(state: &MasterState, known_supervisor_count: usize) -> bool {
    let votes = state.election_votes.len();
    let majority_needed = known_supervisor_count / 2 + 1;
    votes >= majority_needed && votes >= state.primary.quorum
}

/// Whether the current attempt has run past its deadline without reaching
/// `tally_election`'s winning condition.
pub fn election_timed_out(state: &MasterState, now: Instant) -> bool {
    state
        .primary
        .failover_start_time
        .map(|t| now.saturating_duration_since(t) >= election_deadline(state.primary.failover_timeout))
        .unwrap_or(true)
}
