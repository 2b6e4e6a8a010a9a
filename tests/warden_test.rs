// tests/warden_test.rs

//! Integration tests for the Warden supervisor's decision logic.
//!
//! Warden's only collaborator is the network (the monitored primary,
//! its replicas, and peer supervisors), so these tests don't spin up a
//! live server; they simulate one or more independent supervisor views by
//! constructing `MasterState`/`GlobalWardenState` directly and driving the
//! same pure functions the reactor calls on every tick.

mod warden {
    pub mod harness;
    pub mod invariants_test;
    pub mod scenarios_test;
}
