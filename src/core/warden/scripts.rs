// src/core/warden/scripts.rs

//! Bounded, non-blocking execution of notification/client-reconfig scripts.
//!
//! The reactor never waits on a script: `ScriptRunner::schedule` spawns a
//! `tokio::process::Command` child immediately (bounded by a semaphore) and
//! a detached reaper task feeds the result back over a channel, mirroring
//! the spawn-then-`JoinSet::join_next`-elsewhere pattern `mod.rs` uses for
//! its top-level tasks.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// No script may run longer than this; it is killed and reported as a timeout.
const SCRIPT_KILL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on scripts running concurrently across all masters.
pub const MAX_CONCURRENT_SCRIPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Notification,
    ClientReconfig,
}

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub kind: ScriptKind,
    pub path: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ScriptOutcome {
    Completed { path: String, exit_code: Option<i32> },
    TimedOut { path: String },
    FailedToSpawn { path: String, detail: String },
}

/// Handed to `events.rs`; cheap to clone, shares the concurrency gate and
/// the outcome channel with every clone.
#[derive(Clone)]
pub struct ScriptRunner {
    gate: Arc<Semaphore>,
    outcomes: mpsc::Sender<ScriptOutcome>,
}

impl ScriptRunner {
    pub fn new() -> (Self, mpsc::Receiver<ScriptOutcome>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                gate: Arc::new(Semaphore::new(MAX_CONCURRENT_SCRIPTS)),
                outcomes: tx,
            },
            rx,
        )
    }

    /// Spawns the script in the background. Never blocks the caller; if the
    /// concurrency gate is saturated the request is queued on the semaphore
    /// (a detached task waits for its permit), never on the reactor thread.
    pub fn schedule(&self, req: ScriptRequest) {
        let gate = self.gate.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return;
            };
            let outcome = run_one(&req).await;
            let _ = outcomes.send(outcome).await;
        });
    }
}

async fn run_one(req: &ScriptRequest) -> ScriptOutcome {
    let mut cmd = Command::new(&req.path);
    cmd.args(&req.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to spawn {:?} script '{}': {}", req.kind, req.path, e);
            return ScriptOutcome::FailedToSpawn {
                path: req.path.clone(),
                detail: e.to_string(),
            };
        }
    };

    match timeout(SCRIPT_KILL_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            debug!("script '{}' exited with {:?}", req.path, output.status.code());
            ScriptOutcome::Completed {
                path: req.path.clone(),
                exit_code: output.status.code(),
            }
        }
        Ok(Err(e)) => ScriptOutcome::FailedToSpawn {
            path: req.path.clone(),
            detail: e.to_string(),
        },
        Err(_) => {
            warn!("script '{}' exceeded {:?}, killed", req.path, SCRIPT_KILL_TIMEOUT);
            ScriptOutcome::TimedOut {
                path: req.path.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_script_reports_exit_code() {
        let req = ScriptRequest {
            kind: ScriptKind::Notification,
            path: "/bin/true".to_string(),
            args: vec![],
        };
        match run_one(&req).await {
            ScriptOutcome::Completed { exit_code, .. } => assert_eq!(exit_code, Some(0)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let req = ScriptRequest {
            kind: ScriptKind::Notification,
            path: "/nonexistent/path/to/script".to_string(),
            args: vec![],
        };
        match run_one(&req).await {
            ScriptOutcome::FailedToSpawn { .. } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
