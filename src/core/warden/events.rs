// src/core/warden/events.rs

//! The typed event bus: every material state transition is emitted here,
//! which (a) logs at the event's severity and (b) queues a best-effort
//! publish to a pub/sub topic named after the event, and (c) on WARNING
//! events schedules the configured notification script.
//!
//! Grounded on `core/events.rs`'s `EventBus` shape (a struct owning
//! channel senders, with a `publish`/`emit` method fanning out to
//! subscribers) generalized from replication/AOF fan-out to
//! log+pubsub+script fan-out.

use std::net::SocketAddr;
use tokio::sync::mpsc::{self, Sender as MpscSender, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::scripts::{ScriptKind, ScriptRequest, ScriptRunner};

/// Queue depth for outbound pub/sub publishes awaiting a live connection.
const OUTBOUND_PUBLISH_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

/// Every typed event spec.md §4.9 names. The `Display` impl is also the
/// pub/sub topic name and the log-line event tag.
#[derive(Debug, Clone)]
pub enum WardenEvent {
    Sdown { master: String, target: SocketAddr },
    SdownCleared { master: String, target: SocketAddr },
    Odown { master: String, target: SocketAddr },
    OdownCleared { master: String, target: SocketAddr },
    NewEpoch { master: String, epoch: u64 },
    VoteForLeader { master: String, candidate_runid: String, epoch: u64 },
    ElectedLeader { master: String, epoch: u64 },
    FailoverStateChange { master: String, state: &'static str },
    PromotedSlave { master: String, addr: SocketAddr },
    SlaveReconfSent { master: String, addr: SocketAddr },
    SlaveReconfInprog { master: String, addr: SocketAddr },
    SlaveReconfDone { master: String, addr: SocketAddr },
    SlaveReconfTimeout { master: String, addr: SocketAddr },
    SwitchMaster { master: String, old: SocketAddr, new: SocketAddr },
    TiltEntered { master: String },
    TiltExited { master: String },
    Reboot { master: String, target: SocketAddr },
    NewSlave { master: String, addr: SocketAddr },
    NewSentinel { master: String, addr: SocketAddr },
    DupSentinel { master: String, addr: SocketAddr },
    Monitor { master: String },
    Unmonitor { master: String },
    FailoverAbort { master: String, reason: &'static str },
    ScriptError { master: String, detail: String },
    ScriptTimeout { master: String, detail: String },
}

impl WardenEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Sdown { .. } => "+sdown",
            Self::SdownCleared { .. } => "-sdown",
            Self::Odown { .. } => "+odown",
            Self::OdownCleared { .. } => "-odown",
            Self::NewEpoch { .. } => "+new-epoch",
            Self::VoteForLeader { .. } => "+vote-for-leader",
            Self::ElectedLeader { .. } => "+elected-leader",
            Self::FailoverStateChange { .. } => "+failover-state",
            Self::PromotedSlave { .. } => "+promoted-slave",
            Self::SlaveReconfSent { .. } => "+slave-reconf-sent",
            Self::SlaveReconfInprog { .. } => "+slave-reconf-inprog",
            Self::SlaveReconfDone { .. } => "+slave-reconf-done",
            Self::SlaveReconfTimeout { .. } => "+slave-reconf-timeout",
            Self::SwitchMaster { .. } => "+switch-master",
            Self::TiltEntered { .. } => "+tilt",
            Self::TiltExited { .. } => "-tilt",
            Self::Reboot { .. } => "+reboot",
            Self::NewSlave { .. } => "+slave",
            Self::NewSentinel { .. } => "+sentinel",
            Self::DupSentinel { .. } => "-dup-sentinel",
            Self::Monitor { .. } => "+monitor",
            Self::Unmonitor { .. } => "-monitor",
            Self::FailoverAbort { .. } => "-failover-abort",
            Self::ScriptError { .. } => "-script-error",
            Self::ScriptTimeout { .. } => "-script-timeout",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Sdown { .. }
            | Self::Odown { .. }
            | Self::DupSentinel { .. }
            | Self::FailoverAbort { .. }
            | Self::ScriptError { .. }
            | Self::ScriptTimeout { .. }
            | Self::TiltEntered { .. } => Severity::Warning,
            Self::NewEpoch { .. }
            | Self::ElectedLeader { .. }
            | Self::PromotedSlave { .. }
            | Self::SwitchMaster { .. }
            | Self::Reboot { .. } => Severity::Info,
            _ => Severity::Debug,
        }
    }

    pub fn master_name(&self) -> &str {
        match self {
            Self::Sdown { master, .. }
            | Self::SdownCleared { master, .. }
            | Self::Odown { master, .. }
            | Self::OdownCleared { master, .. }
            | Self::NewEpoch { master, .. }
            | Self::VoteForLeader { master, .. }
            | Self::ElectedLeader { master, .. }
            | Self::FailoverStateChange { master, .. }
            | Self::PromotedSlave { master, .. }
            | Self::SlaveReconfSent { master, .. }
            | Self::SlaveReconfInprog { master, .. }
            | Self::SlaveReconfDone { master, .. }
            | Self::SlaveReconfTimeout { master, .. }
            | Self::SwitchMaster { master, .. }
            | Self::TiltEntered { master }
            | Self::TiltExited { master }
            | Self::Reboot { master, .. }
            | Self::NewSlave { master, .. }
            | Self::NewSentinel { master, .. }
            | Self::DupSentinel { master, .. }
            | Self::Monitor { master }
            | Self::Unmonitor { master }
            | Self::FailoverAbort { master, .. }
            | Self::ScriptError { master, .. }
            | Self::ScriptTimeout { master, .. } => master,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Sdown { target, .. } | Self::SdownCleared { target, .. } => target.to_string(),
            Self::Odown { target, .. } | Self::OdownCleared { target, .. } => target.to_string(),
            Self::NewEpoch { epoch, .. } => epoch.to_string(),
            Self::VoteForLeader { candidate_runid, epoch, .. } => {
                format!("{candidate_runid} {epoch}")
            }
            Self::ElectedLeader { epoch, .. } => epoch.to_string(),
            Self::FailoverStateChange { state, .. } => (*state).to_string(),
            Self::PromotedSlave { addr, .. } => addr.to_string(),
            Self::SlaveReconfSent { addr, .. }
            | Self::SlaveReconfInprog { addr, .. }
            | Self::SlaveReconfDone { addr, .. }
            | Self::SlaveReconfTimeout { addr, .. } => addr.to_string(),
            Self::SwitchMaster { old, new, .. } => format!("{old} {new}"),
            Self::Reboot { target, .. } => target.to_string(),
            Self::NewSlave { addr, .. } | Self::NewSentinel { addr, .. } | Self::DupSentinel { addr, .. } => {
                addr.to_string()
            }
            Self::FailoverAbort { reason, .. } => (*reason).to_string(),
            Self::ScriptError { detail, .. } | Self::ScriptTimeout { detail, .. } => detail.clone(),
            Self::TiltEntered { .. } | Self::TiltExited { .. } | Self::Monitor { .. } | Self::Unmonitor { .. } => {
                String::new()
            }
        }
    }
}

/// A queued outbound publish: the scheduler drains this and sends it over
/// the relevant master's hello-channel connection when one is live.
#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub master: String,
    pub topic: &'static str,
    pub payload: String,
}

#[derive(Clone)]
pub struct EventBus {
    outbound: MpscSender<OutboundPublish>,
    scripts: ScriptRunner,
}

impl EventBus {
    pub fn new(scripts: ScriptRunner) -> (Self, mpsc::Receiver<OutboundPublish>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_PUBLISH_CAPACITY);
        (
            Self {
                outbound: tx,
                scripts,
            },
            rx,
        )
    }

    /// Logs, queues a pub/sub publish, and (for WARNING events) schedules
    /// the master's notification script if one is configured.
    pub fn emit(&self, event: WardenEvent, notification_script: Option<&str>) {
        let master = event.master_name().to_string();
        let topic = event.topic();
        let detail = event.detail();

        match event.severity() {
            Severity::Warning => warn!(master = %master, event = topic, detail = %detail, "warden event"),
            Severity::Info => info!(master = %master, event = topic, detail = %detail, "warden event"),
            Severity::Debug => debug!(master = %master, event = topic, detail = %detail, "warden event"),
        }

        let payload = OutboundPublish {
            master: master.clone(),
            topic,
            payload: format!("{topic} {detail}"),
        };
        match self.outbound.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("event outbound queue full, dropping publish for {}", topic);
            }
            Err(TrySendError::Closed(_)) => {
                error!("event outbound channel closed");
            }
        }

        if event.severity() == Severity::Warning
            && let Some(script) = notification_script
        {
            self.scripts.schedule(ScriptRequest {
                kind: ScriptKind::Notification,
                path: script.to_string(),
                args: vec![topic.to_string(), detail],
            });
        }
    }
}
