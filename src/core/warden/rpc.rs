// src/core/warden/rpc.rs

//! Wire types for the two inter-supervisor protocols: the hello-bus gossip
//! record and the `SENTINEL is-master-down-by-addr` vote RPC.

use super::errors::WardenError;
use crate::core::protocol::RespFrame;
use std::net::{IpAddr, SocketAddr};

/// Fixed pub/sub topic every primary and replica carries; supervisors
/// subscribe here to discover each other and learn of topology changes.
pub const HELLO_TOPIC: &str = "__sentinel__:hello";

/// A parsed hello-bus record. The wire form is an 8-comma-field ASCII
/// line; fields are never DNS-resolved on receipt (they arrive pre-resolved
/// as dotted IPs by construction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub supervisor_ip: IpAddr,
    pub supervisor_port: u16,
    pub supervisor_runid: String,
    pub supervisor_current_epoch: u64,
    pub primary_name: String,
    pub primary_ip: IpAddr,
    pub primary_port: u16,
    pub primary_config_epoch: u64,
}

impl HelloMessage {
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.supervisor_ip,
            self.supervisor_port,
            self.supervisor_runid,
            self.supervisor_current_epoch,
            self.primary_name,
            self.primary_ip,
            self.primary_port,
            self.primary_config_epoch,
        )
    }

    /// Parses a raw hello payload. Rejects any record that doesn't have
    /// exactly 8 comma-separated fields, per spec: a short or long record
    /// is simply not a valid hello and is discarded.
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.trim().split(',').collect();
        if fields.len() != 8 {
            return None;
        }
        Some(Self {
            supervisor_ip: fields[0].parse().ok()?,
            supervisor_port: fields[1].parse().ok()?,
            supervisor_runid: fields[2].to_string(),
            supervisor_current_epoch: fields[3].parse().ok()?,
            primary_name: fields[4].to_string(),
            primary_ip: fields[5].parse().ok()?,
            primary_port: fields[6].parse().ok()?,
            primary_config_epoch: fields[7].parse().ok()?,
        })
    }

    pub fn supervisor_addr(&self) -> SocketAddr {
        SocketAddr::new(self.supervisor_ip, self.supervisor_port)
    }

    pub fn primary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.primary_ip, self.primary_port)
    }
}

/// A `SENTINEL is-master-down-by-addr` request. `req_runid = "*"` makes
/// this a health check only (no vote cast or changed); any other value is
/// a vote request for that candidate runid.
#[derive(Debug, Clone)]
pub struct VoteRequest {
    pub primary_addr: SocketAddr,
    pub req_epoch: u64,
    pub req_runid: String,
}

/// Sentinel value for `req_runid` marking a health-check-only query.
pub const HEALTH_CHECK_ONLY: &str = "*";

impl VoteRequest {
    pub fn is_health_check_only(&self) -> bool {
        self.req_runid == HEALTH_CHECK_ONLY
    }

    pub fn to_resp_command(&self) -> RespFrame {
        RespFrame::Array(vec![
            RespFrame::BulkString("SENTINEL".into()),
            RespFrame::BulkString("is-master-down-by-addr".into()),
            RespFrame::BulkString(self.primary_addr.ip().to_string().into()),
            RespFrame::BulkString(self.primary_addr.port().to_string().into()),
            RespFrame::BulkString(self.req_epoch.to_string().into()),
            RespFrame::BulkString(self.req_runid.clone().into()),
        ])
    }
}

/// The 3-tuple reply to a vote RPC: whether the responder independently
/// judges the primary down, and the leader it currently has on record for
/// that primary (which may predate this request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReply {
    pub is_down: bool,
    pub leader_runid: String,
    pub leader_epoch: u64,
}

impl VoteReply {
    pub fn from_resp(frame: &RespFrame) -> Result<Self, WardenError> {
        let RespFrame::Array(parts) = frame else {
            return Err(WardenError::ProtocolViolation {
                addr: "vote-reply".into(),
                detail: format!("expected array reply, got {frame:?}"),
            });
        };
        if parts.len() != 3 {
            return Err(WardenError::ProtocolViolation {
                addr: "vote-reply".into(),
                detail: format!("expected 3-tuple, got {} elements", parts.len()),
            });
        }
        let is_down = match &parts[0] {
            RespFrame::Integer(n) => *n != 0,
            RespFrame::BulkString(bs) => bs.as_ref() != b"0",
            other => {
                return Err(WardenError::ProtocolViolation {
                    addr: "vote-reply".into(),
                    detail: format!("bad is_down field: {other:?}"),
                });
            }
        };
        let leader_runid = match &parts[1] {
            RespFrame::BulkString(bs) => String::from_utf8_lossy(bs).to_string(),
            other => {
                return Err(WardenError::ProtocolViolation {
                    addr: "vote-reply".into(),
                    detail: format!("bad leader_runid field: {other:?}"),
                });
            }
        };
        let leader_epoch = match &parts[2] {
            RespFrame::Integer(n) => *n as u64,
            RespFrame::BulkString(bs) => String::from_utf8_lossy(bs)
                .parse()
                .map_err(|_| WardenError::ProtocolViolation {
                    addr: "vote-reply".into(),
                    detail: "non-numeric leader_epoch".into(),
                })?,
            other => {
                return Err(WardenError::ProtocolViolation {
                    addr: "vote-reply".into(),
                    detail: format!("bad leader_epoch field: {other:?}"),
                });
            }
        };
        Ok(Self {
            is_down,
            leader_runid,
            leader_epoch,
        })
    }

    pub fn to_resp(&self) -> RespFrame {
        RespFrame::Array(vec![
            RespFrame::Integer(self.is_down as i64),
            RespFrame::BulkString(self.leader_runid.clone().into()),
            RespFrame::Integer(self.leader_epoch as i64),
        ])
    }
}
