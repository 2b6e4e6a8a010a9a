// src/core/warden/client.rs

//! The async client pool Warden uses to talk to monitored SpinelDB
//! instances: a low-level RESP request/response client (`WardenClient`) and
//! a per-Instance pool (`ConnectionPool`) that owns up to two such clients —
//! a command channel (`cc`) and a hello/pub-sub channel (`pc`) — lazily
//! opened, authenticated, and tagged per spec.md §4.1.

use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use super::errors::WardenError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A low-level RESP client used by the Warden to issue probe/control
/// commands to a monitored instance, and by a peer supervisor's command
/// channel to carry the vote RPC.
#[derive(Debug)]
pub struct WardenClient {
    stream: TcpStream,
    codec: RespFrameCodec,
    pub opened_at: Instant,
    /// Outstanding commands not yet replied to. Bounded; periodic commands
    /// are skipped for a tick rather than allowed to queue unbounded.
    pub outstanding: u32,
    /// Bytes read but not yet decoded into a frame, carried across separate
    /// `poll_pubsub_message` calls so a push split across reactor ticks
    /// isn't lost.
    pubsub_buf: BytesMut,
}

/// A command is dropped for this tick (not queued) once this many replies
/// are outstanding on a single channel.
pub const MAX_OUTSTANDING_COMMANDS: u32 = 16;

impl WardenClient {
    /// Attempts to connect to a given address with a configured timeout.
    pub async fn connect(addr: SocketAddr) -> Result<Self, WardenError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| WardenError::Timeout(addr.to_string()))?
            .map_err(|e| WardenError::Network {
                addr: addr.to_string(),
                source: std::sync::Arc::new(e),
            })?;
        Ok(Self {
            stream,
            codec: RespFrameCodec::new(2),
            opened_at: Instant::now(),
            outstanding: 0,
            pubsub_buf: BytesMut::with_capacity(4096),
        })
    }

    /// Sends a RESP frame and waits for a single response frame.
    pub async fn send_and_receive(&mut self, frame: RespFrame) -> Result<RespFrame, WardenError> {
        let addr = self
            .stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let mut write_buf = BytesMut::new();
        self.codec
            .encode(frame, &mut write_buf)
            .map_err(|e| WardenError::ProtocolViolation {
                addr: addr.clone(),
                detail: e.to_string(),
            })?;

        self.outstanding += 1;
        self.stream
            .write_all(&write_buf)
            .await
            .map_err(|e| WardenError::Network {
                addr: addr.clone(),
                source: std::sync::Arc::new(e),
            })?;

        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            let read_fut = self.stream.read_buf(&mut read_buf);
            match tokio::time::timeout(READ_TIMEOUT, read_fut).await {
                Ok(Ok(0)) => {
                    return Err(WardenError::Network {
                        addr: addr.clone(),
                        source: std::sync::Arc::new(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection closed by peer",
                        )),
                    });
                }
                Ok(Ok(_)) => {
                    if let Some(reply) =
                        self.codec
                            .decode(&mut read_buf)
                            .map_err(|e| WardenError::ProtocolViolation {
                                addr: addr.clone(),
                                detail: e.to_string(),
                            })?
                    {
                        self.outstanding = self.outstanding.saturating_sub(1);
                        return Ok(reply);
                    }
                }
                Ok(Err(e)) => {
                    return Err(WardenError::Network {
                        addr: addr.clone(),
                        source: std::sync::Arc::new(e),
                    });
                }
                Err(_) => return Err(WardenError::Timeout(addr.clone())),
            }
        }
    }

    fn bulk_cmd(parts: &[&str]) -> RespFrame {
        RespFrame::Array(
            parts
                .iter()
                .map(|p| RespFrame::BulkString((*p).into()))
                .collect(),
        )
    }

    pub async fn ping(&mut self) -> Result<String, WardenError> {
        match self.send_and_receive(Self::bulk_cmd(&["PING"])).await? {
            RespFrame::SimpleString(s) => Ok(s),
            other => Err(WardenError::ProtocolViolation {
                addr: "ping".into(),
                detail: format!("unexpected PING reply: {other:?}"),
            }),
        }
    }

    pub async fn auth(&mut self, password: &str) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["AUTH", password]))
            .await?;
        Ok(())
    }

    pub async fn client_setname(&mut self, tag: &str) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["CLIENT", "SETNAME", tag]))
            .await?;
        Ok(())
    }

    pub async fn info_replication(&mut self) -> Result<String, WardenError> {
        match self
            .send_and_receive(Self::bulk_cmd(&["INFO", "replication"]))
            .await?
        {
            RespFrame::BulkString(bs) => Ok(String::from_utf8_lossy(&bs).to_string()),
            other => Err(WardenError::ProtocolViolation {
                addr: "info".into(),
                detail: format!("unexpected INFO reply: {other:?}"),
            }),
        }
    }

    pub async fn subscribe(&mut self, channel: &str) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["SUBSCRIBE", channel]))
            .await?;
        Ok(())
    }

    pub async fn publish(&mut self, channel: &str, payload: &str) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["PUBLISH", channel, payload]))
            .await?;
        Ok(())
    }

    /// Polls a subscribed hello channel for one pushed message, waiting at
    /// most `budget`. Used by the reactor, which only has a small slice of
    /// each tick to spend listening rather than driving a dedicated read
    /// loop per connection. `Ok(None)` on a timeout is the common case: no
    /// push arrived this tick.
    pub async fn poll_pubsub_message(&mut self, budget: Duration) -> Result<Option<RespFrame>, WardenError> {
        let addr = self
            .stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        if let Some(frame) = self
            .codec
            .decode(&mut self.pubsub_buf)
            .map_err(|e| WardenError::ProtocolViolation {
                addr: addr.clone(),
                detail: e.to_string(),
            })?
        {
            return Ok(Some(frame));
        }

        match tokio::time::timeout(budget, self.stream.read_buf(&mut self.pubsub_buf)).await {
            Ok(Ok(0)) => Err(WardenError::Network {
                addr,
                source: std::sync::Arc::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection closed by peer",
                )),
            }),
            Ok(Ok(_)) => self
                .codec
                .decode(&mut self.pubsub_buf)
                .map_err(|e| WardenError::ProtocolViolation { addr, detail: e.to_string() }),
            Ok(Err(e)) => Err(WardenError::Network { addr, source: std::sync::Arc::new(e) }),
            Err(_) => Ok(None),
        }
    }

    pub async fn slaveof(&mut self, host: &str, port: u16) -> Result<(), WardenError> {
        let port_str = port.to_string();
        self.send_and_receive(Self::bulk_cmd(&["REPLICAOF", host, &port_str]))
            .await?;
        Ok(())
    }

    pub async fn slaveof_no_one(&mut self) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["REPLICAOF", "NO", "ONE"]))
            .await?;
        Ok(())
    }

    pub async fn config_rewrite(&mut self) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["CONFIG", "REWRITE"]))
            .await?;
        Ok(())
    }

    pub async fn script_kill(&mut self) -> Result<(), WardenError> {
        self.send_and_receive(Self::bulk_cmd(&["SCRIPT", "KILL"]))
            .await?;
        Ok(())
    }
}

/// How long a command channel may sit idle with an unanswered ping before
/// it is considered stale and torn down, relative to `down_after_period`.
pub fn command_channel_ping_deadline(down_after_period: Duration) -> Duration {
    down_after_period / 2
}

/// A hello (`pc`) channel idle for this multiple of the publish period is
/// torn down and reopened.
pub const HELLO_CHANNEL_IDLE_MULTIPLIER: u32 = 3;

/// Owns the up-to-two logical connections for a single Instance: the
/// command channel (`cc`) used for PING/INFO/SLAVEOF/AUTH/vote-RPC, and the
/// hello channel (`pc`) used only for PRIMARY/REPLICA pub-sub (never
/// opened between supervisors).
#[derive(Debug, Default)]
pub struct ConnectionPool {
    pub cc: Option<WardenClient>,
    pub pc: Option<WardenClient>,
    pub last_ping_on_cc: Option<Instant>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the channels required for `needs_pubsub` are all live.
    pub fn is_connected(&self, needs_pubsub: bool) -> bool {
        self.cc.is_some() && (!needs_pubsub || self.pc.is_some())
    }

    /// Opens the command channel if needed, performing AUTH and the
    /// `CLIENT SETNAME` tagging convention `supervisor-<first8-runid>-cmd`.
    pub async fn ensure_command_channel(
        &mut self,
        addr: SocketAddr,
        my_runid: &str,
        auth_pass: Option<&str>,
    ) -> Result<(), WardenError> {
        if self.cc.is_some() {
            return Ok(());
        }
        let mut client = WardenClient::connect(addr).await?;
        if let Some(pass) = auth_pass {
            client.auth(pass).await?;
        }
        let tag = format!("supervisor-{}-cmd", &short_id(my_runid));
        client.client_setname(&tag).await?;
        self.cc = Some(client);
        Ok(())
    }

    /// Opens the hello channel if needed: connect, AUTH, tag, subscribe to
    /// the hello topic, then an immediate PING.
    pub async fn ensure_hello_channel(
        &mut self,
        addr: SocketAddr,
        my_runid: &str,
        auth_pass: Option<&str>,
        hello_topic: &str,
    ) -> Result<(), WardenError> {
        if self.pc.is_some() {
            return Ok(());
        }
        let mut client = WardenClient::connect(addr).await?;
        if let Some(pass) = auth_pass {
            client.auth(pass).await?;
        }
        let tag = format!("supervisor-{}-pubsub", &short_id(my_runid));
        client.client_setname(&tag).await?;
        client.subscribe(hello_topic).await?;
        client.ping().await.ok();
        self.pc = Some(client);
        Ok(())
    }

    /// Applies the reconnection policy from spec.md §4.1: tear down a
    /// command channel that's been open long enough and has an overdue
    /// ping, and a hello channel idle for 3x the publish period.
    pub fn apply_reconnect_policy(&mut self, down_after_period: Duration, publish_period: Duration) {
        if let Some(cc) = &self.cc {
            let ping_overdue = self
                .last_ping_on_cc
                .map(|t| t.elapsed() > down_after_period / 2)
                .unwrap_or(false);
            if cc.opened_at.elapsed() >= command_channel_ping_deadline(down_after_period)
                && ping_overdue
            {
                self.cc = None;
                self.last_ping_on_cc = None;
            }
        }
        if let Some(pc) = &self.pc
            && pc.opened_at.elapsed() >= publish_period * HELLO_CHANNEL_IDLE_MULTIPLIER
        {
            self.pc = None;
        }
    }

    /// Whether a non-critical periodic command (INFO/PING/PUBLISH) should
    /// be skipped this tick to avoid unbounded queue growth.
    pub fn should_skip_periodic_command(&self) -> bool {
        self.cc
            .as_ref()
            .map(|c| c.outstanding >= MAX_OUTSTANDING_COMMANDS)
            .unwrap_or(false)
    }
}

fn short_id(runid: &str) -> String {
    runid.chars().take(8).collect()
}
