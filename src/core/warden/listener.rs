// src/core/warden/listener.rs

//! The admin/RPC TCP listener: the subset of the `SENTINEL` command surface
//! spec.md §6 names (`MONITOR`, `REMOVE`, `SET`, `RESET`, `FAILOVER`,
//! `GET-MASTER-ADDR-BY-NAME`) plus the inter-supervisor
//! `is-master-down-by-addr` vote RPC, on the same `Framed<TcpStream,
//! RespFrameCodec>` dispatch shape the original `warden/listener.rs` used.

use super::config::MonitoredMaster;
use super::election::handle_vote_request;
use super::events::{EventBus, WardenEvent};
use super::instance::InstanceFlags;
use super::rpc::VoteRequest;
use super::state::{GlobalWardenState, MasterState};
use crate::core::protocol::{RespFrame, RespFrameCodec};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{info, warn};
use wildmatch::WildMatch;

const DEFAULT_DOWN_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_secs(180);

/// Everything a connection handler needs to serve a request. Cheap to
/// clone: `Arc<GlobalWardenState>` and `EventBus` (itself `Arc`-backed
/// internally) are the only fields.
#[derive(Clone)]
pub struct ListenerContext {
    pub global: Arc<GlobalWardenState>,
    pub my_runid: String,
    pub event_bus: EventBus,
}

/// Spawns the main TCP listener loop for the Warden admin/RPC surface.
pub async fn run_listener(port: u16, ctx: ListenerContext) -> Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Warden listening for commands on port {}", port);

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    info!("Accepted Warden connection from: {}", addr);
                    if let Err(e) = handle_connection(socket, ctx).await {
                        warn!("Error handling Warden connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed to accept Warden connection: {}", e);
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, ctx: ListenerContext) -> Result<()> {
    let mut framed = Framed::new(socket, RespFrameCodec);

    while let Some(result) = framed.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Error decoding frame from warden client: {}", e);
                break;
            }
        };

        let response = match frame {
            RespFrame::Array(args) => dispatch(&args, &ctx).await,
            _ => RespFrame::Error("ERR invalid command format. Commands must be RESP arrays.".to_string()),
        };

        if let Err(e) = framed.send(response).await {
            warn!("Error sending response to warden client: {}", e);
            break;
        }
    }
    Ok(())
}

fn bulk_str(frame: &RespFrame) -> Option<String> {
    match frame {
        RespFrame::BulkString(bs) => Some(String::from_utf8_lossy(bs).to_string()),
        _ => None,
    }
}

fn err(msg: impl Into<String>) -> RespFrame {
    RespFrame::Error(msg.into())
}

fn addr_reply(addr: SocketAddr) -> RespFrame {
    RespFrame::Array(vec![
        RespFrame::BulkString(addr.ip().to_string().into()),
        RespFrame::BulkString(addr.port().to_string().into()),
    ])
}

async fn dispatch(args: &[RespFrame], ctx: &ListenerContext) -> RespFrame {
    let Some(cmd) = args.first().and_then(bulk_str) else {
        return err("ERR invalid command format");
    };

    if cmd.eq_ignore_ascii_case("ping") {
        return RespFrame::SimpleString("PONG".to_string());
    }

    if cmd.eq_ignore_ascii_case("sentinel") {
        let Some(sub) = args.get(1).and_then(bulk_str) else {
            return err("ERR unknown sentinel subcommand");
        };
        return dispatch_sentinel(&sub, &args[2..], ctx).await;
    }

    err(format!("ERR unknown command '{cmd}'"))
}

async fn dispatch_sentinel(sub: &str, args: &[RespFrame], ctx: &ListenerContext) -> RespFrame {
    let strs: Vec<String> = args.iter().filter_map(bulk_str).collect();

    match sub.to_ascii_lowercase().as_str() {
        "get-master-addr-by-name" => get_master_addr_by_name(&strs, ctx),
        "monitor" => monitor(&strs, ctx).await,
        "remove" => remove(&strs, ctx).await,
        "set" => set(&strs, ctx).await,
        "reset" => reset(&strs, ctx),
        "failover" => failover_cmd(&strs, ctx),
        "is-master-down-by-addr" => is_master_down_by_addr(&strs, ctx).await,
        other => err(format!("ERR unknown sentinel subcommand '{other}'")),
    }
}

fn get_master_addr_by_name(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let Some(name) = args.first() else {
        return err("ERR wrong number of arguments for 'sentinel get-master-addr-by-name'");
    };
    let Some(entry) = ctx.global.masters.get(name) else {
        return RespFrame::Null;
    };
    let state = entry.value().lock();
    // Once promotion has been dispatched the promoted replica is the
    // authoritative target, even before remaining replicas finish
    // reconfiguring and the local topology model swaps `primary.addr`.
    let addr = match state.primary.failover_state {
        super::instance::FailoverState::ReconfReplicas | super::instance::FailoverState::UpdateConfig => {
            state.primary.promoted_replica.unwrap_or(state.primary.addr)
        }
        _ => state.primary.addr,
    };
    addr_reply(addr)
}

async fn monitor(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let [name, ip, port, quorum] = args else {
        return err("ERR wrong number of arguments for 'sentinel monitor'");
    };
    let Ok(ip_addr): Result<IpAddr, _> = ip.parse() else {
        return err("ERR invalid IP address");
    };
    let Ok(port_num): Result<u16, _> = port.parse() else {
        return err("ERR invalid port");
    };
    let Ok(quorum_num): Result<usize, _> = quorum.parse() else {
        return err("ERR invalid quorum");
    };
    if quorum_num == 0 {
        return err("ERR quorum must be >= 1");
    }
    if ctx.global.masters.contains_key(name) {
        return err(format!("ERR master '{name}' is already monitored"));
    }

    let addr = SocketAddr::new(ip_addr, port_num);
    let master_config = MonitoredMaster {
        name: name.clone(),
        ip: ip.clone(),
        port: port_num,
        quorum: quorum_num,
        down_after: DEFAULT_DOWN_AFTER,
        failover_timeout: DEFAULT_FAILOVER_TIMEOUT,
        hello_interval: Duration::from_secs(2),
        parallel_syncs: 1,
        auth_pass: None,
        notification_script: None,
        client_reconfig_script: None,
    };
    let state = MasterState::from_config(master_config, addr);
    ctx.global.masters.insert(name.clone(), Arc::new(Mutex::new(state)));

    ctx.event_bus.emit(WardenEvent::Monitor { master: name.clone() }, None);
    persist(ctx).await;
    RespFrame::SimpleString("OK".to_string())
}

async fn remove(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let Some(name) = args.first() else {
        return err("ERR wrong number of arguments for 'sentinel remove'");
    };
    if ctx.global.masters.remove(name).is_none() {
        return err(format!("ERR no such master with name '{name}'"));
    }
    ctx.event_bus.emit(WardenEvent::Unmonitor { master: name.clone() }, None);
    persist(ctx).await;
    RespFrame::SimpleString("OK".to_string())
}

async fn set(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let [name, option, value] = args else {
        return err("ERR wrong number of arguments for 'sentinel set'");
    };
    let Some(entry) = ctx.global.masters.get(name) else {
        return err(format!("ERR no such master with name '{name}'"));
    };
    {
        let mut state = entry.value().lock();
        let result = apply_set_option(&mut state, option, value);
        if let Err(e) = result {
            return err(e);
        }
    }
    persist(ctx).await;
    RespFrame::SimpleString("OK".to_string())
}

fn apply_set_option(state: &mut MasterState, option: &str, value: &str) -> Result<(), String> {
    match option.to_ascii_lowercase().as_str() {
        "down-after-milliseconds" => {
            let ms: u64 = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            state.primary.down_after_period = Duration::from_millis(ms);
        }
        "failover-timeout" => {
            let ms: u64 = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            state.primary.failover_timeout = Duration::from_millis(ms);
        }
        "parallel-syncs" => {
            let n: usize = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            if n == 0 {
                return Err("ERR parallel-syncs must be >= 1".to_string());
            }
            state.primary.parallel_syncs = n;
        }
        "quorum" => {
            let q: usize = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            if q == 0 {
                return Err("ERR quorum must be >= 1".to_string());
            }
            state.primary.quorum = q;
        }
        "notification-script" => state.primary.notification_path = Some(value.to_string()),
        "client-reconfig-script" => state.primary.client_reconfig_path = Some(value.to_string()),
        "auth-pass" => state.config.auth_pass = Some(value.to_string()),
        other => return Err(format!("ERR unknown option '{other}'")),
    }
    Ok(())
}

fn reset(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let Some(pattern) = args.first() else {
        return err("ERR wrong number of arguments for 'sentinel reset'");
    };
    let matcher = WildMatch::new(pattern);
    let mut reset_count = 0i64;
    for entry in ctx.global.masters.iter() {
        if matcher.matches(entry.key()) {
            let mut state = entry.value().lock();
            state.primary.set_sdown(false);
            state.reset_failover_state();
            reset_count += 1;
        }
    }
    RespFrame::Integer(reset_count)
}

fn failover_cmd(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let Some(name) = args.first() else {
        return err("ERR wrong number of arguments for 'sentinel failover'");
    };
    let Some(entry) = ctx.global.masters.get(name) else {
        return err(format!("ERR no such master with name '{name}'"));
    };
    let mut state = entry.value().lock();
    if state.primary.failover_state != super::instance::FailoverState::None {
        return err("ERR failover already in progress");
    }
    state.primary.flags.insert(InstanceFlags::FORCE_FAILOVER);
    RespFrame::SimpleString("OK".to_string())
}

async fn is_master_down_by_addr(args: &[String], ctx: &ListenerContext) -> RespFrame {
    let [ip, port, epoch, runid] = args else {
        return err("ERR wrong number of arguments for 'sentinel is-master-down-by-addr'");
    };
    let (Ok(ip_addr), Ok(port_num), Ok(req_epoch)) = (ip.parse::<IpAddr>(), port.parse::<u16>(), epoch.parse::<u64>()) else {
        return err("ERR invalid arguments");
    };
    let target = SocketAddr::new(ip_addr, port_num);

    let Some((master_name, master_arc)) = ctx
        .global
        .masters
        .iter()
        .find(|e| e.value().lock().primary.addr == target)
        .map(|e| (e.key().clone(), e.value().clone()))
    else {
        // Unknown address: report "not down", no leader on record.
        return RespFrame::Array(vec![
            RespFrame::Integer(0),
            RespFrame::BulkString(String::new().into()),
            RespFrame::Integer(0),
        ]);
    };

    let req = VoteRequest {
        primary_addr: target,
        req_epoch,
        req_runid: runid.clone(),
    };
    let outcome = {
        let mut state = master_arc.lock();
        handle_vote_request(&ctx.global, &mut state, &req, &ctx.my_runid)
    };

    // Invariant 7: a granted vote is durable before the reply announcing it
    // leaves the process.
    if outcome.newly_granted {
        persist(ctx).await;
        ctx.event_bus.emit(
            WardenEvent::VoteForLeader {
                master: master_name,
                candidate_runid: req.req_runid.clone(),
                epoch: req.req_epoch,
            },
            None,
        );
    }

    outcome.reply.to_resp()
}

async fn persist(ctx: &ListenerContext) {
    let snapshot = ctx.global.snapshot();
    if let Err(e) = snapshot.save(&ctx.global.config_file_path).await {
        warn!("failed to persist warden state after admin command: {}", e);
    }
}
