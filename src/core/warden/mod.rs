// src/core/warden/mod.rs

//! The main module for SpinelDB's high-availability and monitoring system, "Warden".
//!
//! Warden runs as a separate process mode (`--warden`) and is responsible for:
//! - Monitoring the health of primary and replica SpinelDB instances.
//! - Detecting when a primary instance is down (Subjective Down and Objective Down).
//! - Coordinating with other Warden instances to reach a quorum.
//! - Triggering and managing an automated failover process to promote a replica to a new primary.
//! - Providing an API for clients to query the current address of a master.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

// Declare all sub-modules that make up the Warden functionality.
pub mod addr;
pub mod client;
pub mod config;
pub mod election;
pub mod errors;
pub mod events;
pub mod failover;
pub mod health;
pub mod instance;
pub mod listener;
pub mod persistence;
pub mod quorum;
pub mod rpc;
pub mod scheduler;
pub mod scripts;
pub mod state;

use self::addr::WardenAddress;
use self::config::WardenConfig;
use self::events::EventBus;
use self::instance::{Instance, RoleKind};
use self::listener::{run_listener, ListenerContext};
use self::persistence::PersistedState;
use self::scheduler::Scheduler;
use self::scripts::ScriptRunner;
use self::state::{GlobalWardenState, MasterState};

/// Tick rate is randomized within this band around 10Hz so that several
/// Wardens watching the same masters don't evaluate elections in lockstep.
const BASE_HZ: f64 = 10.0;
const HZ_JITTER: f64 = 0.10;

/// The main entry point for running SpinelDB in Warden mode.
pub async fn run(config_path: &str) -> Result<()> {
    let config = WardenConfig::from_file(config_path).await?;
    info!(
        "Warden starting on {}:{} with {} master(s) to monitor.",
        config.host,
        config.port,
        config.masters.len()
    );

    let mut runid_bytes = [0u8; 20];
    getrandom::fill(&mut runid_bytes).map_err(|e| anyhow!("failed to generate random run ID: {}", e))?;
    let my_run_id = hex::encode(runid_bytes);
    info!("Warden run ID: {}", my_run_id);

    let my_announce_addr: SocketAddr = format!(
        "{}:{}",
        config.announce_ip.as_ref().unwrap_or(&config.host),
        config.port
    )
    .parse()
    .context("invalid announce address")?;

    let hz = BASE_HZ * (1.0 + rand::thread_rng().gen_range(-HZ_JITTER..=HZ_JITTER));

    let global_state = Arc::new(GlobalWardenState::new(
        my_run_id.clone(),
        hz,
        config.config_file_path.clone(),
    ));

    // Resume-on-restart: a prior run's topology/epoch/vote snapshot, if one
    // exists, seeds `current_epoch` and each master's leader/config epoch
    // before the first tick so a restarted Warden never re-casts a vote it
    // already granted.
    let persisted = match PersistedState::load(&config.config_file_path).await {
        Ok(persisted) => {
            info!(
                "loaded persisted warden state from '{}' (current_epoch={})",
                config.config_file_path, persisted.current_epoch
            );
            Some(persisted)
        }
        Err(e) => {
            info!(
                "no usable persisted warden state at '{}' ({}), starting fresh",
                config.config_file_path, e
            );
            None
        }
    };
    if let Some(p) = &persisted {
        global_state.adopt_epoch(p.current_epoch);
    }

    for master_config in &config.masters {
        let name = master_config.name.clone();
        let addr = WardenAddress::new(master_config.ip.clone(), master_config.port)
            .resolve()
            .await
            .with_context(|| format!("master '{name}': cannot resolve {}:{}", master_config.ip, master_config.port))?;

        let mut master_state = MasterState::from_config(master_config.clone(), addr);
        if let Some(p) = &persisted
            && let Some(saved) = p.masters.iter().find(|m| m.name == name)
        {
            master_state.primary.config_epoch = saved.config_epoch;
            master_state.primary.leader_epoch = saved.leader_epoch;

            for slave_addr in &saved.known_slaves {
                master_state
                    .primary
                    .replicas
                    .insert(*slave_addr, Instance::new_peer(RoleKind::Replica, *slave_addr));
            }
            for sentinel in &saved.known_sentinels {
                let sup_addr = SocketAddr::new(sentinel.ip, sentinel.port);
                let mut sup = Instance::new_peer(RoleKind::Supervisor, sup_addr);
                sup.runid = sentinel.runid.clone();
                master_state.primary.supervisors.insert(sup_addr, sup);
            }
        }

        info!(
            "monitoring master '{}' at {} (quorum={})",
            &name, addr, master_config.quorum
        );
        global_state.masters.insert(name, Arc::new(parking_lot::Mutex::new(master_state)));
    }

    let (scripts, script_outcomes) = ScriptRunner::new();
    let (event_bus, outbound_rx) = EventBus::new(scripts);

    let scheduler = Scheduler::new(
        global_state.clone(),
        my_run_id.clone(),
        my_announce_addr,
        event_bus.clone(),
        outbound_rx,
        script_outcomes,
    );

    let listener_ctx = ListenerContext {
        global: global_state.clone(),
        my_runid: my_run_id,
        event_bus,
    };

    let scheduler_handle = tokio::spawn(scheduler.run());
    let listener_handle = tokio::spawn(run_listener(config.port, listener_ctx));

    tokio::select! {
        res = scheduler_handle => {
            match res {
                Ok(()) => error!("warden scheduler task exited unexpectedly"),
                Err(e) => error!("warden scheduler task panicked: {}", e),
            }
            Err(anyhow!("warden scheduler task terminated"))
        }
        res = listener_handle => {
            match &res {
                Ok(Ok(())) => warn!("warden listener task exited unexpectedly"),
                Ok(Err(e)) => error!("warden listener task failed: {}", e),
                Err(e) => error!("warden listener task panicked: {}", e),
            }
            Err(anyhow!("warden listener task terminated"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, stopping warden");
            Ok(())
        }
    }
}
