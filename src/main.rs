//! mesos-consul daemon entry point.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

use mesos_consul::check::LabelCheckBuilder;
use mesos_consul::config::Config;
use mesos_consul::privilege::RegexPrivilege;
use mesos_consul::reconcile::{Reconciler, Settings};
use mesos_consul::registry::{ConsulRegistry, MemoryRegistry, Registry};
use mesos_consul::state::{MesosStateSource, StateSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting mesos-consul: masters {:?}, refresh every {}s{}",
        cfg.masters,
        cfg.refresh_secs,
        if cfg.dry_run { " (dry run)" } else { "" }
    );

    let settings = Settings::from_config(&cfg)?;
    let privilege = RegexPrivilege::new(&cfg.whitelist, &cfg.blacklist)?;

    let registry: Arc<dyn Registry> = if cfg.dry_run {
        Arc::new(MemoryRegistry::new())
    } else {
        Arc::new(ConsulRegistry::new(
            cfg.consul_scheme.clone(),
            cfg.consul_port,
            cfg.consul_token.clone(),
            cfg.request_timeout(),
        )?)
    };
    let source = MesosStateSource::new(cfg.masters.clone(), cfg.request_timeout())?;

    let reconciler = Reconciler::new(
        settings,
        registry,
        Arc::new(privilege),
        Arc::new(LabelCheckBuilder),
    );

    let refresh = cfg.refresh();
    let handle = tokio::spawn(async move { run(source, reconciler, refresh).await });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    handle.abort();

    info!("Shutdown complete.");
    Ok(())
}

/// Reconcile on every tick; a failed cycle is logged and retried next tick.
async fn run(source: impl StateSource, reconciler: Reconciler, refresh: Duration) {
    let mut cache_loaded = false;
    let mut ticker = interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = match source.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Unable to fetch cluster state: {}", e);
                continue;
            }
        };
        debug!(
            "Snapshot: {} masters, {} agents, {} running tasks",
            snapshot.masters.len(),
            snapshot.agents.len(),
            snapshot.tasks.len()
        );

        if !cache_loaded {
            let Some(leader) = snapshot.leader() else {
                error!("No leading master in snapshot, skipping cycle");
                continue;
            };
            if let Err(e) = reconciler.load_cache(leader).await {
                error!("Unable to populate cache from {}: {}", leader.ip, e);
                continue;
            }
            cache_loaded = true;
        }

        if let Err(e) = reconciler.reconcile(&snapshot).await {
            error!("Reconciliation cycle failed: {}", e);
        }
    }
}
