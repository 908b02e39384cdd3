use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

mod actors;
mod bus;
mod geocode;
mod reconcile;
mod state;

use actors::Actor;
use actors::reconciler::SessionContext;
use bus::BusSender;
use evdash::{DriveMode, EvdashMessage, SourceSection};
use geocode::Geocoder;
use state::SystemState;

#[derive(Parser, Debug, Clone)]
#[command(name = "evdash", about = "Live EV telemetry dashboard core")]
struct Config {
    /// Config file path (default: ~/.config/evdash/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the synthetic vehicle instead of the configured source (this run only)
    #[arg(long)]
    mock: bool,

    /// Initial drive mode (overrides `default_mode` for this run)
    #[arg(long, value_enum)]
    mode: Option<DriveMode>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("evdash=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("debug logging enabled");

    let cli = Config::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(state::config::default_config_path);

    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();

    // Single unified bus
    let (bus_tx, _) = broadcast::channel::<EvdashMessage>(1024);

    // Build shared state root (loads or creates the config file)
    let state = Arc::new(SystemState::new(config_path));
    tracing::info!("config: {}", state.system.path().display());

    // Command-line overrides stay in memory
    if cli.mock {
        state.system.override_with(|c| {
            if !matches!(c.source, SourceSection::Mock(_)) {
                c.source = SourceSection::Mock(Default::default());
            }
        });
    }
    if let Some(mode) = cli.mode {
        state.system.override_with(|c| c.default_mode = mode);
    }

    let snap = state.system.snapshot();
    let geocoder = Geocoder::from_section(&snap.geocoder).context("failed to build geocoder")?;
    tracing::info!("geocoder: {}", geocoder.endpoint());
    let context = SessionContext {
        geocoder: Arc::new(geocoder),
        runtime: rt.handle().clone(),
    };

    // System actor: owns the session lifecycle (restart on request).
    // Must be fully up before the session starts so no bus events are missed.
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let sender = BusSender::new(
            actors::SYSTEM_ID.into(),
            bus_tx.clone(),
            Arc::clone(&shutdown),
        );
        let receiver = sender.subscribe();
        let (actor, ready_rx) =
            actors::system::SystemActor::new(Arc::clone(&state), bus_tx.clone(), context.clone());
        actor.start(Arc::clone(&state), sender, receiver);
        ready_rx.recv().context("system actor failed to start")?;
        state.register_actor(actors::SYSTEM_ID.into(), Box::new(actor), shutdown);
    }

    // First session: core + source
    let session = actors::system::start_session(&state, &bus_tx, &context)?;
    tracing::info!("session {session} running");

    // Webservers
    for ra in actors::resolve_webservers(&snap) {
        tracing::info!("starting actor '{}' ({})", ra.id, ra.name);
        actors::start_actor(ra.id, ra.actor, &state, &bus_tx);
    }

    // Drain bus (keeps broadcast channel healthy when no other subscriber).
    // Alerts are surfaced in the log here.
    let mut drain_rx = bus_tx.subscribe();
    let drain_handle = tokio::spawn(async move {
        loop {
            match drain_rx.recv().await {
                Ok(msg) => {
                    if let evdash::EvdashEvent::Alert(alert) = &msg.event {
                        tracing::info!(
                            "alert [{}] from '{}': {}",
                            alert.level,
                            msg.source,
                            alert.message
                        );
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("drain subscriber lagged, dropped {n} events");
                }
            }
        }
    });

    rt.block_on(async { tokio::signal::ctrl_c().await })?;

    // Shutdown: stop all actors (including webserver) via registry
    tracing::info!("shutting down...");
    for id in state.actor_ids() {
        state.stop_actor(&id);
    }
    // Drop bus_tx closes the broadcast channel as secondary signal
    drop(bus_tx);
    drain_handle.abort();

    Ok(())
}
