//! System actor: default actor that always runs and owns the session
//! lifecycle.
//!
//! A session is one `core` actor (with a fresh `DashboardWriter`
//! generation) plus one `source` actor. `SessionCommand::Restart` tears
//! both down and starts a new pair; this is the manual retry after a failed
//! connection.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;

use crate::actors::reconciler::{CoreActor, SessionContext};
use crate::actors::{Actor, CORE_ID, SOURCE_ID, resolve_source, start_actor};
use crate::bus::{BusReceiver, BusSender, PollError};
use crate::state::SystemState;
use evdash::{AlertMessage, EvdashEvent, EvdashMessage, SessionCommand};

const CORE_READY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Start a new session: core first, then (once the core is polling) the
/// source, so no source event can be missed. Returns the session number.
pub(crate) fn start_session(
    state: &Arc<SystemState>,
    bus_tx: &broadcast::Sender<EvdashMessage>,
    context: &SessionContext,
) -> anyhow::Result<u64> {
    let snap = state.system.snapshot();
    let writer = state.dashboard.begin_session();
    let session = writer.generation();

    let (core, ready_rx) = CoreActor::new(writer, snap.default_mode, context.clone());
    start_actor(CORE_ID.into(), Box::new(core), state, bus_tx);
    ready_rx
        .recv_timeout(CORE_READY_TIMEOUT)
        .with_context(|| format!("session {session}: core actor did not start"))?;

    tracing::info!("session {session}: starting source ({})", snap.source.label());
    start_actor(SOURCE_ID.into(), resolve_source(&snap.source), state, bus_tx);
    Ok(session)
}

/// Stop the current session (source first, then core) and start a new one.
pub(crate) fn restart_session(
    state: &Arc<SystemState>,
    bus_tx: &broadcast::Sender<EvdashMessage>,
    context: &SessionContext,
) -> anyhow::Result<u64> {
    for id in [SOURCE_ID, CORE_ID] {
        state.stop_actor(id);
        state.remove_actor(id);
    }
    std::thread::sleep(Duration::from_millis(100));
    start_session(state, bus_tx, context)
}

// ---------------------------------------------------------------------------
// System actor
// ---------------------------------------------------------------------------

struct Parts {
    state: Arc<SystemState>,
    bus_tx: broadcast::Sender<EvdashMessage>,
    context: SessionContext,
    ready_tx: std_mpsc::SyncSender<()>,
}

/// System actor. Always-on, not config-driven.
pub struct SystemActor {
    parts: Mutex<Option<Parts>>,
}

impl SystemActor {
    pub fn new(
        state: Arc<SystemState>,
        bus_tx: broadcast::Sender<EvdashMessage>,
        context: SessionContext,
    ) -> (Self, std_mpsc::Receiver<()>) {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(0);
        let actor = Self {
            parts: Mutex::new(Some(Parts {
                state,
                bus_tx,
                context,
                ready_tx,
            })),
        };
        (actor, ready_rx)
    }
}

impl Actor for SystemActor {
    fn start(&self, _state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver) {
        let Some(parts) = self.parts.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            tracing::error!("system: start() called more than once");
            return;
        };
        let spawned = std::thread::Builder::new()
            .name("system".into())
            .spawn(move || run(parts, sender, receiver));
        if let Err(e) = spawned {
            tracing::error!("system: failed to spawn thread: {e}");
        }
    }
}

fn run(parts: Parts, sender: BusSender, mut receiver: BusReceiver) {
    let Parts {
        state,
        bus_tx,
        context,
        ready_tx,
    } = parts;

    // Signal main thread that we're up and polling.
    let _ = ready_tx.send(());
    drop(ready_tx);

    loop {
        match receiver.poll() {
            Err(PollError::Shutdown) => return,
            Ok(None) => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(Some(msg)) => {
                if let EvdashEvent::Session(SessionCommand::Restart) = msg.event {
                    tracing::info!("system: session restart requested by '{}'", msg.source);
                    match restart_session(&state, &bus_tx, &context) {
                        Ok(session) => tracing::info!("system: session {session} running"),
                        Err(e) => {
                            tracing::warn!("system: session restart failed: {e:#}");
                            sender.emit(AlertMessage::error(format!(
                                "session restart failed: {e:#}"
                            )));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::geocode::Geocoder;
    use crate::state::config::generate_id;
    use evdash::{CorePhase, GeocoderSection, MockSourceSection, SourceSection};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn restart_replaces_the_session() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let path = std::env::temp_dir()
            .join(format!("evdash-test-{}", generate_id()))
            .join("config.toml");
        let state = Arc::new(SystemState::new(path));
        state.system.override_with(|c| {
            c.source = SourceSection::Mock(MockSourceSection {
                interval_ms: 10,
                ..Default::default()
            });
        });
        let (bus_tx, _) = broadcast::channel(1024);
        let context = SessionContext {
            geocoder: Arc::new(Geocoder::from_section(&GeocoderSection::default()).unwrap()),
            runtime: rt.handle().clone(),
        };

        let first = start_session(&state, &bus_tx, &context).unwrap();
        assert!(wait_for(|| state
            .dashboard
            .snapshot()
            .is_some_and(|v| v.phase == CorePhase::Streaming && v.telemetry.speed > 0.0)));

        let second = restart_session(&state, &bus_tx, &context).unwrap();
        assert_eq!(second, first + 1);
        let mut ids = state.actor_ids();
        ids.sort();
        assert_eq!(ids, vec![CORE_ID.to_string(), SOURCE_ID.to_string()]);
        assert!(wait_for(|| state
            .dashboard
            .snapshot()
            .is_some_and(|v| v.phase == CorePhase::Streaming)));

        for id in state.actor_ids() {
            state.stop_actor(&id);
        }
    }
}
