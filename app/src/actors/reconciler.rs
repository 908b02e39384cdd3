//! Reconciler actor: runs one session's `TelemetryCore`.
//!
//! Consumes source callbacks (from the `source` actor only), operator
//! commands, and geocode outcomes from the bus, one at a time. After every
//! applied change the view is published through the session's
//! `DashboardWriter` and echoed on the bus as a `Dashboard` event.
//!
//! Geocode lookups run as tasks on the shared tokio runtime and post their
//! result back to the bus as a `GeocodeOutcome`; the core decides whether
//! the result is still current.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use super::{Actor, SOURCE_ID};
use crate::bus::{BusReceiver, BusSender, PollError};
use crate::geocode::Geocoder;
use crate::reconcile::{SearchTicket, TelemetryCore};
use crate::state::{DashboardWriter, SystemState};
use evdash::{
    ActorState, ActorStatus, AlertMessage, DashboardCommand, DriveMode, EvdashEvent,
    EvdashMessage, SourceEvent,
};

/// Long-lived services shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub geocoder: Arc<Geocoder>,
    pub runtime: tokio::runtime::Handle,
}

struct Parts {
    writer: DashboardWriter,
    context: SessionContext,
    ready_tx: std_mpsc::SyncSender<()>,
}

/// One session's reconciliation core. Signals on the ready channel once it
/// is polling the bus, so the source can be started without losing events.
pub struct CoreActor {
    mode: DriveMode,
    parts: Mutex<Option<Parts>>,
}

impl CoreActor {
    pub fn new(
        writer: DashboardWriter,
        mode: DriveMode,
        context: SessionContext,
    ) -> (Self, std_mpsc::Receiver<()>) {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(0);
        let actor = Self {
            mode,
            parts: Mutex::new(Some(Parts {
                writer,
                context,
                ready_tx,
            })),
        };
        (actor, ready_rx)
    }
}

impl Actor for CoreActor {
    fn start(&self, _state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver) {
        let Some(parts) = self.parts.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            tracing::error!("core: start() called more than once");
            return;
        };
        let mode = self.mode;
        let spawned = std::thread::Builder::new()
            .name(format!("core:{}", parts.writer.generation()))
            .spawn(move || run(parts, mode, sender, receiver));
        if let Err(e) = spawned {
            tracing::error!("core: failed to spawn thread: {e}");
        }
    }
}

fn status(core: &TelemetryCore) -> ActorState {
    let status = if core.is_terminated() {
        ActorStatus::Disconnected
    } else {
        ActorStatus::Connected
    };
    ActorState::new(
        status,
        HashMap::from([
            ("session".into(), core.session().to_string()),
            ("phase".into(), core.phase().to_string()),
            ("connection".into(), core.connection().to_string()),
            ("mode".into(), core.mode().to_string()),
        ]),
    )
}

/// Publish the current view. Bus echo only while this session is current.
fn publish(writer: &DashboardWriter, sender: &BusSender, core: &TelemetryCore) {
    let view = core.view();
    if writer.publish(view.clone()) {
        sender.emit(view);
    } else {
        tracing::debug!("core: session {} superseded, view dropped", core.session());
    }
}

fn run(parts: Parts, mode: DriveMode, sender: BusSender, mut receiver: BusReceiver) {
    let Parts {
        writer,
        context,
        ready_tx,
    } = parts;
    let mut core = TelemetryCore::new(writer.generation(), mode, Utc::now());
    tracing::info!("core: session {} started (mode {mode})", core.session());

    publish(&writer, &sender, &core);
    sender.emit(status(&core));

    // Signal the system actor that we're up and polling.
    let _ = ready_tx.send(());
    drop(ready_tx);

    let mut last_phase = core.phase();
    loop {
        match receiver.poll() {
            Err(PollError::Shutdown) => {
                if core.shutdown() {
                    publish(&writer, &sender, &core);
                }
                sender.emit(ActorState::new(ActorStatus::Disconnected, HashMap::new()));
                tracing::info!("core: session {} stopped", core.session());
                return;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Ok(Some(msg)) => {
                if recover_from_lag(&mut core, receiver.take_lagged()) {
                    publish(&writer, &sender, &core);
                }
                if handle_message(&mut core, &context, &sender, msg) {
                    publish(&writer, &sender, &core);
                }
                if core.phase() != last_phase {
                    last_phase = core.phase();
                    sender.emit(status(&core));
                }
            }
        }
    }
}

/// Dropped bus events may include a search outcome; a search still loading
/// after lag is failed so it can be retried.
fn recover_from_lag(core: &mut TelemetryCore, dropped: u64) -> bool {
    if dropped == 0 {
        return false;
    }
    tracing::warn!("core: lagged, {dropped} bus events lost");
    core.abandon_search("search result lost, please retry")
}

/// Apply one bus message to the core. Returns whether the view changed.
fn handle_message(
    core: &mut TelemetryCore,
    context: &SessionContext,
    sender: &BusSender,
    msg: EvdashMessage,
) -> bool {
    match msg.event {
        EvdashEvent::Source(event) if msg.source == SOURCE_ID => {
            let failure = match &event {
                SourceEvent::Failed { reason } => Some(reason.clone()),
                _ => None,
            };
            let changed = core.ingest(event, Utc::now());
            if changed && let Some(reason) = failure {
                sender.emit(AlertMessage::error(format!(
                    "connection failed: {reason}. Restart the session to retry"
                )));
            }
            changed
        }
        EvdashEvent::Command(cmd) => handle_command(core, context, sender, cmd),
        EvdashEvent::GeocodeOutcome(outcome) => core.apply_search_outcome(outcome),
        _ => false,
    }
}

fn handle_command(
    core: &mut TelemetryCore,
    context: &SessionContext,
    sender: &BusSender,
    cmd: DashboardCommand,
) -> bool {
    if core.is_terminated() {
        tracing::debug!("core: session terminated, ignoring {cmd:?}");
        return false;
    }
    match cmd {
        DashboardCommand::SubmitSearch { query } => {
            if let Some(ticket) = core.submit_search(&query) {
                spawn_lookup(context, sender.clone(), ticket);
            }
            true
        }
        DashboardCommand::ResetLocation => core.reset_location(),
        DashboardCommand::SelectMode { mode } => core.select_mode(mode),
        DashboardCommand::Sos => {
            let pos = core.vehicle_position();
            tracing::warn!("core: SOS requested at {:.5},{:.5}", pos.lat, pos.lng);
            sender.emit(AlertMessage::warn(format!(
                "SOS requested at {:.5}, {:.5} (no emergency service configured)",
                pos.lat, pos.lng
            )));
            false
        }
    }
}

fn spawn_lookup(context: &SessionContext, sender: BusSender, ticket: SearchTicket) {
    let geocoder = Arc::clone(&context.geocoder);
    context.runtime.spawn(async move {
        let result = geocoder.lookup(&ticket.query).await;
        sender.emit(ticket.outcome(result));
    });
}
