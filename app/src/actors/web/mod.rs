//! Axum web server: REST endpoints + WebSocket event streaming.

pub mod routes;
pub mod types;
pub mod ws;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, oneshot};
use tower_http::cors::CorsLayer;

use crate::actors::{Actor, actor_names};
use crate::bus::{BusReceiver, BusSender};
use crate::state::SystemState;
use evdash::{ActorState, ActorStatus, ActorStatusResponse, EvdashEvent, EvdashMessage};

const BIND_RETRY: Duration = Duration::from_secs(3);

/// Shared state for the web layer.
pub struct WebState {
    pub root: Arc<SystemState>,
    pub bus_tx: broadcast::Sender<EvdashMessage>,
    /// Last status reported by each actor, keyed by actor id.
    pub actors: RwLock<HashMap<String, ActorStatusResponse>>,
    pub addr: SocketAddr,
    pub actor_id: String,
    pub ws_count: AtomicU64,
    pub request_count: AtomicU64,
}

impl WebState {
    /// Put an operator command on the bus, stamped with `source`.
    pub fn publish(&self, event: impl Into<EvdashEvent>, source: &str) {
        let _ = self.bus_tx.send(EvdashMessage::new(event).source(source));
    }

    /// Report this server's own status (bind address, open sockets, request
    /// count) under its actor id.
    pub fn report(&self, status: ActorStatus, error: Option<String>) {
        let mut telemetry = HashMap::from([
            ("bind".into(), self.addr.to_string()),
            (
                "websockets".into(),
                self.ws_count.load(Ordering::Relaxed).to_string(),
            ),
            (
                "requests".into(),
                self.request_count.load(Ordering::Relaxed).to_string(),
            ),
        ]);
        if let Some(error) = error {
            telemetry.insert("error".into(), error);
        }
        self.publish(ActorState::new(status, telemetry), &self.actor_id);
    }
}

// ---------------------------------------------------------------------------
// WebActor: wraps the axum web server as a normal actor
// ---------------------------------------------------------------------------

/// Web server actor. Runs axum on its own thread and runtime.
pub struct WebActor {
    addr: SocketAddr,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl WebActor {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown_tx: Mutex::new(None),
        }
    }
}

impl Actor for WebActor {
    fn start(&self, state: Arc<SystemState>, sender: BusSender, _receiver: BusReceiver) {
        let addr = self.addr;
        let actor_id = sender.actor_id().to_string();
        let bus_tx = sender.raw_sender().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);

        let thread_name = actor_id.clone();
        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(run(addr, actor_id, state, bus_tx, shutdown_rx)),
                Err(e) => tracing::error!("web server: failed to create runtime: {e}"),
            });
        if let Err(e) = spawned {
            tracing::error!("web server: failed to spawn thread: {e}");
        }
    }

    fn stop(&self) {
        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Router + server
// ---------------------------------------------------------------------------

pub fn router(state: Arc<WebState>) -> Router {
    // Request counter middleware
    let counter_state = Arc::clone(&state);
    let count_middleware = axum::middleware::from_fn(move |req, next: axum::middleware::Next| {
        let st = Arc::clone(&counter_state);
        async move {
            st.request_count.fetch_add(1, Ordering::Relaxed);
            next.run(req).await
        }
    });

    Router::new()
        .route("/api/dashboard", get(routes::get_dashboard))
        .route("/api/status", get(routes::get_status))
        .route("/api/search", post(routes::post_search))
        .route("/api/location/reset", post(routes::post_reset_location))
        .route("/api/mode", post(routes::post_mode))
        .route("/api/sos", post(routes::post_sos))
        .route("/api/session/restart", post(routes::post_restart))
        .route("/api/ws", get(ws::ws_upgrade))
        .layer(count_middleware)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the web server until the stop signal.
async fn run(
    addr: SocketAddr,
    actor_id: String,
    root: Arc<SystemState>,
    bus_tx: broadcast::Sender<EvdashMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let actors = actor_names(&root.system.snapshot())
        .into_iter()
        .map(|(id, name)| (id, ActorStatusResponse::new(name)))
        .collect();
    let state = Arc::new(WebState {
        root,
        bus_tx: bus_tx.clone(),
        actors: RwLock::new(actors),
        addr,
        actor_id,
        ws_count: AtomicU64::new(0),
        request_count: AtomicU64::new(0),
    });

    tokio::spawn(track_actor_status(Arc::clone(&state), bus_tx.subscribe()));

    let Some(listener) = bind(&state, &mut shutdown_rx).await else {
        return;
    };
    tracing::info!("web server listening on {addr}");
    state.report(ActorStatus::Connected, None);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async { drop(shutdown_rx.await) })
        .await
        .ok();
}

/// Bind the listener, retrying every 3s while the address is taken. `None`
/// if stopped first.
async fn bind(state: &WebState, shutdown_rx: &mut oneshot::Receiver<()>) -> Option<TcpListener> {
    loop {
        let e = match TcpListener::bind(state.addr).await {
            Ok(listener) => return Some(listener),
            Err(e) => e,
        };
        tracing::warn!("web server: failed to bind {}: {e}, retrying in 3s", state.addr);
        state.report(ActorStatus::Disconnected, Some(format!("bind failed: {e}")));
        tokio::select! {
            _ = tokio::time::sleep(BIND_RETRY) => {}
            _ = &mut *shutdown_rx => return None,
        }
    }
}

/// Mirror every actor's `ActorStatus` into `WebState::actors` for
/// `GET /api/status`.
async fn track_actor_status(state: Arc<WebState>, mut bus_rx: broadcast::Receiver<EvdashMessage>) {
    loop {
        match bus_rx.recv().await {
            Ok(msg) => {
                if let EvdashEvent::ActorStatus(update) = msg.event {
                    record_status(&mut *state.actors.write().await, msg.source, update);
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("web: status tracker lagged, dropped {n} events");
            }
        }
    }
}

fn record_status(
    actors: &mut HashMap<String, ActorStatusResponse>,
    source: String,
    update: ActorState,
) {
    let entry = actors
        .entry(source)
        .or_insert_with(|| ActorStatusResponse::new(String::new()));
    entry.status = update.status;
    entry.telemetry = update.telemetry;
}
