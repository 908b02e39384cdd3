//! REST endpoint handlers.
//!
//! Commands are fire-and-forget: each handler puts one event on the bus and
//! answers 202. The effect shows up in the next `GET /api/dashboard` (or as
//! a `dashboard` event on the WebSocket).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::WebState;
use super::types::{ModeRequest, SearchRequest, StatusResponse};
use evdash::{DashboardCommand, DashboardView, SessionCommand};

/// Bus source for REST-originated commands.
const SOURCE: &str = "web";

/// GET /api/dashboard: latest published view. 503 until the first session
/// has published.
pub async fn get_dashboard(
    State(state): State<Arc<WebState>>,
) -> Result<Json<DashboardView>, StatusCode> {
    state
        .root
        .dashboard
        .snapshot()
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// GET /api/status
pub async fn get_status(State(state): State<Arc<WebState>>) -> Json<StatusResponse> {
    let actors = state.actors.read().await.clone();
    Json(StatusResponse { actors })
}

/// POST /api/search
pub async fn post_search(
    State(state): State<Arc<WebState>>,
    Json(body): Json<SearchRequest>,
) -> StatusCode {
    state.publish(DashboardCommand::SubmitSearch { query: body.query }, SOURCE);
    StatusCode::ACCEPTED
}

/// POST /api/location/reset
pub async fn post_reset_location(State(state): State<Arc<WebState>>) -> StatusCode {
    state.publish(DashboardCommand::ResetLocation, SOURCE);
    StatusCode::ACCEPTED
}

/// POST /api/mode
pub async fn post_mode(
    State(state): State<Arc<WebState>>,
    Json(body): Json<ModeRequest>,
) -> StatusCode {
    state.publish(DashboardCommand::SelectMode { mode: body.mode }, SOURCE);
    StatusCode::ACCEPTED
}

/// POST /api/sos: stub; surfaces as a warn alert only.
pub async fn post_sos(State(state): State<Arc<WebState>>) -> StatusCode {
    state.publish(DashboardCommand::Sos, SOURCE);
    StatusCode::ACCEPTED
}

/// POST /api/session/restart: manual retry after a failed connection.
pub async fn post_restart(State(state): State<Arc<WebState>>) -> StatusCode {
    state.publish(SessionCommand::Restart, SOURCE);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;

    use chrono::Utc;
    use tokio::sync::{RwLock, broadcast};

    use crate::reconcile::TelemetryCore;
    use crate::state::SystemState;
    use crate::state::config::generate_id;
    use evdash::{DriveMode, EvdashEvent, EvdashMessage};

    fn web_state() -> (Arc<WebState>, broadcast::Receiver<EvdashMessage>) {
        let path = std::env::temp_dir()
            .join(format!("evdash-test-{}", generate_id()))
            .join("config.toml");
        let (bus_tx, bus_rx) = broadcast::channel(16);
        let state = WebState {
            root: Arc::new(SystemState::new(path)),
            bus_tx,
            actors: RwLock::new(HashMap::new()),
            addr: "127.0.0.1:0".parse().unwrap(),
            actor_id: "webserver.0".into(),
            ws_count: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
        };
        (Arc::new(state), bus_rx)
    }

    #[tokio::test]
    async fn dashboard_unavailable_until_published() {
        let (state, _rx) = web_state();
        assert_eq!(
            get_dashboard(State(Arc::clone(&state))).await.err(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );

        let writer = state.root.dashboard.begin_session();
        let core = TelemetryCore::new(writer.generation(), DriveMode::Eco, Utc::now());
        writer.publish(core.view());

        let Json(view) = get_dashboard(State(state)).await.unwrap();
        assert_eq!(view.mode, DriveMode::Eco);
    }

    #[tokio::test]
    async fn commands_go_to_the_bus() {
        let (state, mut rx) = web_state();
        let status = post_search(
            State(Arc::clone(&state)),
            Json(SearchRequest {
                query: "Tokyo".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.source, "web");
        assert!(matches!(
            msg.event,
            EvdashEvent::Command(DashboardCommand::SubmitSearch { ref query }) if query == "Tokyo"
        ));

        post_restart(State(state)).await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg.event,
            EvdashEvent::Session(SessionCommand::Restart)
        ));
    }
}
