//! Firebase Realtime Database source.
//!
//! Streams the configured node over the RTDB REST streaming API
//! (`GET <db>/<path>.json` with `Accept: text/event-stream`), mirrors the
//! record locally from `put`/`patch` events, and reports the full record on
//! the bus after every applied event. Any subscription-level failure is
//! reported once as `SourceEvent::Failed` and the actor exits; a new session
//! is needed to reconnect. A stream that stays silent past the idle timeout
//! (keep-alives included) counts as failed too.

mod mirror;
mod sse;

use mirror::RecordMirror;
use sse::{SseEvent, SseParser};

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;

use super::Actor;
use crate::bus::{BusReceiver, BusSender};
use crate::state::SystemState;
use evdash::{ActorState, ActorStatus, FirebaseSection, SourceEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why the stream ended. Everything except `Payload` is terminal.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("subscription cancelled by the server")]
    Cancelled,

    #[error("credentials revoked")]
    AuthRevoked,

    #[error("stream closed by the server")]
    Closed,

    #[error("no data for {0}s, stream stalled")]
    Stalled(u64),

    #[error("malformed event payload: {0}")]
    Payload(String),
}

/// Firebase source actor. Runs its own current-thread runtime on a
/// dedicated thread.
pub struct FirebaseActor {
    section: FirebaseSection,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl FirebaseActor {
    pub fn new(section: FirebaseSection) -> Self {
        Self {
            section,
            shutdown_tx: Mutex::new(None),
        }
    }
}

impl Actor for FirebaseActor {
    fn start(&self, _state: Arc<SystemState>, sender: BusSender, _receiver: BusReceiver) {
        let section = self.section.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(shutdown_tx);

        let spawned = std::thread::Builder::new()
            .name(format!("source:{}", sender.actor_id()))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        sender.emit(SourceEvent::Failed {
                            reason: format!("runtime: {e}"),
                        });
                        return;
                    }
                };
                rt.block_on(run(section, sender, shutdown_rx));
            });
        if let Err(e) = spawned {
            tracing::error!("firebase: failed to spawn thread: {e}");
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

/// Streaming URL for the node: `<db>/<path>.json`, root = `<db>/.json`.
pub fn stream_url(section: &FirebaseSection) -> String {
    format!(
        "{}/{}.json",
        section.database_url.trim_end_matches('/'),
        section.path.trim_matches('/')
    )
}

fn telemetry(section: &FirebaseSection, events: u64) -> HashMap<String, String> {
    HashMap::from([
        ("database".into(), section.database_url.clone()),
        ("path".into(), format!("/{}", section.path.trim_matches('/'))),
        ("events".into(), events.to_string()),
    ])
}

async fn run(section: FirebaseSection, sender: BusSender, mut shutdown_rx: oneshot::Receiver<()>) {
    sender.emit(ActorState::new(ActorStatus::Starting, telemetry(&section, 0)));
    tracing::info!("firebase: subscribing to {}", stream_url(&section));

    let result = tokio::select! {
        r = stream(&section, &sender) => r,
        _ = &mut shutdown_rx => {
            tracing::info!("firebase: unsubscribed");
            sender.emit(ActorState::new(ActorStatus::Disconnected, telemetry(&section, 0)));
            return;
        }
    };

    let e = match result {
        Ok(never) => match never {},
        Err(e) => e,
    };
    report_failure(&section, &sender, &e);
}

fn report_failure(section: &FirebaseSection, sender: &BusSender, e: &SourceError) {
    tracing::warn!("firebase: subscription failed: {e}");
    sender.emit(SourceEvent::Failed {
        reason: e.to_string(),
    });
    let mut t = telemetry(section, 0);
    t.insert("error".into(), e.to_string());
    sender.emit(ActorState::new(ActorStatus::Disconnected, t));
}

async fn stream(section: &FirebaseSection, sender: &BusSender) -> Result<Infallible, SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let mut request = client
        .get(stream_url(section))
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if let Some(auth) = &section.auth {
        request = request.query(&[("auth", auth)]);
    }

    let idle = section.idle_timeout();
    let response = tokio::time::timeout(idle, request.send())
        .await
        .map_err(|_| SourceError::Stalled(idle.as_secs()))??;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }

    sender.emit(SourceEvent::Subscribed);
    sender.emit(ActorState::new(ActorStatus::Connected, telemetry(section, 0)));

    pump(
        Box::pin(response.bytes_stream()),
        idle,
        section,
        sender,
    )
    .await
}

/// Run the event stream through the parser and mirror until it ends, errors
/// or goes `idle` without a single chunk.
async fn pump<S, B, E>(
    mut body: S,
    idle: Duration,
    section: &FirebaseSection,
    sender: &BusSender,
) -> Result<Infallible, SourceError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    SourceError: From<E>,
{
    let mut parser = SseParser::new();
    let mut mirror = RecordMirror::new();
    let mut events: u64 = 0;
    loop {
        let chunk = match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => return Err(SourceError::Closed),
            Err(_) => return Err(SourceError::Stalled(idle.as_secs())),
        };
        for event in parser.feed(chunk.as_ref()) {
            match apply_event(&mut mirror, &event) {
                Ok(Some(update)) => {
                    events += 1;
                    sender.emit(update);
                    if events.is_multiple_of(100) {
                        sender.emit(ActorState::new(
                            ActorStatus::Connected,
                            telemetry(section, events),
                        ));
                    }
                }
                Ok(None) => {}
                Err(SourceError::Payload(msg)) => {
                    tracing::warn!("firebase: skipping {} event: {msg}", event.event);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Apply one stream event to the mirror. Returns the callback to report, if
/// any.
fn apply_event(
    mirror: &mut RecordMirror,
    event: &SseEvent,
) -> Result<Option<SourceEvent>, SourceError> {
    match event.event.as_str() {
        "put" | "patch" => {
            let payload: Value = serde_json::from_str(&event.data)
                .map_err(|e| SourceError::Payload(e.to_string()))?;
            let path = payload
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| SourceError::Payload("missing path".into()))?
                .to_string();
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            if event.event == "put" {
                mirror.put(&path, data);
            } else if !mirror.patch(&path, data) {
                return Err(SourceError::Payload("patch data is not an object".into()));
            }
            Ok(Some(mirror.event()))
        }
        "keep-alive" => Ok(None),
        "cancel" => Err(SourceError::Cancelled),
        "auth_revoked" => Err(SourceError::AuthRevoked),
        other => {
            tracing::debug!("firebase: ignoring {other} event");
            Ok(None)
        }
    }
}
