//! Actor infrastructure: shared trait, bus helpers, and actor resolution.

pub mod firebase;
pub mod mock;
pub mod reconciler;
pub mod system;
pub mod web;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;

use crate::bus::{BusReceiver, BusSender};
use crate::state::SystemState;
use crate::state::config::{EvdashConfig, SourceSection, global_id};
use evdash::EvdashMessage;

/// Actor ID of the reconciliation core of the current session.
pub const CORE_ID: &str = "core";
/// Actor ID of the real-time data source of the current session.
pub const SOURCE_ID: &str = "source";
/// Actor ID of the always-on system actor.
pub const SYSTEM_ID: &str = "system";

// ---------------------------------------------------------------------------
// Actor trait
// ---------------------------------------------------------------------------

/// Common trait for self-managed actors. Each actor struct holds its own config;
/// `start()` clones what it needs and spawns a thread.
pub trait Actor: Send + Sync {
    /// Spawn the actor's run loop.
    fn start(&self, state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver);

    /// Request the actor to stop. Default: no-op (actors check the shutdown
    /// flag via `BusReceiver::is_shutdown()`).
    fn stop(&self) {}
}

// ---------------------------------------------------------------------------
// Actor resolution
// ---------------------------------------------------------------------------

/// A concrete actor ready to be started, resolved from config.
pub struct ResolvedActor {
    pub id: String,
    pub name: String,
    pub actor: Box<dyn Actor>,
}

/// Build the source actor for the configured `[source]` section.
pub fn resolve_source(section: &SourceSection) -> Box<dyn Actor> {
    match section {
        SourceSection::Firebase(fb) => Box::new(firebase::FirebaseActor::new(fb.clone())),
        SourceSection::Mock(m) => Box::new(mock::vehicle::MockVehicleActor {
            section: m.clone(),
        }),
    }
}

/// Build all configured webservers. Invalid bind addresses are logged and
/// skipped.
pub fn resolve_webservers(config: &EvdashConfig) -> Vec<ResolvedActor> {
    let mut actors = Vec::new();
    for (index, ws) in &config.webserver {
        let id = global_id("webserver", index);
        match ws.bind.parse::<SocketAddr>() {
            Ok(addr) => {
                actors.push(ResolvedActor {
                    id,
                    name: ws.name.clone(),
                    actor: Box::new(web::WebActor::new(addr)),
                });
            }
            Err(e) => {
                tracing::warn!("webserver '{id}': invalid bind address '{}': {e}", ws.bind);
            }
        }
    }
    actors
}

/// Start a resolved actor: create bus wrappers, call start(), register in state.
pub fn start_actor(
    id: String,
    actor: Box<dyn Actor>,
    state: &Arc<SystemState>,
    bus_tx: &broadcast::Sender<EvdashMessage>,
) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let sender = BusSender::new(id.clone(), bus_tx.clone(), Arc::clone(&shutdown));
    let receiver = sender.subscribe();
    actor.start(Arc::clone(state), sender, receiver);
    state.register_actor(id, actor, shutdown);
}

/// Build a map of actor IDs to display names from config (for status display).
pub fn actor_names(config: &EvdashConfig) -> HashMap<String, String> {
    let mut names = HashMap::from([
        (SYSTEM_ID.to_string(), "System".to_string()),
        (CORE_ID.to_string(), "Telemetry Core".to_string()),
        (SOURCE_ID.to_string(), config.source.label().to_string()),
    ]);
    for (index, ws) in &config.webserver {
        names.insert(global_id("webserver", index), ws.name.clone());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdash::WebserverSection;

    #[test]
    fn names_cover_session_actors_and_webservers() {
        let mut config = EvdashConfig::default();
        config.webserver.insert(
            "1".into(),
            WebserverSection {
                name: "LAN".into(),
                bind: "0.0.0.0:9000".into(),
            },
        );
        let names = actor_names(&config);
        assert_eq!(names[CORE_ID], "Telemetry Core");
        assert_eq!(names[SOURCE_ID], "Mock Vehicle");
        assert_eq!(names["webserver.1"], "LAN");
        assert!(names.contains_key("webserver.0"));
    }

    #[test]
    fn bad_bind_address_is_skipped() {
        let mut config = EvdashConfig::default();
        config.webserver.insert(
            "bad".into(),
            WebserverSection {
                name: "Broken".into(),
                bind: "not-an-address".into(),
            },
        );
        let ids: Vec<String> = resolve_webservers(&config)
            .into_iter()
            .map(|ra| ra.id)
            .collect();
        assert_eq!(ids, vec!["webserver.0".to_string()]);
    }
}
