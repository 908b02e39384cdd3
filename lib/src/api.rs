//! REST API request/response types shared with web consumers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ActorStatus, DriveMode};

/// GET /api/status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub actors: HashMap<String, ActorStatusResponse>,
}

/// Per-actor status within the status response. Also used as the cached
/// per-actor state in the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorStatusResponse {
    #[serde(default)]
    pub name: String,
    pub status: ActorStatus,
    #[serde(default)]
    pub telemetry: HashMap<String, String>,
}

impl ActorStatusResponse {
    /// Not yet heard from.
    pub fn new(name: String) -> Self {
        Self {
            name,
            status: ActorStatus::Disconnected,
            telemetry: HashMap::new(),
        }
    }
}

/// POST /api/mode request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModeRequest {
    pub mode: DriveMode,
}

/// POST /api/search request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}
