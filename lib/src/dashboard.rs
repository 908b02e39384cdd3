//! Dashboard read model: connection state, map focus, search state, and
//! drive mode, plus the `DashboardView` published to consumers after every
//! applied change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Coordinates, TelemetrySnapshot};

// ---------------------------------------------------------------------------
// DriveMode
// ---------------------------------------------------------------------------

/// Operator-selected drive mode. Local UI state; never derived from samples
/// and never written back to the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    Eco,
    #[default]
    Normal,
    Sport,
}

impl DriveMode {
    pub const ALL: &[DriveMode] = &[DriveMode::Eco, DriveMode::Normal, DriveMode::Sport];
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eco => write!(f, "eco"),
            Self::Normal => write!(f, "normal"),
            Self::Sport => write!(f, "sport"),
        }
    }
}

impl std::str::FromStr for DriveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eco" => Ok(Self::Eco),
            "normal" => Ok(Self::Normal),
            "sport" => Ok(Self::Sport),
            _ => Err(format!("invalid drive mode {s:?}: expected eco, normal or sport")),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Connectivity to the real-time source, derived from the subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    /// Source reachable but delivered an empty payload. Last values stay shown.
    Disconnected,
    /// Subscription-level error. Terminal for the session.
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MapFocus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSource {
    #[default]
    Vehicle,
    Search,
}

/// The coordinate pair currently driving the map view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MapFocus {
    pub lat: f64,
    pub lng: f64,
    pub source: FocusSource,
}

impl MapFocus {
    pub fn vehicle(pos: Coordinates) -> Self {
        Self {
            lat: pos.lat,
            lng: pos.lng,
            source: FocusSource::Vehicle,
        }
    }

    pub fn search(pos: Coordinates) -> Self {
        Self {
            lat: pos.lat,
            lng: pos.lng,
            source: FocusSource::Search,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lng: self.lng,
        }
    }

    /// True while a search result overrides live vehicle tracking.
    pub fn is_pinned(&self) -> bool {
        self.source == FocusSource::Search
    }
}

// ---------------------------------------------------------------------------
// SearchState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SearchStatus {
    #[default]
    Idle,
    Loading,
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    pub query: String,
    pub status: SearchStatus,
}

// ---------------------------------------------------------------------------
// Core lifecycle + published view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorePhase {
    #[default]
    Initializing,
    Streaming,
    Terminated,
}

impl fmt::Display for CorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Streaming => write!(f, "streaming"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Everything the rendering layer reads, as one consistent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub phase: CorePhase,
    pub connection: ConnectionStatus,
    /// Processing time of the last sample or empty payload.
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
    pub telemetry: TelemetrySnapshot,
    pub focus: MapFocus,
    pub search: SearchState,
    pub mode: DriveMode,
}
