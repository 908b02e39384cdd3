//! Unified `EvdashMessage` bus types.
//!
//! All events flow through a single `broadcast<EvdashMessage>` channel.
//! Each message has a source (actor ID of the originator), timestamp, and a
//! typed event. Producers create messages; consumers subscribe and filter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActorState, Coordinates, DashboardView, DriveMode, GeocodeError};

// ---------------------------------------------------------------------------
// Top-level message
// ---------------------------------------------------------------------------

/// A single event on the unified bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvdashMessage {
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub event: EvdashEvent,
}

impl EvdashMessage {
    /// Create a new message with the current UTC timestamp. Use `.source()`
    /// to attach the originator when sending on a raw broadcast sender.
    pub fn new(event: impl Into<EvdashEvent>) -> Self {
        Self {
            source: String::new(),
            timestamp: Utc::now(),
            event: event.into(),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

// ---------------------------------------------------------------------------
// From impls: inner event types -> EvdashEvent
// ---------------------------------------------------------------------------

impl From<SourceEvent> for EvdashEvent {
    fn from(event: SourceEvent) -> Self {
        EvdashEvent::Source(event)
    }
}

impl From<DashboardCommand> for EvdashEvent {
    fn from(cmd: DashboardCommand) -> Self {
        EvdashEvent::Command(cmd)
    }
}

impl From<SessionCommand> for EvdashEvent {
    fn from(cmd: SessionCommand) -> Self {
        EvdashEvent::Session(cmd)
    }
}

impl From<GeocodeOutcome> for EvdashEvent {
    fn from(outcome: GeocodeOutcome) -> Self {
        EvdashEvent::GeocodeOutcome(outcome)
    }
}

impl From<DashboardView> for EvdashEvent {
    fn from(view: DashboardView) -> Self {
        EvdashEvent::Dashboard(Box::new(view))
    }
}

impl From<ActorState> for EvdashEvent {
    fn from(state: ActorState) -> Self {
        EvdashEvent::ActorStatus(state)
    }
}

impl From<AlertMessage> for EvdashEvent {
    fn from(alert: AlertMessage) -> Self {
        EvdashEvent::Alert(alert)
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// The typed event payload carried by an `EvdashMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvdashEvent {
    /// Subscription callback from the real-time data source.
    Source(SourceEvent),
    /// Operator command (from the REST API or a WS client).
    Command(DashboardCommand),
    /// Session lifecycle command, processed by the system actor.
    Session(SessionCommand),
    /// Completed geocode lookup, posted back to the core.
    GeocodeOutcome(GeocodeOutcome),
    /// Dashboard view, emitted by the core after every applied change.
    Dashboard(Box<DashboardView>),
    /// Generic actor status update.
    ActorStatus(ActorState),
    /// Alert for user-visible warn/error conditions.
    Alert(AlertMessage),
}

// ---------------------------------------------------------------------------
// SourceEvent: real-time data source callbacks
// ---------------------------------------------------------------------------

/// One callback from the real-time source subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    /// Subscription established.
    Subscribed,
    /// Full record, exactly as delivered (untyped).
    Sample { record: Value },
    /// Source reachable but holds no data.
    Empty,
    /// Subscription-level error. The source actor stops after sending this.
    Failed { reason: String },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Operator command entry points of the dashboard core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardCommand {
    SubmitSearch { query: String },
    ResetLocation,
    SelectMode { mode: DriveMode },
    /// Emergency request. Stubbed: logged and surfaced as an alert only.
    Sos,
}

/// Session lifecycle. `Restart` is the manual retry after a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionCommand {
    Restart,
}

// ---------------------------------------------------------------------------
// GeocodeOutcome: lookup result routed back through the bus
// ---------------------------------------------------------------------------

/// Result of one geocode lookup. `session` and `seq` identify the request so
/// the core can drop results that were superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeOutcome {
    pub session: u64,
    pub seq: u64,
    pub query: String,
    pub result: Result<Coordinates, GeocodeError>,
}

// ---------------------------------------------------------------------------
// AlertMessage: user-visible warn/error notifications
// ---------------------------------------------------------------------------

/// Severity level for alert messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warn,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Warn => write!(f, "warn"),
            AlertLevel::Error => write!(f, "error"),
        }
    }
}

/// A user-visible alert. Info/debug/trace stays in the tracing backend;
/// warn/error conditions surface here for the rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMessage {
    pub level: AlertLevel,
    pub message: String,
}

impl AlertMessage {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Error,
            message: message.into(),
        }
    }
}
