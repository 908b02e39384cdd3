//! Telemetry reconciliation core.
//!
//! `TelemetryCore` is a plain, synchronous state container. The reconciler
//! actor feeds it one bus event at a time; all mutation happens there.
//!
//! Lifecycle: `Initializing` -> `Streaming` (subscription established) ->
//! `Terminated` (shutdown or failed connection). A terminated core ignores
//! everything; a new session builds a new core.

mod focus;
mod tracker;

pub use focus::LocationReconciler;
pub use tracker::ConnectionTracker;

use chrono::{DateTime, Utc};
use serde_json::Value;

use evdash::{
    ConnectionStatus, Coordinates, CorePhase, DashboardView, DriveMode, GeocodeError,
    GeocodeOutcome, MapFocus, SearchState, SearchStatus, SourceEvent, TelemetrySnapshot,
};

/// A search the caller must run: look up `query` and report back with the
/// same `session`/`seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub session: u64,
    pub seq: u64,
    pub query: String,
}

impl SearchTicket {
    /// Wrap a lookup result for the trip back through the bus.
    pub fn outcome(self, result: Result<Coordinates, GeocodeError>) -> GeocodeOutcome {
        GeocodeOutcome {
            session: self.session,
            seq: self.seq,
            query: self.query,
            result,
        }
    }
}

pub struct TelemetryCore {
    session: u64,
    phase: CorePhase,
    telemetry: TelemetrySnapshot,
    tracker: ConnectionTracker,
    focus: LocationReconciler,
    search: SearchState,
    /// Sequence number of the latest issued search (0 = none yet).
    search_seq: u64,
    mode: DriveMode,
}

impl TelemetryCore {
    pub fn new(session: u64, mode: DriveMode, now: DateTime<Utc>) -> Self {
        Self {
            session,
            phase: CorePhase::Initializing,
            telemetry: TelemetrySnapshot::empty(now),
            tracker: ConnectionTracker::new(),
            focus: LocationReconciler::new(),
            search: SearchState::default(),
            search_seq: 0,
            mode,
        }
    }

    // ----- Read side -----

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn phase(&self) -> CorePhase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == CorePhase::Terminated
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    pub fn connection(&self) -> &ConnectionStatus {
        self.tracker.status()
    }

    pub fn focus(&self) -> MapFocus {
        self.focus.focus()
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn vehicle_position(&self) -> Coordinates {
        Coordinates::new(self.telemetry.latitude, self.telemetry.longitude)
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            phase: self.phase,
            connection: self.tracker.status().clone(),
            last_event_at: self.tracker.last_event_at(),
            telemetry: self.telemetry.clone(),
            focus: self.focus.focus(),
            search: self.search.clone(),
            mode: self.mode,
        }
    }

    // ----- Source events -----

    /// Apply one subscription callback. Returns whether anything observable
    /// changed.
    pub fn ingest(&mut self, event: SourceEvent, now: DateTime<Utc>) -> bool {
        if self.is_terminated() {
            return false;
        }
        match event {
            SourceEvent::Subscribed => {
                self.tracker.subscribed();
                self.enter_streaming();
                true
            }
            SourceEvent::Sample { record } if is_empty_record(&record) => self.empty_payload(now),
            SourceEvent::Sample { record } => {
                // A sample proves the subscription is up even if the
                // Subscribed callback was never seen.
                self.enter_streaming();
                let snapshot = TelemetrySnapshot::decode(Some(&record), now);
                if !(0.0..=100.0).contains(&snapshot.soc) {
                    tracing::debug!("core: soc {} outside 0-100, passed through", snapshot.soc);
                }
                let pos = Coordinates::new(snapshot.latitude, snapshot.longitude);
                self.telemetry = snapshot;
                self.tracker.sample_received(now);
                self.focus.on_vehicle_update(pos);
                true
            }
            SourceEvent::Empty => self.empty_payload(now),
            SourceEvent::Failed { reason } => {
                tracing::warn!("core: connection failed: {reason}");
                self.tracker.failed(reason);
                self.phase = CorePhase::Terminated;
                true
            }
        }
    }

    /// Source reachable but holding no data: only the status moves, the
    /// last snapshot stays on screen.
    fn empty_payload(&mut self, now: DateTime<Utc>) -> bool {
        self.enter_streaming();
        tracing::debug!("core: empty payload, keeping last snapshot");
        self.tracker.empty_received(now)
    }

    fn enter_streaming(&mut self) {
        if self.phase == CorePhase::Initializing {
            tracing::info!("core: streaming");
            self.phase = CorePhase::Streaming;
        }
    }

    // ----- Operator commands -----

    /// Record a new search. A blank query fails immediately with
    /// `EmptyQuery` and returns `None`; otherwise the search is marked
    /// loading and a ticket is returned for the caller to run. Either way
    /// this becomes the latest request, superseding any lookup in flight.
    pub fn submit_search(&mut self, query: &str) -> Option<SearchTicket> {
        if self.is_terminated() {
            return None;
        }
        self.search_seq += 1;
        self.search.query = query.to_string();

        let trimmed = query.trim();
        if trimmed.is_empty() {
            self.search.status = SearchStatus::Error {
                message: GeocodeError::EmptyQuery.to_string(),
            };
            return None;
        }
        self.search.status = SearchStatus::Loading;
        Some(SearchTicket {
            session: self.session,
            seq: self.search_seq,
            query: trimmed.to_string(),
        })
    }

    /// Apply a completed lookup. Outcomes from another session or older than
    /// the latest issued request are discarded (returns false).
    pub fn apply_search_outcome(&mut self, outcome: GeocodeOutcome) -> bool {
        if self.is_terminated() {
            return false;
        }
        if outcome.session != self.session || outcome.seq != self.search_seq {
            tracing::debug!(
                "core: discarding stale search result #{} for {:?} (latest #{})",
                outcome.seq,
                outcome.query,
                self.search_seq
            );
            return false;
        }
        match outcome.result {
            Ok(pos) => {
                tracing::info!(
                    "core: search {:?} -> {:.5},{:.5}",
                    outcome.query,
                    pos.lat,
                    pos.lng
                );
                self.focus.on_search_result(pos);
                self.search.status = SearchStatus::Idle;
            }
            Err(e) => {
                tracing::info!("core: search {:?} failed: {e}", outcome.query);
                self.search.status = SearchStatus::Error {
                    message: e.to_string(),
                };
            }
        }
        true
    }

    /// Give up on a loading search whose outcome may never arrive. The
    /// request is superseded so a late outcome is discarded, and the operator
    /// sees an error they can retry from.
    pub fn abandon_search(&mut self, reason: &str) -> bool {
        if self.is_terminated() || self.search.status != SearchStatus::Loading {
            return false;
        }
        self.search_seq += 1;
        self.search.status = SearchStatus::Error {
            message: reason.to_string(),
        };
        true
    }

    /// Release any search pin, follow the vehicle, and clear the search.
    /// Lookups still in flight are superseded.
    pub fn reset_location(&mut self) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.search_seq += 1;
        self.focus.reset_to_vehicle(self.vehicle_position());
        self.search = SearchState::default();
        true
    }

    pub fn select_mode(&mut self, mode: DriveMode) -> bool {
        if self.is_terminated() || self.mode == mode {
            return false;
        }
        tracing::info!("core: drive mode {} -> {}", self.mode, mode);
        self.mode = mode;
        true
    }

    /// Explicit shutdown (unsubscribe).
    pub fn shutdown(&mut self) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.phase = CorePhase::Terminated;
        true
    }
}

/// `null` and `{}` carry no readings, whichever callback delivered them.
fn is_empty_record(record: &Value) -> bool {
    match record {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdash::FocusSource;
    use serde_json::json;

    fn core() -> TelemetryCore {
        TelemetryCore::new(1, DriveMode::Normal, Utc::now())
    }

    fn sample(lat: f64, lng: f64) -> SourceEvent {
        SourceEvent::Sample {
            record: json!({
                "latitude": lat.to_string(),
                "longitude": lng.to_string(),
                "soc": "80",
            }),
        }
    }

    #[test]
    fn starts_initializing_and_connecting() {
        let c = core();
        assert_eq!(c.phase(), CorePhase::Initializing);
        assert_eq!(*c.connection(), ConnectionStatus::Connecting);
        assert_eq!(c.focus(), MapFocus::default());
        assert_eq!(c.search(), &SearchState::default());
        assert_eq!(c.mode(), DriveMode::Normal);
    }

    #[test]
    fn subscribed_then_sample_streams() {
        let mut c = core();
        assert!(c.ingest(SourceEvent::Subscribed, Utc::now()));
        assert_eq!(c.phase(), CorePhase::Streaming);
        assert_eq!(*c.connection(), ConnectionStatus::Connecting);

        let raw = json!({
            "speed": "45.2",
            "soc": "63",
            "latitude": "12.9",
            "longitude": "77.6",
        });
        c.ingest(SourceEvent::Sample { record: raw }, Utc::now());
        assert_eq!(*c.connection(), ConnectionStatus::Connected);
        let t = c.telemetry();
        assert_eq!(t.speed, 45.2);
        assert_eq!(t.soc, 63.0);
        assert_eq!(t.range, 63.0);
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(12.9, 77.6)));
    }

    #[test]
    fn first_sample_implies_subscription() {
        let mut c = core();
        c.ingest(sample(1.0, 2.0), Utc::now());
        assert_eq!(c.phase(), CorePhase::Streaming);
        assert_eq!(*c.connection(), ConnectionStatus::Connected);
    }

    #[test]
    fn empty_payload_disconnects_but_keeps_values() {
        let mut c = core();
        c.ingest(SourceEvent::Subscribed, Utc::now());
        c.ingest(
            SourceEvent::Sample {
                record: json!({ "speed": "30", "soc": "50", "latitude": "12.9" }),
            },
            Utc::now(),
        );
        let before = c.telemetry().clone();

        assert!(c.ingest(SourceEvent::Empty, Utc::now()));
        assert_eq!(*c.connection(), ConnectionStatus::Disconnected);
        assert_eq!(c.telemetry(), &before);
        assert!(c.view().last_event_at.is_some());
    }

    #[test]
    fn empty_record_sample_counts_as_empty_payload() {
        let mut c = core();
        c.ingest(
            SourceEvent::Sample {
                record: json!({ "speed": "30", "soc": "50" }),
            },
            Utc::now(),
        );
        let before = c.telemetry().clone();

        assert!(c.ingest(SourceEvent::Sample { record: json!({}) }, Utc::now()));
        assert_eq!(*c.connection(), ConnectionStatus::Disconnected);
        assert_eq!(c.telemetry(), &before);
        assert_eq!(c.telemetry().speed, 30.0);

        c.ingest(sample(1.0, 2.0), Utc::now());
        assert!(c.ingest(SourceEvent::Sample { record: Value::Null }, Utc::now()));
        assert_eq!(*c.connection(), ConnectionStatus::Disconnected);
        assert_eq!(c.vehicle_position(), Coordinates::new(1.0, 2.0));
    }

    #[test]
    fn failure_terminates_and_ignores_later_events() {
        let mut c = core();
        c.ingest(sample(1.0, 2.0), Utc::now());
        assert!(c.ingest(
            SourceEvent::Failed {
                reason: "permission denied".into()
            },
            Utc::now()
        ));
        assert_eq!(c.phase(), CorePhase::Terminated);
        assert!(c.connection().is_failed());

        assert!(!c.ingest(sample(5.0, 6.0), Utc::now()));
        assert_eq!(c.vehicle_position(), Coordinates::new(1.0, 2.0));
        assert!(c.submit_search("Paris").is_none());
        assert!(!c.reset_location());
        assert!(!c.select_mode(DriveMode::Sport));
        assert!(!c.shutdown());
    }

    #[test]
    fn shutdown_terminates() {
        let mut c = core();
        c.ingest(SourceEvent::Subscribed, Utc::now());
        assert!(c.shutdown());
        assert_eq!(c.phase(), CorePhase::Terminated);
        assert!(!c.ingest(sample(1.0, 2.0), Utc::now()));
    }

    #[test]
    fn search_pins_focus_until_reset() {
        let mut c = core();
        c.ingest(sample(12.9, 77.6), Utc::now());

        let ticket = c.submit_search("  Paris ").unwrap();
        assert_eq!(ticket.query, "Paris");
        assert_eq!(c.search().status, SearchStatus::Loading);
        assert_eq!(c.search().query, "  Paris ");

        assert!(c.apply_search_outcome(ticket.outcome(Ok(Coordinates::new(48.85, 2.35)))));
        assert_eq!(c.search().status, SearchStatus::Idle);
        assert_eq!(c.focus(), MapFocus::search(Coordinates::new(48.85, 2.35)));

        for i in 0..3 {
            c.ingest(sample(13.0 + i as f64 * 0.01, 77.7), Utc::now());
        }
        assert_eq!(c.focus(), MapFocus::search(Coordinates::new(48.85, 2.35)));
        // Telemetry itself keeps updating under the pin
        assert_eq!(c.vehicle_position(), Coordinates::new(13.02, 77.7));

        assert!(c.reset_location());
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(13.02, 77.7)));
        assert_eq!(c.search(), &SearchState::default());

        c.ingest(sample(13.5, 77.8), Utc::now());
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(13.5, 77.8)));
    }

    #[test]
    fn abandoned_search_can_be_retried() {
        let mut c = core();
        assert!(!c.abandon_search("lost"));

        let lost = c.submit_search("Paris").unwrap();
        assert!(c.abandon_search("lost"));
        assert_eq!(
            c.search().status,
            SearchStatus::Error {
                message: "lost".into()
            }
        );
        assert!(!c.abandon_search("lost"));

        // The outcome turning up late no longer applies
        assert!(!c.apply_search_outcome(lost.outcome(Ok(Coordinates::new(48.85, 2.35)))));

        let retry = c.submit_search("Paris").unwrap();
        assert!(c.apply_search_outcome(retry.outcome(Ok(Coordinates::new(48.85, 2.35)))));
        assert_eq!(c.focus(), MapFocus::search(Coordinates::new(48.85, 2.35)));
    }

    #[test]
    fn reset_is_unconditional() {
        let mut c = core();
        c.ingest(sample(3.0, 4.0), Utc::now());
        c.submit_search("   ");
        assert!(c.reset_location());
        assert_eq!(c.focus().source, FocusSource::Vehicle);
        assert_eq!(c.search(), &SearchState::default());

        // Even with nothing to reset
        assert!(c.reset_location());
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(3.0, 4.0)));
    }

    #[test]
    fn out_of_order_results_keep_latest_request() {
        let mut c = core();
        let paris = c.submit_search("Paris").unwrap();
        let tokyo = c.submit_search("Tokyo").unwrap();
        assert!(tokyo.seq > paris.seq);

        assert!(c.apply_search_outcome(tokyo.outcome(Ok(Coordinates::new(35.68, 139.69)))));
        assert!(!c.apply_search_outcome(paris.outcome(Ok(Coordinates::new(48.85, 2.35)))));

        assert_eq!(c.focus(), MapFocus::search(Coordinates::new(35.68, 139.69)));
        assert_eq!(c.search().query, "Tokyo");
        assert_eq!(c.search().status, SearchStatus::Idle);
    }

    #[test]
    fn stale_failure_does_not_clobber_newer_state() {
        let mut c = core();
        let first = c.submit_search("Paris").unwrap();
        let second = c.submit_search("Tokyo").unwrap();
        assert!(!c.apply_search_outcome(first.outcome(Err(GeocodeError::NoResults))));
        assert_eq!(c.search().status, SearchStatus::Loading);
        assert!(c.apply_search_outcome(second.outcome(Err(GeocodeError::NoResults))));
        assert_eq!(
            c.search().status,
            SearchStatus::Error {
                message: "no results found".into()
            }
        );
    }

    #[test]
    fn blank_query_fails_without_ticket_and_supersedes_inflight() {
        let mut c = core();
        let pending = c.submit_search("Paris").unwrap();
        assert!(c.submit_search(" \t ").is_none());
        assert_eq!(
            c.search().status,
            SearchStatus::Error {
                message: GeocodeError::EmptyQuery.to_string()
            }
        );
        assert!(!c.apply_search_outcome(pending.outcome(Ok(Coordinates::new(48.85, 2.35)))));
        assert_eq!(c.focus().source, FocusSource::Vehicle);
    }

    #[test]
    fn reset_supersedes_inflight_search() {
        let mut c = core();
        c.ingest(sample(12.9, 77.6), Utc::now());
        let pending = c.submit_search("Paris").unwrap();
        c.reset_location();
        assert!(!c.apply_search_outcome(pending.outcome(Ok(Coordinates::new(48.85, 2.35)))));
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(12.9, 77.6)));
    }

    #[test]
    fn outcome_from_other_session_is_ignored() {
        let mut c = core();
        let ticket = c.submit_search("Paris").unwrap();
        let mut outcome = ticket.outcome(Ok(Coordinates::new(48.85, 2.35)));
        outcome.session = 99;
        assert!(!c.apply_search_outcome(outcome));
    }

    #[test]
    fn geocode_failure_leaves_focus_and_telemetry_alone() {
        let mut c = core();
        c.ingest(sample(12.9, 77.6), Utc::now());
        let before = c.telemetry().clone();
        let ticket = c.submit_search("Atlantis").unwrap();
        c.apply_search_outcome(ticket.outcome(Err(GeocodeError::Transport("HTTP 503".into()))));
        assert_eq!(c.focus(), MapFocus::vehicle(Coordinates::new(12.9, 77.6)));
        assert_eq!(c.telemetry(), &before);
        assert_eq!(c.phase(), CorePhase::Streaming);
    }

    #[test]
    fn drive_mode_survives_samples() {
        let mut c = core();
        assert!(c.select_mode(DriveMode::Sport));
        assert!(!c.select_mode(DriveMode::Sport));
        c.ingest(
            SourceEvent::Sample {
                record: json!({ "mode": "eco", "speed": "10" }),
            },
            Utc::now(),
        );
        assert_eq!(c.mode(), DriveMode::Sport);
        assert_eq!(c.view().mode, DriveMode::Sport);
    }
}
