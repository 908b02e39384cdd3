//! Connection state machine, driven only by subscription callbacks.

use chrono::{DateTime, Utc};

use evdash::ConnectionStatus;

/// Tracks connectivity from the presence or absence of incoming samples.
///
/// `Failed` is terminal: once set, every later callback is ignored and the
/// session must be re-established from scratch.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
    last_event_at: Option<DateTime<Utc>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Subscription (re-)established by the source.
    pub fn subscribed(&mut self) -> bool {
        self.transition(ConnectionStatus::Connecting, None)
    }

    /// Non-empty payload delivered.
    pub fn sample_received(&mut self, at: DateTime<Utc>) -> bool {
        self.transition(ConnectionStatus::Connected, Some(at))
    }

    /// Source reachable but explicitly empty.
    pub fn empty_received(&mut self, at: DateTime<Utc>) -> bool {
        self.transition(ConnectionStatus::Disconnected, Some(at))
    }

    /// Subscription-level error.
    pub fn failed(&mut self, reason: impl Into<String>) -> bool {
        self.transition(
            ConnectionStatus::Failed {
                reason: reason.into(),
            },
            None,
        )
    }

    fn transition(&mut self, next: ConnectionStatus, at: Option<DateTime<Utc>>) -> bool {
        if self.is_failed() {
            return false;
        }
        if self.status != next {
            tracing::debug!("connection: {} -> {}", self.status, next);
        }
        self.status = next;
        if at.is_some() {
            self.last_event_at = at;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lifecycle() {
        let t0 = Utc::now();
        let mut tracker = ConnectionTracker::new();
        assert_eq!(*tracker.status(), ConnectionStatus::Connecting);
        assert!(tracker.last_event_at().is_none());

        tracker.subscribed();
        assert_eq!(*tracker.status(), ConnectionStatus::Connecting);

        tracker.sample_received(t0);
        assert_eq!(*tracker.status(), ConnectionStatus::Connected);
        assert_eq!(tracker.last_event_at(), Some(t0));

        let t1 = t0 + Duration::seconds(1);
        tracker.empty_received(t1);
        assert_eq!(*tracker.status(), ConnectionStatus::Disconnected);
        assert_eq!(tracker.last_event_at(), Some(t1));

        let t2 = t1 + Duration::seconds(1);
        tracker.sample_received(t2);
        assert_eq!(*tracker.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn failure_is_terminal() {
        let now = Utc::now();
        let mut tracker = ConnectionTracker::new();
        tracker.sample_received(now);
        assert!(tracker.failed("permission denied"));
        assert!(!tracker.sample_received(now));
        assert!(!tracker.empty_received(now));
        assert!(!tracker.subscribed());
        assert!(!tracker.failed("second failure"));
        assert_eq!(
            *tracker.status(),
            ConnectionStatus::Failed {
                reason: "permission denied".into()
            }
        );
    }
}
