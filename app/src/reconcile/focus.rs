//! Map focus arbitration between live vehicle position and search results.

use evdash::{Coordinates, MapFocus};

/// Sole owner of the map focus.
///
/// A search result pins the focus: vehicle updates are dropped until
/// `reset_to_vehicle()` releases the pin.
#[derive(Debug, Default)]
pub struct LocationReconciler {
    focus: MapFocus,
}

impl LocationReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self) -> MapFocus {
        self.focus
    }

    pub fn is_pinned(&self) -> bool {
        self.focus.is_pinned()
    }

    /// Follow the vehicle unless a search is pinned. Returns whether the
    /// focus changed.
    pub fn on_vehicle_update(&mut self, pos: Coordinates) -> bool {
        if self.is_pinned() {
            return false;
        }
        let next = MapFocus::vehicle(pos);
        let changed = next != self.focus;
        self.focus = next;
        changed
    }

    /// Always takes the focus and pins it.
    pub fn on_search_result(&mut self, pos: Coordinates) {
        self.focus = MapFocus::search(pos);
    }

    /// Unconditionally release any pin and follow the vehicle again.
    pub fn reset_to_vehicle(&mut self, current: Coordinates) {
        self.focus = MapFocus::vehicle(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdash::FocusSource;

    #[test]
    fn follows_vehicle_until_pinned() {
        let mut r = LocationReconciler::new();
        assert_eq!(r.focus().source, FocusSource::Vehicle);

        assert!(r.on_vehicle_update(Coordinates::new(12.9, 77.6)));
        assert_eq!(r.focus().coordinates(), Coordinates::new(12.9, 77.6));

        r.on_search_result(Coordinates::new(48.85, 2.35));
        assert!(r.is_pinned());

        for i in 0..5 {
            assert!(!r.on_vehicle_update(Coordinates::new(13.0 + i as f64, 77.0)));
        }
        assert_eq!(r.focus(), MapFocus::search(Coordinates::new(48.85, 2.35)));
    }

    #[test]
    fn newer_search_replaces_pinned_search() {
        let mut r = LocationReconciler::new();
        r.on_search_result(Coordinates::new(48.85, 2.35));
        r.on_search_result(Coordinates::new(35.68, 139.69));
        assert_eq!(r.focus(), MapFocus::search(Coordinates::new(35.68, 139.69)));
    }

    #[test]
    fn reset_always_restores_vehicle() {
        let mut r = LocationReconciler::new();
        r.reset_to_vehicle(Coordinates::new(1.0, 2.0));
        assert_eq!(r.focus(), MapFocus::vehicle(Coordinates::new(1.0, 2.0)));

        r.on_search_result(Coordinates::new(48.85, 2.35));
        r.reset_to_vehicle(Coordinates::new(12.9, 77.6));
        assert_eq!(r.focus(), MapFocus::vehicle(Coordinates::new(12.9, 77.6)));
        assert!(r.on_vehicle_update(Coordinates::new(12.91, 77.61)));
    }

    #[test]
    fn unchanged_vehicle_position_reports_no_change() {
        let mut r = LocationReconciler::new();
        assert!(r.on_vehicle_update(Coordinates::new(12.9, 77.6)));
        assert!(!r.on_vehicle_update(Coordinates::new(12.9, 77.6)));
    }
}
