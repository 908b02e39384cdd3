//! Mock vehicle source: produces a synthetic telemetry record on a fixed
//! interval.
//!
//! The vehicle drives a loop around the configured centre point while its
//! state of charge drains; below 20% it "plugs in" and charges back to 90%.
//! Records are string-valued, the way the real feed delivers them. Useful
//! for exercising the full pipeline without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::info;

use crate::actors::Actor;
use crate::bus::{BusReceiver, BusSender, PollError};
use crate::state::SystemState;
use evdash::{ActorState, ActorStatus, MockSourceSection, SourceEvent};

/// Loop radius around the centre point, in degrees.
const LOOP_RADIUS: f64 = 0.01;
const CHARGE_BELOW: f64 = 20.0;
const CHARGE_UNTIL: f64 = 90.0;

/// Mock source actor.
pub struct MockVehicleActor {
    pub section: MockSourceSection,
}

impl Actor for MockVehicleActor {
    fn start(&self, _state: Arc<SystemState>, sender: BusSender, receiver: BusReceiver) {
        let section = self.section.clone();
        let thread_name = format!("source:{}", sender.actor_id());

        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(section, sender, receiver));
        if let Err(e) = spawned {
            tracing::error!("mock: failed to spawn thread: {e}");
        }
    }
}

/// Synthetic vehicle state.
pub struct MockVehicle {
    center_lat: f64,
    center_lng: f64,
    tick: u64,
    soc: f64,
    charging: bool,
}

impl MockVehicle {
    pub fn new(section: &MockSourceSection) -> Self {
        Self {
            center_lat: section.center_lat,
            center_lng: section.center_lng,
            tick: 0,
            soc: CHARGE_UNTIL,
            charging: false,
        }
    }

    /// Advance one step and return the record for it.
    pub fn next_record(&mut self) -> Value {
        self.tick += 1;
        let t = self.tick as f64;

        if self.charging {
            self.soc = (self.soc + 0.5).min(CHARGE_UNTIL);
            if self.soc >= CHARGE_UNTIL {
                self.charging = false;
            }
        } else {
            self.soc = (self.soc - 0.1).max(0.0);
            if self.soc < CHARGE_BELOW {
                self.charging = true;
            }
        }

        let (speed, rpm, torque, current) = if self.charging {
            (0.0, 0.0, 0.0, -16.0)
        } else {
            let v = (t * 0.3).sin();
            (42.0 + 12.0 * v, 3200.0 + 900.0 * v, 85.0 + 25.0 * v, 48.0 + 15.0 * v)
        };
        let angle = t * 0.05;
        let latitude = self.center_lat + LOOP_RADIUS * angle.sin();
        let longitude = self.center_lng + LOOP_RADIUS * angle.cos();

        json!({
            "speed": format!("{speed:.1}"),
            "rpm": format!("{rpm:.0}"),
            "torque": format!("{torque:.1}"),
            "current": format!("{current:.1}"),
            "voltage": format!("{:.1}", 330.0 + 0.6 * self.soc),
            "soc": format!("{:.1}", self.soc),
            "soh": "97.4",
            "temp": format!("{:.1}", 31.0 + 2.0 * (t * 0.01).sin()),
            "motor_temp": format!("{:.1}", 55.0 + 0.2 * speed),
            "tyre_pressure": "32",
            "charging_status": if self.charging { "Charging" } else { "Not Charging" },
            "latitude": format!("{latitude:.6}"),
            "longitude": format!("{longitude:.6}"),
        })
    }
}

fn telemetry(section: &MockSourceSection, samples: u64) -> HashMap<String, String> {
    HashMap::from([
        ("device_info".into(), "Mock Vehicle (simulated)".into()),
        ("interval_ms".into(), section.interval_ms.to_string()),
        ("samples".into(), samples.to_string()),
    ])
}

fn run(section: MockSourceSection, sender: BusSender, mut receiver: BusReceiver) {
    let interval = Duration::from_millis(section.interval_ms.max(1));
    let mut vehicle = MockVehicle::new(&section);
    let mut samples: u64 = 0;
    // Backdate so the first sample fires immediately.
    let mut last_sample = Instant::now().checked_sub(interval).unwrap_or_else(Instant::now);

    sender.emit(ActorState::new(
        ActorStatus::Connected,
        telemetry(&section, samples),
    ));
    sender.emit(SourceEvent::Subscribed);
    info!("mock: subscribed -- sample every {interval:?}");

    loop {
        // Drain the bus; only the shutdown signal matters here
        loop {
            match receiver.poll() {
                Err(PollError::Shutdown) => {
                    sender.emit(ActorState::new(ActorStatus::Disconnected, HashMap::new()));
                    return;
                }
                Ok(None) => break,
                Ok(Some(_)) => {}
            }
        }

        if last_sample.elapsed() >= interval {
            last_sample = Instant::now();
            samples += 1;

            if section.blank_every > 0 && samples.is_multiple_of(section.blank_every as u64) {
                info!("mock: sample #{samples} blank");
                sender.emit(SourceEvent::Empty);
            } else {
                sender.emit(SourceEvent::Sample {
                    record: vehicle.next_record(),
                });
            }
            if samples.is_multiple_of(10) {
                sender.emit(ActorState::new(
                    ActorStatus::Connected,
                    telemetry(&section, samples),
                ));
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evdash::{ChargingStatus, TelemetrySnapshot};

    #[test]
    fn records_decode_cleanly() {
        let mut vehicle = MockVehicle::new(&MockSourceSection::default());
        for _ in 0..50 {
            let record = vehicle.next_record();
            let snap = TelemetrySnapshot::decode(Some(&record), Utc::now());
            assert!((snap.latitude - 12.9716).abs() <= LOOP_RADIUS + 1e-6);
            assert!((snap.longitude - 77.5946).abs() <= LOOP_RADIUS + 1e-6);
            assert!(snap.speed > 0.0);
            assert_eq!(snap.soh, 97.4);
            assert_eq!(snap.battery_temp, snap.ambient_temp);
        }
    }

    #[test]
    fn drains_then_charges() {
        let mut vehicle = MockVehicle::new(&MockSourceSection::default());
        let mut saw_charging = false;
        let mut last_soc = f64::MAX;
        for _ in 0..2000 {
            let snap = TelemetrySnapshot::decode(Some(&vehicle.next_record()), Utc::now());
            if snap.charging_status == ChargingStatus::Charging {
                saw_charging = true;
                assert_eq!(snap.speed, 0.0);
                break;
            }
            assert!(snap.soc <= last_soc);
            last_soc = snap.soc;
        }
        assert!(saw_charging);
        assert!(last_soc < CHARGE_BELOW + 1.0);
    }
}
