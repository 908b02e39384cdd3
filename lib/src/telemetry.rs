//! Telemetry snapshot schema and raw sample decoding.
//!
//! The real-time source delivers a loosely-typed record: numbers arrive as
//! JSON numbers or as strings, keys may be missing, and the whole record may
//! be absent. `TelemetrySnapshot::decode()` is total over all of that and
//! always returns a fully populated snapshot with finite numeric fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Range of a fully charged pack, in km.
pub const MAX_RANGE_KM: f64 = 100.0;

/// Fallback state of health when the source omits it (healthy-pack baseline).
pub const DEFAULT_SOH: f64 = 98.68;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingStatus {
    Charging,
    #[default]
    NotCharging,
}

impl fmt::Display for ChargingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charging => write!(f, "Charging"),
            Self::NotCharging => write!(f, "Not Charging"),
        }
    }
}

/// One decoded, defaulted telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub speed: f64,        // km/h
    pub battery_temp: f64, // degC
    pub voltage: f64,      // V
    pub soc: f64,          // % state of charge
    pub soh: f64,          // % state of health
    pub range: f64,        // km, derived from soc
    pub torque: f64,       // Nm
    pub tyre_pressure: f64, // PSI
    pub rpm: f64,
    pub current: f64,      // A
    pub motor_temp: f64,   // degC
    pub ambient_temp: f64, // degC
    pub charging_status: ChargingStatus,
    pub latitude: f64,
    pub longitude: f64,
    /// Processing time. The source does not stamp its records.
    pub captured_at: DateTime<Utc>,
}

/// Where to look for a numeric field in the raw record, and what to use when
/// none of the keys yields a usable number.
struct NumericField {
    keys: &'static [&'static str],
    default: f64,
}

const SPEED: NumericField = NumericField { keys: &["speed"], default: 0.0 };
const BATTERY_TEMP: NumericField = NumericField {
    keys: &["battery_temp", "batteryTemp", "temp"],
    default: 0.0,
};
const VOLTAGE: NumericField = NumericField { keys: &["voltage"], default: 0.0 };
const SOC: NumericField = NumericField { keys: &["soc"], default: 0.0 };
const SOH: NumericField = NumericField { keys: &["soh"], default: DEFAULT_SOH };
const TORQUE: NumericField = NumericField { keys: &["torque"], default: 0.0 };
const TYRE_PRESSURE: NumericField = NumericField {
    keys: &["tyre_pressure", "tyrePressure"],
    default: 0.0,
};
const RPM: NumericField = NumericField { keys: &["rpm"], default: 0.0 };
const CURRENT: NumericField = NumericField { keys: &["current"], default: 0.0 };
const MOTOR_TEMP: NumericField = NumericField {
    keys: &["motor_temp", "motorTemp"],
    default: 0.0,
};
const AMBIENT_TEMP: NumericField = NumericField {
    keys: &["ambient_temp", "ambientTemp", "temp"],
    default: 0.0,
};
const LATITUDE: NumericField = NumericField { keys: &["latitude"], default: 0.0 };
const LONGITUDE: NumericField = NumericField { keys: &["longitude"], default: 0.0 };

const CHARGING_KEYS: &[&str] = &["charging_status", "chargingStatus"];

impl TelemetrySnapshot {
    /// Decode a raw source record. Absent records, non-object records and
    /// malformed fields all fall back to defaults; this never fails.
    pub fn decode(record: Option<&Value>, captured_at: DateTime<Utc>) -> Self {
        let record = record.and_then(Value::as_object);
        let num = |field: &NumericField| -> f64 {
            record
                .and_then(|r| {
                    field
                        .keys
                        .iter()
                        .filter_map(|k| r.get(*k))
                        .find_map(lenient_number)
                })
                .unwrap_or(field.default)
        };

        let soc = num(&SOC);
        let charging_status = record
            .and_then(|r| CHARGING_KEYS.iter().find_map(|k| r.get(*k)))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.eq_ignore_ascii_case("charging") {
                    ChargingStatus::Charging
                } else {
                    ChargingStatus::NotCharging
                }
            })
            .unwrap_or_default();

        Self {
            speed: num(&SPEED),
            battery_temp: num(&BATTERY_TEMP),
            voltage: num(&VOLTAGE),
            soc,
            soh: num(&SOH),
            range: estimate_range_km(soc),
            torque: num(&TORQUE),
            tyre_pressure: num(&TYRE_PRESSURE),
            rpm: num(&RPM),
            current: num(&CURRENT),
            motor_temp: num(&MOTOR_TEMP),
            ambient_temp: num(&AMBIENT_TEMP),
            charging_status,
            latitude: num(&LATITUDE),
            longitude: num(&LONGITUDE),
            captured_at,
        }
    }

    /// All-defaults snapshot, shown before the first sample arrives.
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self::decode(None, captured_at)
    }

    pub fn is_charging(&self) -> bool {
        self.charging_status == ChargingStatus::Charging
    }

    /// Every numeric field, for invariant checks and display iteration.
    pub fn numeric_fields(&self) -> [(&'static str, f64); 14] {
        [
            ("speed", self.speed),
            ("battery_temp", self.battery_temp),
            ("voltage", self.voltage),
            ("soc", self.soc),
            ("soh", self.soh),
            ("range", self.range),
            ("torque", self.torque),
            ("tyre_pressure", self.tyre_pressure),
            ("rpm", self.rpm),
            ("current", self.current),
            ("motor_temp", self.motor_temp),
            ("ambient_temp", self.ambient_temp),
            ("latitude", self.latitude),
            ("longitude", self.longitude),
        ]
    }
}

/// Remaining range from state of charge: `round(soc / 100 * MAX_RANGE_KM)`.
///
/// Out-of-band `soc` values are not clamped here.
pub fn estimate_range_km(soc: f64) -> f64 {
    ((soc / 100.0) * MAX_RANGE_KM).round()
}

// ---------------------------------------------------------------------------
// Lenient numeric coercion
// ---------------------------------------------------------------------------

/// JSON numbers pass through; strings contribute their leading numeric
/// prefix (`"45.2 km/h"` -> 45.2). Anything else, or a non-finite result,
/// yields `None`.
fn lenient_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => leading_f64(s),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

fn leading_f64(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let b = s.as_bytes();
    let mut i = 0;

    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return None;
    }
    // Exponent only counts when it has digits ("12e" parses as 12)
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    s[..i].parse().ok()
}
