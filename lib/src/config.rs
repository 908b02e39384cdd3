//! Persisted config types. The TOML file is hand-editable; every section has
//! defaults so a partial file still loads.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DriveMode;

/// Top-level persisted config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvdashConfig {
    /// Drive mode selected when a session starts.
    #[serde(default)]
    pub default_mode: DriveMode,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub geocoder: GeocoderSection,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub webserver: HashMap<String, WebserverSection>,
}

/// The single real-time data source. Selected by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSection {
    Firebase(FirebaseSection),
    Mock(MockSourceSection),
}

impl SourceSection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Firebase(_) => "Firebase Realtime Database",
            Self::Mock(_) => "Mock Vehicle",
        }
    }
}

impl Default for SourceSection {
    fn default() -> Self {
        Self::Mock(MockSourceSection::default())
    }
}

/// Connection descriptor for a Firebase Realtime Database node.
/// Passed through to the stream as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirebaseSection {
    /// e.g. `https://my-project-default-rtdb.firebaseio.com`
    pub database_url: String,
    /// Node holding the vehicle record. Empty = database root.
    #[serde(default)]
    pub path: String,
    /// Database secret or ID token, sent as the `auth` query parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Seconds without a single byte (Firebase keep-alives arrive every
    /// ~30 s) before the stream is treated as stalled.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl FirebaseSection {
    pub fn new(database_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            path: path.into(),
            auth: None,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}

/// Synthetic vehicle for running without a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSourceSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_center_lat")]
    pub center_lat: f64,
    #[serde(default = "default_center_lng")]
    pub center_lng: f64,
    /// Emit an empty payload every N samples. 0 = never.
    #[serde(default)]
    pub blank_every: u32,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_center_lat() -> f64 {
    12.9716
}

fn default_center_lng() -> f64 {
    77.5946
}

impl Default for MockSourceSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            center_lat: default_center_lat(),
            center_lng: default_center_lng(),
            blank_every: 0,
        }
    }
}

/// Free-text geocoding service (Nominatim-compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocoderSection {
    #[serde(default = "default_geocoder_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Whole-request timeout. 0 leaves the transport default.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GeocoderSection {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn default_geocoder_endpoint() -> String {
    "https://nominatim.openstreetmap.org/search".into()
}

fn default_user_agent() -> String {
    concat!("evdash/", env!("CARGO_PKG_VERSION")).into()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for GeocoderSection {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_endpoint(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebserverSection {
    #[serde(default)]
    pub name: String,
    pub bind: String,
}

impl Default for EvdashConfig {
    /// Mock source (runs without credentials) and a local web server.
    fn default() -> Self {
        let mut webserver = HashMap::new();
        webserver.insert(
            "0".into(),
            WebserverSection {
                name: "Web Server".into(),
                bind: "127.0.0.1:3030".into(),
            },
        );
        Self {
            default_mode: DriveMode::default(),
            source: SourceSection::default(),
            geocoder: GeocoderSection::default(),
            webserver,
        }
    }
}
