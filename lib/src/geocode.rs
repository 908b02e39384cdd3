//! Geocoding result and error types shared by the lookup client and the bus.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Why a location search produced no coordinates. All variants are
/// recoverable by issuing a new search.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GeocodeError {
    #[error("enter a location to search")]
    EmptyQuery,

    #[error("no results found")]
    NoResults,

    #[error("failed to search location: {0}")]
    Transport(String),
}
