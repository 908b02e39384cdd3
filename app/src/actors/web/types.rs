//! JSON request/response types for the web API.
//!
//! All types live in the `evdash` lib so other consumers can share them.

pub use evdash::{ModeRequest, SearchRequest, StatusResponse};
