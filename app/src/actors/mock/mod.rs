//! Development sources that need no external service.

pub mod vehicle;
