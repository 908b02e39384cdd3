mod api;
mod config;
mod dashboard;
mod event;
mod geocode;
mod message;
mod telemetry;

pub use api::*;
pub use config::*;
pub use dashboard::*;
pub use event::*;
pub use geocode::*;
pub use message::*;
pub use telemetry::*;
