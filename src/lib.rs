pub mod config;
pub mod dispatcher;
pub mod events;
pub mod link;
pub mod mission;
pub mod modes;
pub mod protocol;
pub mod telemetry;
pub mod transport;
