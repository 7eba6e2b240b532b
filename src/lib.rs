pub mod history;
pub mod mqtt;
pub mod persist;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;
pub mod stress;
pub mod telemetry;
