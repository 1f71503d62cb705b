pub mod api;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod security;
pub mod telemetry;
pub mod ws_server;
