pub mod comms;
pub mod config;
pub mod connectors;
pub mod security;
pub mod utils;

/// GitHub rejects API requests without a User-Agent.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
