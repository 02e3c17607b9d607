//! Connectors for external services
//!
//! API clients for the services the portfolio reads from.

pub mod github;

pub use github::{ApiError, GithubClient};
