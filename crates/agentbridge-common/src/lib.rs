//! Shared types and utilities used across the agent bridge server crates.

pub mod config;
pub mod error;
pub mod ids;
pub mod tracing_setup;

pub use config::ServerConfig;
pub use error::{CommonError, Result};
pub use ids::{ConnectionId, ProjectId};
pub use tracing_setup::TracingHandle;
