//! Configuration management for the display session host
//!
//! - **host**: HostConfig loaded by the daemon at startup (JSON)

pub mod host;

pub use host::{EngineSettings, HostConfig};
