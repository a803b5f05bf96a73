//! IPC message types for streaming front-end ↔ host communication

use serde::{Deserialize, Serialize};

use crate::types::{ApplyResult, DisplayConfig, LaunchSession, SessionPhase};

/// Requests sent by a streaming front-end to the host
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum HostRequest {
    /// Prepare the display before a stream starts
    /// `config` overrides the host's configured display preparation
    Configure {
        session: LaunchSession,
        #[serde(default)]
        config: Option<DisplayConfig>,
    },

    /// Stream ended, put the display back
    Restore,

    /// Forget the persisted display state without touching the display
    ResetPersistence,

    /// Query the session phase
    Status,

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent by the host
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum HostResponse {
    /// Outcome of a Configure request
    Applied(ApplyResult),

    /// Request processed
    Done,

    Status(SessionPhase),

    /// Health check response
    Pong,

    /// Error occurred
    Error(String),
}
