//! Display session orchestration for a remote-streaming host
//!
//! Changes display settings when a client starts streaming, puts them back
//! when it stops, and recovers after the host dies in between.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod persistence;
pub mod retry;
pub mod session;
pub mod types;

pub use engine::{CommandEngine, SettingsEngine};
pub use error::{PersistenceError, SessionError, SessionResult};
pub use persistence::{FileStore, MemoryStore, PersistenceStore};
pub use retry::RetryPolicy;
pub use session::{SessionGuard, SessionManager};
pub use types::{
    ApplyFailureKind, ApplyResult, DevicePrep, DisplayConfig, DisplaySnapshot, HdrPrep,
    LaunchSession, PersistedState, RefreshRateChange, ResolutionChange, RestoreOutcome,
    SessionPhase,
};
