//! Settings engine contract
//!
//! The engine is the only part of the system that touches display
//! hardware. The session manager serializes every call into it, so
//! implementations never see two calls at once.

mod command;
#[cfg(test)]
pub(crate) mod testing;

pub use command::CommandEngine;

use anyhow::Result;

use crate::types::{ApplyResult, DisplayConfig, DisplaySnapshot, LaunchSession, PersistedState, RestoreOutcome};

pub trait SettingsEngine: Send {
    /// Read the configuration currently in effect
    fn capture(&mut self) -> Result<DisplaySnapshot>;

    /// Apply `config` for `session`; `prior` is the record already persisted
    /// for this change. Must be idempotent when nothing needs to change.
    fn apply(
        &mut self,
        config: &DisplayConfig,
        session: &LaunchSession,
        prior: &PersistedState,
    ) -> ApplyResult;

    /// Reapply the persisted configuration
    fn restore(&mut self, prior: &PersistedState) -> RestoreOutcome;

    /// Cheap probe consulted before each retry tick; an unavailable engine
    /// (locked session, display asleep) is not worth calling `restore` on
    fn is_available(&mut self) -> bool {
        true
    }
}
