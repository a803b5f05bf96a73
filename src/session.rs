//! Session manager
//!
//! Serializes every display change made for a streaming session, keeps a
//! durable record of the configuration that has to come back, and retries
//! restoration in the background when the hardware is not reachable.
//!
//! One manager is built per process by the host's composition root:
//!
//! ```no_run
//! # use display_session::{SessionManager, MemoryStore, RetryPolicy, CommandEngine};
//! # use std::time::Duration;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CommandEngine::new("display-session-helper", Duration::from_secs(30));
//! let manager = SessionManager::new(engine, MemoryStore::new(), RetryPolicy::default())?;
//! let _guard = manager.init()?; // crash recovery; restores once more on drop
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::engine::SettingsEngine;
use crate::error::{PersistenceError, SessionError, SessionResult};
use crate::persistence::PersistenceStore;
use crate::retry::{RetryLock, RetryPolicy, RetryTarget, RetryTimer, RetryWorker, TickOutcome};
use crate::types::{ApplyResult, DisplayConfig, LaunchSession, PersistedState, RestoreOutcome, SessionPhase};

/// Everything guarded by the session lock
struct SessionState {
    engine: Box<dyn SettingsEngine>,
    store: Box<dyn PersistenceStore>,
    timer: RetryTimer,
    /// Mirrors whether the store holds a record
    pending: bool,
    /// Set by the final restore; later sessions are refused
    closed: bool,
}

/// What a single restore attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestoreStatus {
    NothingToRestore,
    Restored,
    /// Record dropped because the topology no longer matches
    Discarded,
    /// Hardware unreachable, record kept
    Pending,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match (self.pending, self.timer.is_armed()) {
            (false, _) => SessionPhase::Idle,
            (true, true) => SessionPhase::RestoreRetrying,
            (true, false) => SessionPhase::Configured,
        }
    }

    fn clear_record(&mut self) -> SessionResult<()> {
        self.store.clear()?;
        self.pending = false;
        Ok(())
    }

    /// One restore attempt against the persisted record; never arms the timer
    fn restore(&mut self) -> SessionResult<RestoreStatus> {
        let Some(prior) = self.store.load()? else {
            self.pending = false;
            return Ok(RestoreStatus::NothingToRestore);
        };
        self.pending = true;

        match self.engine.restore(&prior) {
            RestoreOutcome::Restored => {
                self.clear_record()?;
                info!(client = ?prior.client, captured_at = prior.captured_at, "Restored prior display configuration");
                Ok(RestoreStatus::Restored)
            }
            RestoreOutcome::PermanentFailure(reason) => {
                warn!(%reason, client = ?prior.client, "Prior display configuration can no longer be applied, discarding it");
                self.clear_record()?;
                Ok(RestoreStatus::Discarded)
            }
            RestoreOutcome::TransientFailure(reason) => {
                info!(%reason, "Display unavailable, restore postponed");
                Ok(RestoreStatus::Pending)
            }
        }
    }

    /// Restore, falling back to the retry timer when the hardware is away
    fn restore_or_arm(&mut self) -> SessionResult<RestoreStatus> {
        let status = self.restore()?;
        if status == RestoreStatus::Pending {
            self.timer.arm();
        } else {
            self.timer.cancel();
        }
        Ok(status)
    }
}

impl RetryTarget for SessionState {
    fn timer(&mut self) -> &mut RetryTimer {
        &mut self.timer
    }

    fn tick(&mut self) -> TickOutcome {
        if !self.engine.is_available() {
            debug!("Display engine unavailable, skipping restore attempt");
            return TickOutcome::Retry;
        }
        match self.restore() {
            Ok(RestoreStatus::Pending) => TickOutcome::Retry,
            Ok(_) => TickOutcome::Done,
            Err(e) => {
                error!(error = %e, "Restore retry failed to access persisted state");
                TickOutcome::Retry
            }
        }
    }
}

/// Coordinates display changes for streaming sessions
///
/// All operations take the same lock, so at most one of them (or one retry
/// tick) talks to the settings engine at any time.
pub struct SessionManager {
    state: Arc<RetryLock<SessionState>>,
    // Shut down in Drop, before the state it ticks on can go away
    worker: RetryWorker<SessionState>,
}

impl SessionManager {
    pub fn new(
        engine: impl SettingsEngine + 'static,
        store: impl PersistenceStore + 'static,
        policy: RetryPolicy,
    ) -> SessionResult<Self> {
        let state = Arc::new(RetryLock::new(SessionState {
            engine: Box::new(engine),
            store: Box::new(store),
            timer: RetryTimer::new(policy),
            pending: false,
            closed: false,
        }));
        let worker = RetryWorker::spawn(Arc::clone(&state)).map_err(SessionError::Worker)?;
        Ok(Self { state, worker })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Crash recovery, called once at process start
    ///
    /// A record left behind means an earlier process changed the display
    /// and never put it back. One restore is attempted right away; if the
    /// hardware is unavailable the retry timer takes over instead of
    /// blocking startup. A record that cannot be decoded is moved aside
    /// rather than keeping the host down. Calling this again only repeats
    /// the check.
    pub fn init(&self) -> SessionResult<SessionGuard<'_>> {
        let mut state = self.lock();
        let loaded = state.store.load();
        let owed = match loaded {
            Ok(owed) => owed,
            Err(PersistenceError::Corrupt { path, source }) => {
                error!(path = %path.display(), error = %source, "Persisted display state is unreadable, the prior configuration is lost");
                state.store.set_aside_corrupt()?;
                None
            }
            Err(e) => return Err(e.into()),
        };
        match owed {
            Some(prior) => {
                warn!(client = ?prior.client, captured_at = prior.captured_at, "Found display changes left by a previous run, restoring");
                state.pending = true;
                let status = state.restore_or_arm()?;
                debug!(?status, "Startup restore finished");
            }
            None => {
                state.pending = false;
                debug!("No display changes owed from a previous run");
            }
        }
        self.state.notify();
        Ok(SessionGuard { manager: self })
    }

    /// Prepare the display for a new streaming session
    ///
    /// A pending restore of an earlier session is cancelled: the new
    /// session supersedes it, and the record it was restoring stays the
    /// configuration owed at the end. Otherwise the current configuration
    /// is captured and persisted before the engine changes anything.
    ///
    /// Fails with `SessionError::ShuttingDown` once `shutdown` has run.
    pub fn configure_display(
        &self,
        config: &DisplayConfig,
        session: &LaunchSession,
    ) -> SessionResult<ApplyResult> {
        let mut state = self.lock();
        if state.closed {
            warn!(client = %session.client_name, "Refusing display change, host is shutting down");
            return Err(SessionError::ShuttingDown);
        }
        if state.timer.cancel() {
            info!(client = %session.client_name, "New session supersedes pending display restore");
        }

        let existing = state.store.load()?;
        let (prior, fresh) = match existing {
            Some(prior) => {
                debug!(captured_at = prior.captured_at, "Reusing persisted prior display configuration");
                (prior, false)
            }
            None => {
                let snapshot = match state.engine.capture() {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!(error = ?e, client = %session.client_name, "Failed to capture current display configuration");
                        return Ok(ApplyResult::engine_failure(format!("{e:#}")));
                    }
                };
                let prior = PersistedState::new(snapshot, Some(session.client_name.clone()));
                state.store.save(&prior)?;
                (prior, true)
            }
        };
        state.pending = true;

        let result = state.engine.apply(config, session, &prior);
        match &result {
            ApplyResult::Applied | ApplyResult::AppliedPartially { .. } => {
                info!(client = %session.client_name, width = session.width, height = session.height, fps = session.fps, result = %result, "Display configured for session");
            }
            ApplyResult::NoChangeNeeded => {
                debug!(client = %session.client_name, "Display already matches session");
                if fresh {
                    state.clear_record()?;
                }
            }
            ApplyResult::Failed { .. } => {
                warn!(client = %session.client_name, result = %result, "Failed to configure display");
                if fresh {
                    state.clear_record()?;
                } else {
                    // The earlier session's record is still owed
                    state.timer.arm();
                }
            }
        }

        self.state.notify();
        Ok(result)
    }

    /// Put back the configuration recorded before the session changed it
    ///
    /// Without a record this does nothing. A transient hardware failure is
    /// not an error: the retry timer keeps trying in the background.
    pub fn restore_state(&self) -> SessionResult<()> {
        let mut state = self.lock();
        let status = if state.closed {
            // Nothing may tick after the final restore
            state.restore()
        } else {
            state.restore_or_arm()
        };
        self.state.notify();
        debug!(?status, "Restore requested");
        status.map(|_| ())
    }

    /// Forget the persisted record without touching the display
    pub fn reset_persistence(&self) -> SessionResult<()> {
        let mut state = self.lock();
        if state.timer.cancel() {
            info!("Cancelled pending display restore");
        }
        self.state.notify();
        state.clear_record()?;
        info!("Reset persisted display state");
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase()
    }

    /// Cancel the retry timer and make one last synchronous restore attempt
    ///
    /// Runs under the session lock, so it can neither overlap a retry tick
    /// nor be followed by one it cancelled. Any `configure_display` after
    /// this is refused, so nothing undoes the final restore. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        if state.timer.cancel() {
            debug!("Cancelled display restore retry for shutdown");
        }
        self.state.notify();

        match state.restore() {
            Ok(RestoreStatus::NothingToRestore) => {}
            Ok(RestoreStatus::Pending) => {
                warn!("Display still unavailable at shutdown, restore is left for the next start");
            }
            Ok(status) => debug!(?status, "Final display restore finished"),
            Err(e) => error!(error = %e, "Final display restore failed"),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.worker.shutdown();
    }
}

/// Returned by `SessionManager::init`; dropping it runs `shutdown`
#[must_use = "dropping the guard immediately restores the display"]
pub struct SessionGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        info!("Releasing display session");
        self.manager.shutdown();
    }
}
