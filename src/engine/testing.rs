//! Scripted in-memory engine for session tests

use anyhow::{Result, bail};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::SettingsEngine;
use crate::types::{ApplyResult, DisplayConfig, DisplaySnapshot, LaunchSession, PersistedState, RestoreOutcome};

#[derive(Debug, Default)]
pub(crate) struct Hardware {
    /// What the "display" is currently showing
    pub(crate) current: Value,
    /// Outcomes handed out by `restore` before it starts succeeding
    pub(crate) restore_script: VecDeque<RestoreOutcome>,
    /// Forced result of the next `apply` calls
    pub(crate) apply_script: VecDeque<ApplyResult>,
    pub(crate) fail_capture: bool,
    pub(crate) unavailable: bool,
    pub(crate) captures: usize,
    pub(crate) applies: usize,
    pub(crate) restores: usize,
}

/// Clones share the hardware, so a test keeps a handle after moving one
/// into the session manager
#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    pub(crate) hardware: Arc<Mutex<Hardware>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    call_delay: Duration,
}

impl ScriptedEngine {
    pub(crate) fn new(initial: Value) -> Self {
        Self {
            hardware: Arc::new(Mutex::new(Hardware {
                current: initial,
                ..Hardware::default()
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            call_delay: Duration::ZERO,
        }
    }

    /// Make every engine call linger so overlapping calls would be visible
    pub(crate) fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub(crate) fn hw(&self) -> std::sync::MutexGuard<'_, Hardware> {
        self.hardware.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> Value {
        self.hw().current.clone()
    }

    pub(crate) fn script_restores(&self, outcomes: impl IntoIterator<Item = RestoreOutcome>) {
        self.hw().restore_script.extend(outcomes);
    }

    pub(crate) fn script_applies(&self, results: impl IntoIterator<Item = ApplyResult>) {
        self.hw().apply_script.extend(results);
    }

    /// Highest number of engine calls observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CallGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            thread::sleep(self.call_delay);
        }
        CallGuard(&self.in_flight)
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Display state a session asks for
pub(crate) fn mode_for(session: &LaunchSession) -> Value {
    json!({ "width": session.width, "height": session.height, "fps": session.fps })
}

impl SettingsEngine for ScriptedEngine {
    fn capture(&mut self) -> Result<DisplaySnapshot> {
        let _call = self.enter();
        let mut hw = self.hw();
        hw.captures += 1;
        if hw.fail_capture {
            bail!("display enumeration failed");
        }
        Ok(DisplaySnapshot(hw.current.clone()))
    }

    fn apply(
        &mut self,
        _config: &DisplayConfig,
        session: &LaunchSession,
        _prior: &PersistedState,
    ) -> ApplyResult {
        let _call = self.enter();
        let mut hw = self.hw();
        hw.applies += 1;
        if let Some(result) = hw.apply_script.pop_front() {
            if matches!(result, ApplyResult::Applied | ApplyResult::AppliedPartially { .. }) {
                hw.current = mode_for(session);
            }
            return result;
        }

        let target = mode_for(session);
        if hw.current == target {
            ApplyResult::NoChangeNeeded
        } else {
            hw.current = target;
            ApplyResult::Applied
        }
    }

    fn restore(&mut self, prior: &PersistedState) -> RestoreOutcome {
        let _call = self.enter();
        let mut hw = self.hw();
        hw.restores += 1;
        match hw.restore_script.pop_front() {
            Some(RestoreOutcome::Restored) | None => {
                hw.current = prior.prior.0.clone();
                RestoreOutcome::Restored
            }
            Some(failure) => failure,
        }
    }

    fn is_available(&mut self) -> bool {
        !self.hw().unavailable
    }
}
