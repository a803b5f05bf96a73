//! Restore retry timer
//!
//! The timer state lives inside the lock it shares with its owner and the
//! worker thread waits on a condition variable tied to that same lock.
//! Waiting releases the lock, each tick runs with it held, and a cancel
//! made under the lock is seen before any further tick.

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::constants::retry::*;

/// How often, and how many times, a failed restore is retried
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Multiplier applied after each failed tick (1.0 = fixed interval)
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Ticks before the timer gives up and leaves the record for the next start
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_backoff() -> f64 {
    DEFAULT_BACKOFF
}

fn default_max_interval_ms() -> u64 {
    DEFAULT_MAX_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff: default_backoff(),
            max_interval_ms: default_max_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Fixed interval, no backoff
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        let interval_ms = interval.as_millis() as u64;
        Self {
            interval_ms,
            backoff: 1.0,
            max_interval_ms: interval_ms,
            max_attempts,
        }
    }

    /// Delay before the tick following `failures` failed ticks
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = self.backoff.max(1.0).powi(failures.min(i32::MAX as u32) as i32);
        let ms = (self.interval_ms as f64 * factor).min(self.max_interval_ms.max(self.interval_ms) as f64);
        Duration::from_millis(ms as u64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    next_tick: Instant,
    failures: u32,
}

/// Schedule of pending restore retries
///
/// Arming an armed timer and cancelling an idle one are no-ops.
#[derive(Debug)]
pub struct RetryTimer {
    policy: RetryPolicy,
    schedule: Option<Schedule>,
    shut_down: bool,
}

impl RetryTimer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            schedule: None,
            shut_down: false,
        }
    }

    /// Returns false when the timer was already armed or is shut down
    pub fn arm(&mut self) -> bool {
        if self.shut_down || self.schedule.is_some() {
            return false;
        }
        let delay = self.policy.delay_after(0);
        self.schedule = Some(Schedule {
            next_tick: Instant::now() + delay,
            failures: 0,
        });
        info!(delay_ms = delay.as_millis() as u64, max_attempts = self.policy.max_attempts, "Armed display restore retry");
        true
    }

    /// Returns false when nothing was armed
    pub fn cancel(&mut self) -> bool {
        self.schedule.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.schedule.is_some()
    }

    /// Failed ticks since the timer was armed
    pub fn failures(&self) -> u32 {
        self.schedule.map(|s| s.failures).unwrap_or(0)
    }

    fn deadline(&self) -> Option<Instant> {
        self.schedule.map(|s| s.next_tick)
    }

    /// Schedule the next tick; disarms and returns false once the budget is spent
    fn record_failure(&mut self, now: Instant) -> bool {
        let Some(schedule) = self.schedule.as_mut() else {
            return false;
        };
        schedule.failures += 1;
        if schedule.failures >= self.policy.max_attempts {
            self.schedule = None;
            return false;
        }
        schedule.next_tick = now + self.policy.delay_after(schedule.failures);
        true
    }

    fn shut_down(&mut self) {
        self.shut_down = true;
        self.schedule = None;
    }
}

/// Result of one retry tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing left to retry
    Done,
    Retry,
}

/// State protected by the retry lock
pub trait RetryTarget: Send + 'static {
    fn timer(&mut self) -> &mut RetryTimer;

    /// One attempt, called with the lock held
    fn tick(&mut self) -> TickOutcome;
}

/// Lock shared by the owner and the retry worker, plus the condition
/// variable the worker sleeps on
pub struct RetryLock<T> {
    state: Mutex<T>,
    wake: Condvar,
}

impl<T> RetryLock<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            wake: Condvar::new(),
        }
    }

    /// A panic inside a previous holder does not make the state unusable;
    /// the persisted record stays the source of truth
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the worker so it re-reads the schedule
    pub fn notify(&self) {
        self.wake.notify_all();
    }
}

/// Background thread driving a `RetryTimer`
pub struct RetryWorker<T: RetryTarget> {
    lock: Arc<RetryLock<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: RetryTarget> RetryWorker<T> {
    pub fn spawn(lock: Arc<RetryLock<T>>) -> io::Result<Self> {
        let worker_lock = Arc::clone(&lock);
        let handle = thread::Builder::new()
            .name("display-restore-retry".to_string())
            .spawn(move || run(&worker_lock))?;
        Ok(Self {
            lock,
            handle: Some(handle),
        })
    }

    /// Shut the timer down and wait for an in-flight tick to finish
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut state = self.lock.lock();
            state.timer().shut_down();
            self.lock.notify();
        }
        if handle.join().is_err() {
            error!("Display restore retry worker panicked");
        }
    }
}

impl<T: RetryTarget> Drop for RetryWorker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T: RetryTarget>(lock: &RetryLock<T>) {
    debug!("Display restore retry worker started");
    let mut state = lock.lock();
    loop {
        let timer = state.timer();
        if timer.shut_down {
            break;
        }

        let Some(deadline) = timer.deadline() else {
            state = lock.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = Instant::now();
        if now < deadline {
            state = lock
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let attempt = state.timer().failures() + 1;
        debug!(attempt, "Retrying display restore");
        match state.tick() {
            TickOutcome::Done => {
                if state.timer().cancel() {
                    info!(attempt, "Display restore retry finished");
                }
            }
            TickOutcome::Retry => {
                if !state.timer().record_failure(Instant::now()) && !state.timer().shut_down {
                    warn!(attempts = attempt, "Giving up on display restore, state is kept for the next start");
                }
            }
        }
    }
    debug!("Display restore retry worker stopped");
}
