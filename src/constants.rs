//! Application-wide constants
//!
//! File names, socket locations and retry defaults used by the host,
//! kept in one place so the library and the binary agree on them.

/// Configuration file locations
pub mod config {
    /// Directory name under the platform config/data/runtime dirs
    pub const APP_DIR: &str = "display-session";

    /// Host configuration file name
    pub const FILENAME: &str = "config.json";

    /// Default log level when neither LOG_LEVEL nor the config sets one
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// Environment variable overriding the log level
    pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
}

/// Persisted display state
pub mod persistence {
    /// File holding the configuration that is still owed a restoration
    pub const STATE_FILENAME: &str = "persisted_state.json";

    /// Suffix of the temporary sibling written before the atomic rename
    pub const TEMP_SUFFIX: &str = "tmp";

    /// Appended to a record that cannot be decoded when it is moved aside
    pub const CORRUPT_SUFFIX: &str = ".corrupt";
}

/// Restore retry policy defaults and limits
pub mod retry {
    /// Delay before the first retry
    pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

    /// Multiplier applied to the delay after each failed tick
    pub const DEFAULT_BACKOFF: f64 = 1.5;

    /// Upper bound on the delay between ticks
    pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;

    /// Attempts before the timer gives up (about half an hour with the defaults)
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

    /// Smallest accepted interval
    pub const MIN_INTERVAL_MS: u64 = 100;

    /// Largest accepted attempt budget
    pub const MAX_ATTEMPTS_LIMIT: u32 = 10_000;
}

/// External settings engine helper
pub mod engine {
    /// Helper executable looked up on PATH when the config names none
    pub const DEFAULT_HELPER: &str = "display-session-helper";

    /// Time a single helper invocation may take
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    /// How often a running helper is polled for exit
    pub const POLL_INTERVAL_MS: u64 = 20;

    /// Helper exit status meaning "restore can never succeed"
    pub const EXIT_PERMANENT_FAILURE: i32 = 2;

    /// Helper exit status meaning "the requested configuration is unsupported"
    pub const EXIT_UNSUPPORTED: i32 = 3;
}

/// Host IPC socket
pub mod ipc {
    /// Socket file name inside the runtime directory
    pub const SOCKET_FILENAME: &str = "host.sock";

    /// Maximum message size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
}
