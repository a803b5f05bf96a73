//! Shared value types passed between the session manager, the settings
//! engine and the persistence store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// How the target display should be prepared before streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePrep {
    /// Leave the display topology alone
    #[default]
    NoOperation,
    /// Only check that the target display is usable
    VerifyOnly,
    /// Activate the target display if it is off
    EnsureActive,
    /// Activate the target display and make it primary
    EnsurePrimary,
    /// Make the target display the only active one
    EnsureOnlyDisplay,
}

/// Resolution handling for the streamed display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ResolutionChange {
    #[default]
    Disabled,
    /// Use the resolution requested by the client
    Automatic,
    Manual { width: u32, height: u32 },
}

/// Refresh rate handling for the streamed display
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RefreshRateChange {
    #[default]
    Disabled,
    /// Use the frame rate requested by the client
    Automatic,
    Manual { hz: f64 },
}

/// HDR handling for the streamed display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HdrPrep {
    #[default]
    Disabled,
    /// Follow the client's HDR request
    Automatic,
}

/// Display preparation settings of the host
///
/// The session manager never interprets these; they are handed to the
/// settings engine as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Target output, empty for the primary display
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub device_prep: DevicePrep,
    #[serde(default)]
    pub resolution: ResolutionChange,
    #[serde(default)]
    pub refresh_rate: RefreshRateChange,
    #[serde(default)]
    pub hdr: HdrPrep,
}

/// Parameters of the client session that is about to stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSession {
    pub client_name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default)]
    pub enable_hdr: bool,
}

/// Why a configure attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyFailureKind {
    /// The configuration is impossible on the current hardware
    Unsupported,
    /// The engine could not read or change the display state
    Engine,
}

/// Outcome of `configure_display`, tells the caller whether the stream may start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum ApplyResult {
    /// The display already matches the requested configuration
    NoChangeNeeded,
    Applied,
    /// Applied, but some capability (e.g. HDR) could not be honoured
    AppliedPartially { reason: String },
    Failed { kind: ApplyFailureKind, reason: String },
}

impl ApplyResult {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Failed {
            kind: ApplyFailureKind::Unsupported,
            reason: reason.into(),
        }
    }

    pub fn engine_failure(reason: impl Into<String>) -> Self {
        Self::Failed {
            kind: ApplyFailureKind::Engine,
            reason: reason.into(),
        }
    }

    /// True when starting the stream is safe
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChangeNeeded => write!(f, "no change needed"),
            Self::Applied => write!(f, "applied"),
            Self::AppliedPartially { reason } => write!(f, "applied partially: {reason}"),
            Self::Failed { kind: ApplyFailureKind::Unsupported, reason } => {
                write!(f, "unsupported: {reason}")
            }
            Self::Failed { kind: ApplyFailureKind::Engine, reason } => {
                write!(f, "failed: {reason}")
            }
        }
    }
}

/// Outcome of asking the engine to reapply a persisted configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Topology no longer matches the record, retrying cannot help
    PermanentFailure(String),
    /// Device temporarily unreachable (asleep, unplugged, disabled)
    TransientFailure(String),
}

/// Engine-defined snapshot of a display configuration
///
/// Opaque to the session manager; only the engine that captured it knows
/// how to read it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplaySnapshot(pub serde_json::Value);

/// Durable record of a configuration that is still owed a restoration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Configuration in place before the host changed anything
    pub prior: DisplaySnapshot,
    /// Unix seconds at capture time
    pub captured_at: u64,
    /// Client whose session caused the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl PersistedState {
    pub fn new(prior: DisplaySnapshot, client: Option<String>) -> Self {
        let captured_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            prior,
            captured_at,
            client,
        }
    }
}

/// Read-only view of where the session manager is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing is owed a restoration
    Idle,
    /// The display is changed and a restoration is owed
    Configured,
    /// A restore failed transiently and the retry timer is armed
    RestoreRetrying,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::RestoreRetrying => "restore retrying",
        };
        f.write_str(label)
    }
}
