//! Settings engine backed by an external helper executable
//!
//! The helper owns all platform display plumbing. It is invoked once per
//! engine call with a sub-command and speaks JSON:
//!
//! - `capture`: prints the current configuration snapshot
//! - `apply`: reads `{config, session, prior}`, prints an `ApplyResult`;
//!   exit status 3 means the configuration is unsupported
//! - `restore`: reads the persisted state; exit status 0 restored,
//!   2 permanent failure, anything else transient
//! - `available`: exit status 0 when the display can be changed right now

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::SettingsEngine;
use crate::constants::engine::{EXIT_PERMANENT_FAILURE, EXIT_UNSUPPORTED, POLL_INTERVAL_MS};
use crate::types::{ApplyResult, DisplayConfig, DisplaySnapshot, LaunchSession, PersistedState, RestoreOutcome};

pub struct CommandEngine {
    helper: PathBuf,
    timeout: Duration,
}

#[derive(Serialize)]
struct ApplyRequest<'a> {
    config: &'a DisplayConfig,
    session: &'a LaunchSession,
    prior: &'a PersistedState,
}

struct HelperOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
}

impl HelperOutput {
    /// Helper's own explanation, or the exit status when it printed nothing
    fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("helper exited with {}", self.status)
        } else {
            stderr.to_string()
        }
    }
}

impl CommandEngine {
    pub fn new(helper: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            helper: helper.into(),
            timeout,
        }
    }

    fn run(&self, subcommand: &str, input: Option<Vec<u8>>) -> Result<HelperOutput> {
        debug!(helper = %self.helper.display(), subcommand, "Running display helper");

        let mut child = Command::new(&self.helper)
            .arg(subcommand)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn display helper {}", self.helper.display()))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Some(input) = input {
            let mut stdin = child
                .stdin
                .take()
                .context("Display helper stdin was not captured")?;
            // Dropping stdin closes it so the helper sees EOF
            if let Err(e) = stdin.write_all(&input) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e).context("Failed to write request to display helper");
            }
        }

        let status = self.wait(&mut child, subcommand)?;

        let stdout = stdout
            .join()
            .map_err(|_| anyhow!("Display helper stdout reader panicked"))?;
        let stderr = stderr
            .join()
            .map_err(|_| anyhow!("Display helper stderr reader panicked"))?;

        Ok(HelperOutput {
            status,
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Poll the helper until it exits, killing it once the timeout passes
    fn wait(&self, child: &mut Child, subcommand: &str) -> Result<ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .context("Failed to poll display helper")?
            {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(subcommand, timeout_ms = self.timeout.as_millis() as u64, "Display helper timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                bail!("Display helper '{}' timed out after {:?}", subcommand, self.timeout);
            }
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl SettingsEngine for CommandEngine {
    fn capture(&mut self) -> Result<DisplaySnapshot> {
        let output = self.run("capture", None)?;
        if !output.status.success() {
            bail!("Display helper failed to capture configuration: {}", output.reason());
        }
        serde_json::from_slice(&output.stdout).context("Display helper printed an invalid snapshot")
    }

    fn apply(
        &mut self,
        config: &DisplayConfig,
        session: &LaunchSession,
        prior: &PersistedState,
    ) -> ApplyResult {
        let request = match serde_json::to_vec(&ApplyRequest { config, session, prior }) {
            Ok(request) => request,
            Err(e) => return ApplyResult::engine_failure(format!("Failed to encode apply request: {e}")),
        };

        let output = match self.run("apply", Some(request)) {
            Ok(output) => output,
            Err(e) => {
                error!(error = ?e, "Display helper apply failed to run");
                return ApplyResult::engine_failure(format!("{e:#}"));
            }
        };

        match output.status.code() {
            Some(0) => serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
                ApplyResult::engine_failure(format!("Display helper printed an invalid apply result: {e}"))
            }),
            Some(EXIT_UNSUPPORTED) => ApplyResult::unsupported(output.reason()),
            _ => ApplyResult::engine_failure(output.reason()),
        }
    }

    fn restore(&mut self, prior: &PersistedState) -> RestoreOutcome {
        let request = match serde_json::to_vec(prior) {
            Ok(request) => request,
            Err(e) => return RestoreOutcome::PermanentFailure(format!("Failed to encode persisted state: {e}")),
        };

        // A helper that cannot even run is treated like unavailable hardware
        let output = match self.run("restore", Some(request)) {
            Ok(output) => output,
            Err(e) => return RestoreOutcome::TransientFailure(format!("{e:#}")),
        };

        match output.status.code() {
            Some(0) => {
                info!("Display helper restored prior configuration");
                RestoreOutcome::Restored
            }
            Some(EXIT_PERMANENT_FAILURE) => RestoreOutcome::PermanentFailure(output.reason()),
            _ => RestoreOutcome::TransientFailure(output.reason()),
        }
    }

    fn is_available(&mut self) -> bool {
        match self.run("available", None) {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!(error = %e, "Display helper availability probe failed");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable shell script standing in for the helper
    fn helper_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("helper.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn session() -> LaunchSession {
        LaunchSession {
            client_name: "tv".to_string(),
            width: 1920,
            height: 1080,
            fps: 60,
            enable_hdr: false,
        }
    }

    fn prior() -> PersistedState {
        PersistedState::new(DisplaySnapshot(serde_json::json!({"mode": "4k"})), None)
    }

    #[test]
    fn test_capture_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let helper = helper_script(&dir, r#"echo '{"mode": "4k"}'"#);
        let mut engine = CommandEngine::new(helper, Duration::from_secs(5));

        let snapshot = engine.capture().unwrap();
        assert_eq!(snapshot, DisplaySnapshot(serde_json::json!({"mode": "4k"})));
    }

    #[test]
    fn test_capture_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let helper = helper_script(&dir, "echo 'no display' >&2; exit 1");
        let mut engine = CommandEngine::new(helper, Duration::from_secs(5));

        let err = engine.capture().unwrap_err();
        assert!(format!("{err:#}").contains("no display"));
    }

    #[test]
    fn test_apply_exit_codes() {
        let config = DisplayConfig::default();

        let dir = tempfile::tempdir().unwrap();
        let applied = helper_script(&dir, r#"cat > /dev/null; echo '{"result": "applied"}'"#);
        assert_eq!(
            CommandEngine::new(applied, Duration::from_secs(5)).apply(&config, &session(), &prior()),
            ApplyResult::Applied
        );

        let dir = tempfile::tempdir().unwrap();
        let unsupported = helper_script(&dir, "cat > /dev/null; echo 'no 240Hz' >&2; exit 3");
        assert_eq!(
            CommandEngine::new(unsupported, Duration::from_secs(5)).apply(&config, &session(), &prior()),
            ApplyResult::unsupported("no 240Hz")
        );

        let dir = tempfile::tempdir().unwrap();
        let broken = helper_script(&dir, "cat > /dev/null; exit 1");
        assert!(matches!(
            CommandEngine::new(broken, Duration::from_secs(5)).apply(&config, &session(), &prior()),
            ApplyResult::Failed { kind: crate::types::ApplyFailureKind::Engine, .. }
        ));
    }

    #[test]
    fn test_restore_exit_codes_classify_failure() {
        let dir = tempfile::tempdir().unwrap();
        let restored = helper_script(&dir, "cat > /dev/null; exit 0");
        assert_eq!(
            CommandEngine::new(restored, Duration::from_secs(5)).restore(&prior()),
            RestoreOutcome::Restored
        );

        let dir = tempfile::tempdir().unwrap();
        let permanent = helper_script(&dir, "cat > /dev/null; echo 'topology changed' >&2; exit 2");
        assert_eq!(
            CommandEngine::new(permanent, Duration::from_secs(5)).restore(&prior()),
            RestoreOutcome::PermanentFailure("topology changed".to_string())
        );

        let dir = tempfile::tempdir().unwrap();
        let transient = helper_script(&dir, "cat > /dev/null; echo 'asleep' >&2; exit 1");
        assert_eq!(
            CommandEngine::new(transient, Duration::from_secs(5)).restore(&prior()),
            RestoreOutcome::TransientFailure("asleep".to_string())
        );
    }

    #[test]
    fn test_missing_helper_restore_is_transient() {
        let mut engine = CommandEngine::new("/nonexistent/display-helper", Duration::from_secs(1));
        assert!(matches!(engine.restore(&prior()), RestoreOutcome::TransientFailure(_)));
        assert!(!engine.is_available());
    }

    #[test]
    fn test_helper_timeout_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let helper = helper_script(&dir, "exec sleep 5");
        let mut engine = CommandEngine::new(helper, Duration::from_millis(200));

        let started = Instant::now();
        assert!(engine.capture().is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
