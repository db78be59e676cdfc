//! External command execution
//!
//! Every command hotspotd issues goes through a [`CommandRunner`]. Synchronous
//! runs are bounded by a timeout; detached runs return as soon as the child has
//! been spawned.

use crate::error::{HotspotError, HotspotResult};
use crate::validation;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Default bound for a synchronous command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<S: AsRef<str>>(program: &str, args: &[S]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a synchronous command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status zero
    Success { output: String },
    /// Ran, but exited non-zero (or was killed by a signal)
    NonZeroExit { code: Option<i32>, output: String },
    /// Never ran: missing executable, permission denied, ...
    SpawnFailed { reason: String },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success { .. })
    }

    /// Combined stdout/stderr, empty when the command never ran
    pub fn output(&self) -> &str {
        match self {
            CommandOutcome::Success { output } | CommandOutcome::NonZeroExit { output, .. } => output,
            CommandOutcome::SpawnFailed { .. } => "",
        }
    }

    /// Turn a non-success outcome into the matching error
    pub fn into_result(self, cmd: &CommandSpec) -> HotspotResult<String> {
        match self {
            CommandOutcome::Success { output } => Ok(output),
            CommandOutcome::NonZeroExit { code, output } => Err(HotspotError::CommandFailed {
                cmd: cmd.to_string(),
                code,
                output: validation::sanitize_error_message(&output),
            }),
            CommandOutcome::SpawnFailed { reason } => Err(HotspotError::SpawnFailed {
                cmd: cmd.to_string(),
                reason,
            }),
        }
    }
}

/// Reference to a spawned or discovered process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture combined output.
    ///
    /// Only a timeout is returned as `Err`; everything else is an outcome.
    async fn run(&self, cmd: &CommandSpec) -> HotspotResult<CommandOutcome>;

    /// Spawn without waiting. Fails with `SpawnFailed` if the child could not
    /// be created.
    async fn spawn_detached(&self, cmd: &CommandSpec) -> HotspotResult<ProcessHandle>;
}

/// Runs commands on the local system with `tokio::process`
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> HotspotResult<CommandOutcome> {
        debug!("command: {}", cmd);

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!("spawn of '{}' failed: {}", cmd.program, e);
                return Ok(CommandOutcome::SpawnFailed { reason: e.to_string() });
            }
        };

        // Dropping the child on timeout kills it
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(CommandOutcome::SpawnFailed { reason: e.to_string() }),
            Err(_) => {
                return Err(HotspotError::Timeout {
                    cmd: cmd.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(CommandOutcome::Success { output: combined })
        } else {
            Ok(CommandOutcome::NonZeroExit { code: output.status.code(), output: combined })
        }
    }

    async fn spawn_detached(&self, cmd: &CommandSpec) -> HotspotResult<ProcessHandle> {
        debug!("command (detached): {}", cmd);

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HotspotError::SpawnFailed { cmd: cmd.to_string(), reason: e.to_string() })?;

        let pid = child.id().ok_or_else(|| HotspotError::SpawnFailed {
            cmd: cmd.to_string(),
            reason: "child exited before its pid could be read".to_string(),
        })?;

        debug!("not waiting on pid {}", pid);
        Ok(ProcessHandle { pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::new("iptables", &["-t", "nat", "-F"]);
        assert_eq!(cmd.to_string(), "iptables -t nat -F");
        let bare = CommandSpec::new::<&str>("true", &[]);
        assert_eq!(bare.to_string(), "true");
    }

    #[test]
    fn test_outcome_into_result() {
        let cmd = CommandSpec::new("sysctl", &["-w", "net.ipv4.ip_forward=1"]);
        assert_eq!(
            CommandOutcome::Success { output: "ok".into() }.into_result(&cmd).unwrap(),
            "ok"
        );
        match (CommandOutcome::NonZeroExit { code: Some(255), output: "denied".into() }).into_result(&cmd) {
            Err(HotspotError::CommandFailed { code, output, .. }) => {
                assert_eq!(code, Some(255));
                assert_eq!(output, "denied");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            (CommandOutcome::SpawnFailed { reason: "No such file".into() }).into_result(&cmd),
            Err(HotspotError::SpawnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let runner = SystemRunner::new();

        let ok = runner.run(&CommandSpec::new("sh", &["-c", "echo out; echo err >&2"])).await.unwrap();
        assert!(ok.is_success());
        assert!(ok.output().contains("out"));
        assert!(ok.output().contains("err"));

        let failed = runner.run(&CommandSpec::new("sh", &["-c", "exit 3"])).await.unwrap();
        assert_eq!(failed, CommandOutcome::NonZeroExit { code: Some(3), output: String::new() });
    }

    #[tokio::test]
    async fn test_run_missing_executable_is_spawn_failure() {
        let runner = SystemRunner::new();
        let outcome = runner
            .run(&CommandSpec::new::<&str>("/nonexistent/hotspotd-no-such-binary", &[]))
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let runner = SystemRunner::with_timeout(Duration::from_millis(200));
        let err = runner.run(&CommandSpec::new("sleep", &["5"])).await.unwrap_err();
        assert!(matches!(err, HotspotError::Timeout { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_spawn_detached_returns_pid() {
        let runner = SystemRunner::new();
        let handle = runner.spawn_detached(&CommandSpec::new("sleep", &["0.2"])).await.unwrap();
        assert!(handle.pid > 0);

        let err = runner
            .spawn_detached(&CommandSpec::new::<&str>("/nonexistent/hotspotd-no-such-binary", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, HotspotError::SpawnFailed { .. }));
    }
}
