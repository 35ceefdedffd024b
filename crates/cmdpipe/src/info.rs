//! Execution details and results

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CommandInfo;

/// What happened to one process
///
/// Created when the process starts, completed once on exit and frozen
/// before it is returned or attached to a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Process ID (-1 when the platform does not expose it)
    pub pid: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// The process was forcibly killed because the timeout elapsed
    pub timeout_killed: bool,
    /// Head/tail stderr transcript from the default recorder
    pub stderr_snapshot: String,
}

impl ExecutionInfo {
    pub(crate) fn started(pid: i64, start_at: DateTime<Utc>) -> Self {
        Self {
            pid,
            start_at,
            end_at: None,
            exit_code: None,
            timeout_killed: false,
            stderr_snapshot: String::new(),
        }
    }

    pub(crate) fn finished(mut self, end_at: DateTime<Utc>, exit_code: i32) -> Self {
        self.end_at = Some(end_at);
        self.exit_code = Some(exit_code);
        self
    }

    pub(crate) fn killed_by_timeout(mut self) -> Self {
        self.timeout_killed = true;
        self
    }

    pub(crate) fn with_stderr_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.stderr_snapshot = snapshot.into();
        self
    }

    /// Wall-clock duration, once the process has ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_at.map(|end_at| end_at - self.start_at)
    }
}

/// Successful execution outcome
#[derive(Debug, Clone)]
pub struct ExecutionResult<SO, SE> {
    pub(crate) command_info: CommandInfo,
    pub(crate) execution_info: ExecutionInfo,
    pub(crate) exit_code: i32,
    pub(crate) stdout: Option<SO>,
    pub(crate) stderr: Option<SE>,
    pub(crate) elapsed: Duration,
}

impl<SO, SE> ExecutionResult<SO, SE> {
    /// Command line that was executed
    pub fn command_line(&self) -> &[String] {
        &self.command_info.command_line
    }

    /// Exit code (128 + signal number when killed by a signal on Unix)
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Value produced by the stdout handler, `None` if none was set
    pub fn stdout_value(&self) -> Option<&SO> {
        self.stdout.as_ref()
    }

    /// Value produced by the stderr handler, `None` if none was set
    pub fn stderr_value(&self) -> Option<&SE> {
        self.stderr.as_ref()
    }

    /// Take the stdout value out of the result
    pub fn into_stdout(self) -> Option<SO> {
        self.stdout
    }

    /// Error recorder transcript, empty when a stderr handler consumed stderr
    pub fn stderr_snapshot(&self) -> &str {
        &self.execution_info.stderr_snapshot
    }

    pub fn command_info(&self) -> &CommandInfo {
        &self.command_info
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    /// Time between spawn and exit, measured on a monotonic clock
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
