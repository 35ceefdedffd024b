//! Error types for command execution

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::CommandInfo;
use crate::format;
use crate::info::ExecutionInfo;

/// One of the three standard streams of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdioSlot {
    Stdin,
    Stdout,
    Stderr,
}

impl StdioSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            StdioSlot::Stdin => "stdin",
            StdioSlot::Stdout => "stdout",
            StdioSlot::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StdioSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a stream handler
///
/// Cheap to clone so the same failure can be both the aggregated root cause
/// and the per-slot record.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    slot: StdioSlot,
    error: Arc<anyhow::Error>,
}

impl StreamFailure {
    pub(crate) fn new(slot: StdioSlot, error: anyhow::Error) -> Self {
        Self {
            slot,
            error: Arc::new(error),
        }
    }

    /// Stream whose handler failed
    pub fn slot(&self) -> StdioSlot {
        self.slot
    }

    /// Error returned by the handler
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} handler failed: {}", self.slot, self.error)
    }
}

impl std::error::Error for StreamFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.error)
    }
}

/// Failures observed per stream, for diagnostics
#[derive(Debug, Clone, Default)]
pub struct SlotFailures {
    pub stdin: Option<StreamFailure>,
    pub stdout: Option<StreamFailure>,
    pub stderr: Option<StreamFailure>,
}

impl SlotFailures {
    pub fn get(&self, slot: StdioSlot) -> Option<&StreamFailure> {
        match slot {
            StdioSlot::Stdin => self.stdin.as_ref(),
            StdioSlot::Stdout => self.stdout.as_ref(),
            StdioSlot::Stderr => self.stderr.as_ref(),
        }
    }

    /// Slots whose handler failed
    pub fn failed_slots(&self) -> Vec<StdioSlot> {
        [StdioSlot::Stdin, StdioSlot::Stdout, StdioSlot::Stderr]
            .into_iter()
            .filter(|slot| self.get(*slot).is_some())
            .collect()
    }
}

/// One or more handlers failed
#[derive(Debug)]
pub struct HandlerFailure {
    pub root: StreamFailure,
    /// Failures reported after the root, in arrival order
    pub suppressed: Vec<StreamFailure>,
    pub slots: SlotFailures,
    pub command_info: CommandInfo,
    pub execution_info: ExecutionInfo,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caught exception in handlers, the first: {}", self.root)?;
        if !self.suppressed.is_empty() {
            write!(f, " (+{} more)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for HandlerFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.root)
    }
}

/// The process outlived its timeout and was killed
#[derive(Debug)]
pub struct TimeoutFailure {
    pub timeout: Duration,
    pub slots: SlotFailures,
    pub command_info: CommandInfo,
    pub execution_info: ExecutionInfo,
}

/// Command execution errors
#[derive(Debug, Error)]
pub enum CmdError {
    /// The configuration cannot be executed
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Spawning or waiting on the process failed outside handler code
    #[error("I/O failure during command execution: {source}")]
    Io {
        info: Box<CommandInfo>,
        execution: Option<Box<ExecutionInfo>>,
        #[source]
        source: io::Error,
    },

    /// A stream handler failed
    #[error(transparent)]
    Handler(Box<HandlerFailure>),

    /// The process did not exit within its timeout
    #[error("Command execution timed out after {}ms", .0.timeout.as_millis())]
    Timeout(Box<TimeoutFailure>),

    /// The execution was cancelled by the caller
    #[error("Command execution interrupted")]
    Interrupted {
        info: Box<CommandInfo>,
        execution: Option<Box<ExecutionInfo>>,
    },
}

impl CmdError {
    /// Configuration of the failed command, when one was available
    pub fn command_info(&self) -> Option<&CommandInfo> {
        match self {
            CmdError::InvalidCommand(_) => None,
            CmdError::Io { info, .. } | CmdError::Interrupted { info, .. } => Some(info),
            CmdError::Handler(failure) => Some(&failure.command_info),
            CmdError::Timeout(failure) => Some(&failure.command_info),
        }
    }

    /// Execution details, when the process was started
    pub fn execution_info(&self) -> Option<&ExecutionInfo> {
        match self {
            CmdError::InvalidCommand(_) => None,
            CmdError::Io { execution, .. } | CmdError::Interrupted { execution, .. } => {
                execution.as_deref()
            }
            CmdError::Handler(failure) => Some(&failure.execution_info),
            CmdError::Timeout(failure) => Some(&failure.execution_info),
        }
    }

    /// Per-stream handler failures, for handler and timeout failures
    pub fn slot_failures(&self) -> Option<&SlotFailures> {
        match self {
            CmdError::Handler(failure) => Some(&failure.slots),
            CmdError::Timeout(failure) => Some(&failure.slots),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CmdError::Timeout(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, CmdError::Interrupted { .. })
    }

    /// Full multi-line report: message, command and execution details
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        out.push('\n');
        if let Some(failures) = self.slot_failures() {
            for slot in failures.failed_slots() {
                if let Some(failure) = failures.get(slot) {
                    out.push_str(&format!("  {failure}\n"));
                }
            }
        }
        if let Some(info) = self.command_info() {
            out.push_str(&format::command_info(info));
        }
        if let Some(execution) = self.execution_info() {
            out.push_str(&format::execution_info(execution));
        }
        out
    }
}

/// Result type for command execution
pub type Result<T> = std::result::Result<T, CmdError>;

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_stream_failure_source_chain() {
        let failure = StreamFailure::new(
            StdioSlot::Stdout,
            anyhow::anyhow!("parse error").context("reading output"),
        );
        assert_eq!(failure.slot(), StdioSlot::Stdout);
        assert_eq!(failure.to_string(), "stdout handler failed: reading output");
        let source = std::error::Error::source(&failure).unwrap();
        assert_eq!(source.to_string(), "reading output");

        let cloned = failure.clone();
        assert!(Arc::ptr_eq(&failure.error, &cloned.error));
    }

    #[test]
    fn test_handler_failure_diagnostic() {
        let root = StreamFailure::new(StdioSlot::Stdout, anyhow::anyhow!("bad utf8"));
        let err = CmdError::Handler(Box::new(HandlerFailure {
            root: root.clone(),
            suppressed: vec![StreamFailure::new(
                StdioSlot::Stdin,
                anyhow::anyhow!("broken pipe"),
            )],
            slots: SlotFailures {
                stdout: Some(root),
                ..SlotFailures::default()
            },
            command_info: CommandInfo::new(["cat"]),
            execution_info: ExecutionInfo::started(7, Utc::now()).finished(Utc::now(), 137),
        }));

        assert_eq!(
            err.to_string(),
            "caught exception in handlers, the first: stdout handler failed: bad utf8 (+1 more)"
        );
        assert_eq!(err.slot_failures().unwrap().failed_slots(), vec![StdioSlot::Stdout]);
        let report = err.diagnostic();
        assert!(report.contains("[\"cat\"]"));
        assert!(report.contains("Exit code: 137"));
    }

    #[test]
    fn test_invalid_command_has_no_context() {
        let err = CmdError::InvalidCommand("command line is empty".into());
        assert!(err.command_info().is_none());
        assert!(err.execution_info().is_none());
        assert_eq!(err.to_string(), "Invalid command: command line is empty");
    }
}
