//! Command configuration

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::env::EnvVar;
use crate::error::StdioSlot;

/// Text encoding used when decoding process output into strings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    /// UTF-8, invalid sequences replaced with U+FFFD
    #[default]
    Utf8,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
}

impl Charset {
    /// Decode bytes into text
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes),
            Charset::Latin1 => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Canonical charset name
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
        }
    }
}

/// Which standard streams the child shares with this process
///
/// An inherited stream gets no handler and, for stderr, no error recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InheritIo {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl InheritIo {
    pub const NONE: Self = Self {
        stdin: false,
        stdout: false,
        stderr: false,
    };

    pub const ALL: Self = Self {
        stdin: true,
        stdout: true,
        stderr: true,
    };

    pub fn get(&self, slot: StdioSlot) -> bool {
        match slot {
            StdioSlot::Stdin => self.stdin,
            StdioSlot::Stdout => self.stdout,
            StdioSlot::Stderr => self.stderr,
        }
    }

    /// Copy with one slot switched
    pub fn with(mut self, slot: StdioSlot, inherit: bool) -> Self {
        match slot {
            StdioSlot::Stdin => self.stdin = inherit,
            StdioSlot::Stdout => self.stdout = inherit,
            StdioSlot::Stderr => self.stderr = inherit,
        }
        self
    }
}

impl fmt::Display for InheritIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<&str> = [StdioSlot::Stdin, StdioSlot::Stdout, StdioSlot::Stderr]
            .into_iter()
            .filter(|slot| self.get(*slot))
            .map(|slot| slot.as_str())
            .collect();
        if slots.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&slots.join(", "))
        }
    }
}

/// Immutable description of one command invocation
///
/// Every `with_*` method consumes the value and returns a modified copy, so
/// clones taken before a change are never affected by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInfo {
    /// Program followed by its arguments
    pub command_line: Vec<String>,
    /// Working directory (None = inherit)
    pub working_directory: Option<PathBuf>,
    /// Environment deltas, applied in order on top of the inherited environment
    pub environment: Vec<EnvVar>,
    /// Execution timeout (zero = unbounded)
    pub timeout: Duration,
    /// Streams connected directly to this process's standard streams
    pub inherit_io: InheritIo,
    /// Kill descendants along with the process on forced termination
    pub kill_descendants: bool,
    /// Record a stderr snapshot when no stderr handler is set
    pub enable_default_error_recorder: bool,
    /// Charset used by the error recorder and text handlers
    pub io_charset: Charset,
    /// On a permission error at spawn, mark the program file executable and retry once
    pub auto_grant_executable: bool,
}

impl Default for CommandInfo {
    fn default() -> Self {
        Self {
            command_line: Vec::new(),
            working_directory: None,
            environment: Vec::new(),
            timeout: Duration::ZERO,
            inherit_io: InheritIo::NONE,
            kill_descendants: true,
            enable_default_error_recorder: true,
            io_charset: Charset::default(),
            auto_grant_executable: false,
        }
    }
}

impl CommandInfo {
    /// Create configuration for the given command line
    pub fn new<I, S>(command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command_line: command_line.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Replace the command line
    pub fn with_command_line<I, S>(mut self, command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_line = command_line.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Append environment deltas
    pub fn with_environment<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = EnvVar>,
    {
        self.environment.extend(vars);
        self
    }

    /// Set timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable/disable inheritance of all three streams
    pub fn with_inherit_io(mut self, inherit: bool) -> Self {
        self.inherit_io = if inherit { InheritIo::ALL } else { InheritIo::NONE };
        self
    }

    /// Enable/disable inheritance of one stream
    pub fn with_inherit(mut self, slot: StdioSlot, inherit: bool) -> Self {
        self.inherit_io = self.inherit_io.with(slot, inherit);
        self
    }

    /// Enable/disable descendant killing
    pub fn with_kill_descendants(mut self, kill: bool) -> Self {
        self.kill_descendants = kill;
        self
    }

    /// Enable/disable the default stderr recorder
    pub fn with_default_error_recorder(mut self, enable: bool) -> Self {
        self.enable_default_error_recorder = enable;
        self
    }

    /// Set text charset
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.io_charset = charset;
        self
    }

    /// Enable/disable granting the executable bit after a permission error
    pub fn with_auto_grant_executable(mut self, enable: bool) -> Self {
        self.auto_grant_executable = enable;
        self
    }

    /// Program name, if the command line is not empty
    pub fn program(&self) -> Option<&str> {
        self.command_line.first().map(String::as_str)
    }

    /// Timeout as an option, `None` when unbounded
    pub fn timeout_limit(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let info = CommandInfo::new(["ls", "-l"]);
        assert_eq!(info.command_line, vec!["ls", "-l"]);
        assert_eq!(info.program(), Some("ls"));
        assert!(info.kill_descendants);
        assert!(info.enable_default_error_recorder);
        assert_eq!(info.inherit_io, InheritIo::NONE);
        assert!(!info.auto_grant_executable);
        assert_eq!(info.timeout_limit(), None);
        assert_eq!(info.io_charset, Charset::Utf8);
    }

    #[test]
    fn test_builder_leaves_original_untouched() {
        let base = CommandInfo::new(["sleep", "1"]);
        let timed = base.clone().with_timeout(Duration::from_millis(250));
        let other = base
            .clone()
            .with_environment([EnvVar::new("A", "1")])
            .with_working_directory("/tmp");

        assert_eq!(base.timeout, Duration::ZERO);
        assert!(base.environment.is_empty());
        assert_eq!(timed.timeout_limit(), Some(Duration::from_millis(250)));
        assert!(timed.environment.is_empty());
        assert_eq!(other.environment.len(), 1);
        assert_eq!(other.working_directory, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_inherit_per_slot() {
        let info = CommandInfo::new(["vim"])
            .with_inherit_io(true)
            .with_inherit(StdioSlot::Stdout, false);
        assert!(info.inherit_io.get(StdioSlot::Stdin));
        assert!(!info.inherit_io.get(StdioSlot::Stdout));
        assert!(info.inherit_io.get(StdioSlot::Stderr));
        assert_eq!(info.inherit_io.to_string(), "stdin, stderr");

        let info = info.with_inherit_io(false);
        assert_eq!(info.inherit_io, InheritIo::NONE);
        assert_eq!(info.inherit_io.to_string(), "none");
    }

    #[test]
    fn test_charset_decode() {
        assert_eq!(Charset::Utf8.decode("héllo".as_bytes()), "héllo");
        assert_eq!(Charset::Utf8.decode(&[0x61, 0xff]), "a\u{fffd}");
        assert_eq!(Charset::Latin1.decode(&[0x61, 0xe9]), "aé");
        assert_eq!(Charset::Latin1.name(), "ISO-8859-1");
    }

    #[test]
    fn test_deserialize_from_toml() {
        let info: CommandInfo = toml::from_str(
            r#"
            command_line = ["make", "all"]
            working_directory = "/src"
            kill_descendants = false
            io_charset = "latin1"
            auto_grant_executable = true

            [inherit_io]
            stderr = true

            [[environment]]
            name = "CC"
            value = "clang"

            [[environment]]
            name = "TOKEN"
            value = "s3cr3t"
            confidential = true
            "#,
        )
        .unwrap();

        assert_eq!(info.command_line, vec!["make", "all"]);
        assert!(!info.kill_descendants);
        assert!(info.enable_default_error_recorder);
        assert_eq!(info.io_charset, Charset::Latin1);
        assert!(info.auto_grant_executable);
        assert_eq!(info.inherit_io, InheritIo::NONE.with(StdioSlot::Stderr, true));
        assert_eq!(info.environment.len(), 2);
        assert!(info.environment[1].confidential);
    }
}
