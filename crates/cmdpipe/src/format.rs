//! Human-readable diagnostics for commands and executions

use std::fmt::Write;

use crate::config::CommandInfo;
use crate::info::ExecutionInfo;

/// Escape a string for single-line display
///
/// Control characters, quotes and backslashes are always escaped. When
/// `escape_unicode` is set, every non-ASCII character is written as `\uXXXX`.
pub fn escape_string(input: &str, escape_unicode: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c if escape_unicode && (c as u32) > 0x7f => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Render a command configuration
pub fn command_info(info: &CommandInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Command:");
    let _ = writeln!(out, "  Command line: {:?}", info.command_line);
    match &info.working_directory {
        Some(dir) => {
            let _ = writeln!(out, "  Working directory: {}", dir.display());
        }
        None => {
            let _ = writeln!(out, "  Working directory: (inherited)");
        }
    }
    if let Some(timeout) = info.timeout_limit() {
        let _ = writeln!(out, "  Timeout: {}ms", timeout.as_millis());
    }
    let _ = writeln!(out, "  Inherit IO: {}", info.inherit_io);
    let _ = writeln!(out, "  Charset: {}", info.io_charset.name());
    let _ = writeln!(
        out,
        "  Environment variables ({}):",
        info.environment.len()
    );
    for var in &info.environment {
        let _ = writeln!(out, "    {var}");
    }
    out
}

/// Render execution details
pub fn execution_info(info: &ExecutionInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Execution:");
    let _ = writeln!(out, "  Pid: {}", info.pid);
    match info.exit_code {
        Some(code) => {
            let _ = writeln!(out, "  Exit code: {code}");
        }
        None => {
            let _ = writeln!(out, "  Exit code: -");
        }
    }
    match (info.end_at, info.duration()) {
        (Some(end_at), Some(duration)) => {
            let _ = writeln!(
                out,
                "  Timing: {} .. {} ({}ms)",
                info.start_at.to_rfc3339(),
                end_at.to_rfc3339(),
                duration.num_milliseconds()
            );
        }
        _ => {
            let _ = writeln!(
                out,
                "  Timing: {} .. (running)",
                info.start_at.to_rfc3339()
            );
        }
    }
    let _ = writeln!(out, "  Killed by timeout: {}", info.timeout_killed);
    if !info.stderr_snapshot.is_empty() {
        let _ = writeln!(out, "  Stderr:");
        for line in info.stderr_snapshot.lines() {
            let _ = writeln!(out, "    {line}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::env::EnvVar;

    #[test]
    fn test_escape_ascii() {
        assert_eq!(escape_string("plain", false), "plain");
        assert_eq!(escape_string("a\tb\r\n", false), "a\\tb\\r\\n");
        assert_eq!(escape_string("it's \\", false), "it\\'s \\\\");
        assert_eq!(escape_string("\u{1}", false), "\\u0001");
    }

    #[test]
    fn test_escape_unicode() {
        assert_eq!(escape_string("café", false), "café");
        assert_eq!(escape_string("café", true), "caf\\u00E9");
    }

    #[test]
    fn test_command_info_redacts_confidential() {
        let info = CommandInfo::new(["deploy"])
            .with_timeout(Duration::from_secs(2))
            .with_environment([
                EnvVar::new("REGION", "eu"),
                EnvVar::new("API_KEY", "hunter2").confidential(),
                EnvVar::remove("DEBUG"),
            ]);

        let text = command_info(&info);
        assert!(text.contains("[\"deploy\"]"));
        assert!(text.contains("Timeout: 2000ms"));
        assert!(text.contains("REGION=\"eu\""));
        assert!(text.contains("API_KEY ***"));
        assert!(text.contains("DEBUG (cleared)"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_execution_info_running_and_finished() {
        let running = ExecutionInfo::started(42, Utc::now());
        assert!(execution_info(&running).contains("(running)"));
        assert!(execution_info(&running).contains("Exit code: -"));

        let finished = running.finished(Utc::now(), 3).with_stderr_snapshot("boom");
        let text = execution_info(&finished);
        assert!(text.contains("Pid: 42"));
        assert!(text.contains("Exit code: 3"));
        assert!(text.contains("    boom"));
    }
}
