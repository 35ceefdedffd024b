//! Bounded head/tail transcript used as the default stderr sink

use std::collections::VecDeque;
use std::fmt;
use std::io;

use crate::config::Charset;

/// Default maximum characters kept per line
pub const DEFAULT_LINE_WIDTH: usize = 80;
/// Default number of lines kept at each end
pub const DEFAULT_KEEP_LINES: usize = 4;
/// Marker rendered between head and tail when lines were dropped
pub const TRUNCATION_MARKER: &str = "...";

/// Keeps the first and last few non-blank lines of a stream
///
/// Memory use is bounded by `line_width` and the head/tail sizes regardless
/// of how much is written.
#[derive(Debug, Clone)]
pub struct ErrorRecorder {
    line_width: usize,
    head_limit: usize,
    tail_limit: usize,
    charset: Charset,
    pending: Vec<u8>,
    head: Vec<String>,
    tail: VecDeque<String>,
    dropped: usize,
}

impl Default for ErrorRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_WIDTH, DEFAULT_KEEP_LINES, DEFAULT_KEEP_LINES)
    }
}

impl ErrorRecorder {
    pub fn new(line_width: usize, head_limit: usize, tail_limit: usize) -> Self {
        Self {
            line_width,
            head_limit,
            tail_limit,
            charset: Charset::default(),
            pending: Vec::new(),
            head: Vec::with_capacity(head_limit),
            tail: VecDeque::with_capacity(tail_limit),
            dropped: 0,
        }
    }

    /// Decode lines with the given charset
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Feed raw bytes
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        // A UTF-8 char is at most 4 bytes, so this is enough for `line_width` chars.
        let byte_limit = self.line_width.saturating_mul(4);
        for &b in bytes {
            match b {
                b'\n' => self.commit_pending(),
                b'\r' => {}
                _ if self.pending.len() < byte_limit => self.pending.push(b),
                _ => {}
            }
        }
    }

    /// Commit a trailing partial line
    pub fn flush_line(&mut self) {
        if !self.pending.is_empty() {
            self.commit_pending();
        }
    }

    /// Commit any partial line and render the transcript
    pub fn finish(mut self) -> String {
        self.flush_line();
        self.to_string()
    }

    /// Number of lines currently retained, excluding the marker
    pub fn retained_lines(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// Whether lines between head and tail were discarded
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    fn commit_pending(&mut self) {
        let bytes = std::mem::take(&mut self.pending);
        let line: String = self
            .charset
            .decode(&bytes)
            .chars()
            .take(self.line_width)
            .collect();
        self.commit_line(line);
    }

    fn commit_line(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.head.len() < self.head_limit {
            self.head.push(line);
            return;
        }
        if self.tail_limit == 0 {
            self.dropped += 1;
            return;
        }
        if self.tail.len() >= self.tail_limit {
            self.tail.pop_front();
            self.dropped += 1;
        }
        self.tail.push_back(line);
    }
}

impl fmt::Display for ErrorRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<&str> = self.head.iter().map(String::as_str).collect();
        if self.dropped > 0 {
            lines.push(TRUNCATION_MARKER);
        }
        lines.extend(self.tail.iter().map(String::as_str));
        f.write_str(&lines.join("\n"))
    }
}

impl io::Write for ErrorRecorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
