//! Property-based tests for the stderr error recorder
//!
//! **Property 1: Bounded Transcript**
//! For any stderr output, the transcript holds at most head + marker + tail
//! lines, each no wider than the line width
//!
//! **Property 2: Verbatim Short Output**
//! Output with few enough non-blank lines is kept unchanged

use std::io::Write;

use cmdpipe::recorder::{DEFAULT_KEEP_LINES, DEFAULT_LINE_WIDTH, TRUNCATION_MARKER};
use cmdpipe::ErrorRecorder;
use proptest::prelude::*;

/// Strategy for one line of printable text, possibly blank
fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-zA-Z0-9 ,:;_-]{1,200}",
        1 => Just(String::new()),
        1 => "[ \t]{1,5}",
    ]
}

/// Property 1: Bounded Transcript
#[test]
fn prop_transcript_is_bounded() {
    proptest!(ProptestConfig::with_cases(100), |(
        lines in prop::collection::vec(line_strategy(), 0..300),
        chunk in 1usize..64,
    )| {
        let text = lines.join("\n");
        let mut recorder = ErrorRecorder::default();
        for piece in text.as_bytes().chunks(chunk) {
            recorder.write_all(piece).unwrap();
        }
        let out = recorder.finish();

        let rendered: Vec<&str> = out.lines().collect();
        prop_assert!(rendered.len() <= 2 * DEFAULT_KEEP_LINES + 1);
        for line in &rendered {
            prop_assert!(line.chars().count() <= DEFAULT_LINE_WIDTH);
            prop_assert!(!line.trim().is_empty(), "blank line kept: {:?}", out);
        }

        let non_blank = lines
            .iter()
            .filter(|l| !l.chars().take(DEFAULT_LINE_WIDTH).collect::<String>().trim().is_empty())
            .count();
        let truncated = non_blank > 2 * DEFAULT_KEEP_LINES;
        prop_assert_eq!(rendered.contains(&TRUNCATION_MARKER), truncated);
        if truncated {
            prop_assert_eq!(rendered[DEFAULT_KEEP_LINES], TRUNCATION_MARKER);
        }
    });
}

/// Property 2: Verbatim Short Output
#[test]
fn prop_short_output_is_verbatim() {
    proptest!(ProptestConfig::with_cases(100), |(
        lines in prop::collection::vec("[a-z]{1,40}", 0..=2 * DEFAULT_KEEP_LINES),
    )| {
        let mut recorder = ErrorRecorder::default();
        for line in &lines {
            recorder.write_all(line.as_bytes()).unwrap();
            recorder.write_all(b"\r\n").unwrap();
        }
        prop_assert_eq!(recorder.finish(), lines.join("\n"));
    });
}
