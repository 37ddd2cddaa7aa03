//! Output classification for the external tool's line feed.
//!
//! The tool prints one progress line per audio frame plus elapsed-time
//! ticks and interactive prompts. Only a proportionate subset reaches the
//! job feed; every line still counts toward error detection.

use std::sync::LazyLock;

use regex::Regex;

/// Frame progress lines are forwarded only on multiples of this.
pub const FRAME_FORWARD_EVERY: u64 = 20;

/// Bare interactive prompt.
const PROMPT_LINE: &str = ">";

/// Explicit markers the tool uses for failures.
const ERROR_MARKERS: &[&str] = &["[ERROR]"];

static FRAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[Frame\s+(\d+)\]$").expect("valid frame pattern"));

static ELAPSED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}:\d{2}$").expect("valid elapsed pattern"));

/// Verdict for one (trimmed, non-empty) output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineVerdict {
    /// The line signals a failure; the whole run is flagged.
    pub errored: bool,
    /// The line should reach the job feed.
    pub forward: bool,
}

/// Classify one output line.
pub fn classify(line: &str) -> LineVerdict {
    LineVerdict {
        errored: is_error_line(line),
        forward: should_forward(line),
    }
}

/// Whether a line indicates failure.
pub fn is_error_line(line: &str) -> bool {
    ERROR_MARKERS.iter().any(|m| line.contains(m)) || line.to_lowercase().contains("error")
}

/// Whether a line is worth forwarding to observers.
pub fn should_forward(line: &str) -> bool {
    if line == PROMPT_LINE || ELAPSED_PATTERN.is_match(line) {
        return false;
    }
    match frame_number(line) {
        Some(frame) => frame % FRAME_FORWARD_EVERY == 0,
        None => true,
    }
}

/// Frame number of a line that is exactly one progress marker.
fn frame_number(line: &str) -> Option<u64> {
    FRAME_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().parse().unwrap_or(u64::MAX))
}
